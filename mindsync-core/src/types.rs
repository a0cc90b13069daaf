use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat map of editor preferences. Absence of a key means "use the built-in default".
pub type EditorConfig = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Invalid document JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Document content must be a JSON object")]
    NotAnObject,

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rich_text: bool,
    #[serde(default = "default_expand")]
    pub expand: bool,
    /// Engine-specific attributes (styles, images, notes...) kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_expand() -> bool {
    true
}

impl NodeData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            uid: Some(uuid::Uuid::new_v4().to_string()),
            rich_text: false,
            expand: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub data: NodeData,
    #[serde(default)]
    pub children: Vec<Node>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            data: NodeData::new(text),
            children: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    /// Depth-first visit of this node and all descendants.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }

    /// Check that no two nodes in this subtree share a uid.
    pub fn validate_ids(&self) -> Result<(), DocumentError> {
        let mut seen = HashSet::new();
        let mut duplicate = None;
        self.walk(&mut |node| {
            if duplicate.is_some() {
                return;
            }
            if let Some(uid) = node.data.uid.as_deref() {
                if !seen.insert(uid) {
                    duplicate = Some(uid.to_string());
                }
            }
        });
        match duplicate {
            Some(uid) => Err(DocumentError::DuplicateNodeId(uid)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Layout {
    #[default]
    LogicalStructure,
    LogicalStructureLeft,
    MindMap,
    OrganizationStructure,
    CatalogOrganization,
    Timeline,
    Timeline2,
    VerticalTimeline,
    Fishbone,
    /// Layout name this build does not know; kept verbatim.
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub template: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            template: "default".to_string(),
            config: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub sx: f64,
    #[serde(default)]
    pub sy: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// Pan/zoom state of the canvas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    #[serde(default)]
    pub transform: Map<String, Value>,
    #[serde(default)]
    pub state: ViewState,
}

impl View {
    pub fn at(x: f64, y: f64, scale: f64) -> Self {
        Self {
            transform: Map::new(),
            state: ViewState {
                scale,
                x,
                y,
                sx: 0.0,
                sy: 0.0,
            },
        }
    }
}

/// The unit of persistence: node tree plus layout, theme and view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: Node,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub view: Option<View>,
}

/// Partial document used for shallow-merge writes. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<View>,
}

impl DocumentPatch {
    pub fn root(root: Node) -> Self {
        Self {
            root: Some(root),
            ..Self::default()
        }
    }

    pub fn view(view: View) -> Self {
        Self {
            view: Some(view),
            ..Self::default()
        }
    }
}

impl From<Document> for DocumentPatch {
    fn from(doc: Document) -> Self {
        Self {
            root: Some(doc.root),
            layout: Some(doc.layout),
            theme: Some(doc.theme),
            view: doc.view,
        }
    }
}

impl Document {
    /// Built-in example used when nothing has been stored yet.
    pub fn example() -> Self {
        let leaf = |text: &str, uid: &str| Node {
            data: NodeData {
                text: text.to_string(),
                uid: Some(uid.to_string()),
                rich_text: false,
                expand: true,
                extra: Map::new(),
            },
            children: Vec::new(),
            extra: Map::new(),
        };
        let branch = |text: &str, uid: &str, children: Vec<Node>| {
            let mut node = leaf(text, uid);
            node.children = children;
            node
        };

        let root = branch(
            "Mind map",
            "6f6b86f3-d773-4ace-84a7-55b00a5dee30",
            vec![
                branch(
                    "Ideas",
                    "d10f535e-34f8-4e75-819c-ad80465ff380",
                    vec![
                        leaf("Collect", "4154dd01-8b88-4c18-95ca-f047d2acfc34"),
                        leaf("Sort", "9446e976-fa33-41c8-84c6-ff63164402e8"),
                    ],
                ),
                branch(
                    "Plans",
                    "5b7452b0-a06b-4b39-98bf-e88ac507fa22",
                    vec![leaf("Next steps", "d0701f20-8995-479a-9e04-d8a5f433328d")],
                ),
            ],
        );

        Self {
            root,
            layout: Layout::LogicalStructure,
            theme: Theme {
                template: "gold".to_string(),
                config: Map::new(),
            },
            view: None,
        }
    }

    /// A fresh document with a single root node.
    pub fn blank(title: impl Into<String>) -> Self {
        Self {
            root: Node::new(title),
            ..Self::example()
        }
    }

    pub fn validate(&self) -> Result<(), DocumentError> {
        self.root.validate_ids()
    }

    /// Shallow merge: every field present in the patch replaces the current one.
    pub fn apply(&mut self, patch: DocumentPatch) {
        if let Some(root) = patch.root {
            self.root = root;
        }
        if let Some(layout) = patch.layout {
            self.layout = layout;
        }
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(view) = patch.view {
            self.view = Some(view);
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, DocumentError> {
        let doc: Document = serde_json::from_str(content)?;
        doc.validate()?;
        Ok(doc)
    }
}

/// Shape of a persisted document file: the full wrapper or only the root tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    Full,
    Tree,
}

/// A validated document about to replace the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPayload {
    pub document: Document,
    pub mode: FileMode,
}

impl ImportPayload {
    /// Parse imported JSON. An object with a `root` key is a full document; any other
    /// object is a bare tree, wrapped with the example's layout and theme.
    pub fn parse(content: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(map) = value else {
            return Err(DocumentError::NotAnObject);
        };
        let (document, mode) = if map.contains_key("root") {
            let doc: Document = serde_json::from_value(Value::Object(map))?;
            (doc, FileMode::Full)
        } else {
            let root: Node = serde_json::from_value(Value::Object(map))?;
            let doc = Document {
                root,
                view: None,
                ..Document::example()
            };
            (doc, FileMode::Tree)
        };
        document.validate()?;
        Ok(Self { document, mode })
    }
}

/// Local-only preferences, stored apart from the editor config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPreferences {
    #[serde(default)]
    pub is_zen_mode: bool,
    #[serde(default = "default_true")]
    pub open_node_rich_text: bool,
    #[serde(default)]
    pub use_left_key_selection_right_key_drag: bool,
    #[serde(default)]
    pub is_show_scrollbar: bool,
    #[serde(default = "default_true")]
    pub enable_ai: bool,
    #[serde(default = "default_true")]
    pub enable_drag_import: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for LocalPreferences {
    fn default() -> Self {
        Self {
            is_zen_mode: false,
            open_node_rich_text: true,
            use_left_key_selection_right_key_drag: false,
            is_show_scrollbar: false,
            enable_ai: true,
            enable_drag_import: true,
            extra: Map::new(),
        }
    }
}

/// Local bookkeeping about the last snapshot write. Not a conflict-resolution clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_updated_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
