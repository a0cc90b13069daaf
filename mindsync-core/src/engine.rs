/// The rendering/editing engine, seen from the persistence side.
///
/// The real engine lives outside this crate; it emits `EditorEvent`s on the
/// Change Funnel and accepts data through this trait.
use serde_json::Value;

use crate::types::{Document, Node};

pub trait EditorEngine: Send {
    /// Current data: the full document wrapper when `full`, else only the root tree.
    fn serialized_data(&self, full: bool) -> Value;

    /// Replace the tree, keeping layout/theme/view.
    fn set_data(&mut self, root: &Node);

    /// Replace everything.
    fn set_full_data(&mut self, document: &Document);

    fn reset_view(&mut self);
}

/// Engine stand-in for headless sessions: holds the document and nothing else.
#[derive(Debug, Clone)]
pub struct HeadlessEngine {
    document: Document,
}

impl HeadlessEngine {
    pub fn new(document: Document) -> Self {
        Self { document }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Edit the held tree in place (what a user edit would do in a real engine).
    pub fn edit(&mut self, f: impl FnOnce(&mut Node)) -> Node {
        f(&mut self.document.root);
        self.document.root.clone()
    }
}

impl EditorEngine for HeadlessEngine {
    fn serialized_data(&self, full: bool) -> Value {
        let value = if full {
            serde_json::to_value(&self.document)
        } else {
            serde_json::to_value(&self.document.root)
        };
        value.unwrap_or(Value::Null)
    }

    fn set_data(&mut self, root: &Node) {
        self.document.root = root.clone();
    }

    fn set_full_data(&mut self, document: &Document) {
        self.document = document.clone();
    }

    fn reset_view(&mut self) {
        self.document.view = None;
    }
}
