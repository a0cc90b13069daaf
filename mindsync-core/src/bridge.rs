/// Local File Bridge.
///
/// Persists the document to a user-chosen file outside the managed storage
/// area. The file handle is an opaque capability handed out by a picker:
/// - picker dismissed → `Ok(None)`, a silent no-op
/// - write mode (full wrapper vs bare tree) is fixed when the file is opened or
///   created and kept for the lifetime of the handle
/// - permission loss disables the bridge; callers report it once
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::local::atomic_write;
use crate::types::{Document, DocumentError, FileMode, ImportPayload};

/// Extension of the editable native format.
pub const NATIVE_EXTENSION: &str = "smm";
/// Interchange formats that can be read but are never written back.
pub const READ_ONLY_EXTENSIONS: &[&str] = &["json", "md", "xmind"];

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Unsupported file: {0}")]
    Unsupported(String),

    #[error("File content error: {0}")]
    Document(#[from] DocumentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A user-granted, revocable file capability.
pub trait FileHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> String;
    fn read(&self) -> std::io::Result<String>;
    fn write(&self, content: &str) -> std::io::Result<()>;
}

/// Asks the user for a file. `Ok(None)` means the user cancelled.
pub trait FilePicker {
    fn pick_save_target(
        &self,
        suggested_name: &str,
    ) -> Result<Option<Arc<dyn FileHandle>>, BridgeError>;

    fn pick_open_target(&self) -> Result<Option<Arc<dyn FileHandle>>, BridgeError>;
}

/// File handle over a filesystem path.
#[derive(Debug, Clone)]
pub struct PathHandle {
    path: PathBuf,
}

impl PathHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileHandle for PathHandle {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    fn read(&self) -> std::io::Result<String> {
        fs::read_to_string(&self.path)
    }

    fn write(&self, content: &str) -> std::io::Result<()> {
        atomic_write(&self.path, content)
    }
}

/// Picker answering with paths chosen ahead of time (command line, config).
/// A missing path behaves like a dismissed dialog.
#[derive(Debug, Clone, Default)]
pub struct PathPicker {
    save_dir: Option<PathBuf>,
    open_path: Option<PathBuf>,
}

impl PathPicker {
    pub fn save_into(dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: Some(dir.into()),
            open_path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: None,
            open_path: Some(path.into()),
        }
    }
}

impl FilePicker for PathPicker {
    fn pick_save_target(
        &self,
        suggested_name: &str,
    ) -> Result<Option<Arc<dyn FileHandle>>, BridgeError> {
        let Some(dir) = &self.save_dir else {
            return Ok(None);
        };
        let mut path = dir.join(suggested_name);
        if path.extension().and_then(|e| e.to_str()) != Some(NATIVE_EXTENSION) {
            path.set_extension(NATIVE_EXTENSION);
        }
        Ok(Some(Arc::new(PathHandle::new(path))))
    }

    fn pick_open_target(&self) -> Result<Option<Arc<dyn FileHandle>>, BridgeError> {
        let Some(path) = &self.open_path else {
            return Ok(None);
        };
        if path.is_dir() {
            return Err(BridgeError::Unsupported(format!(
                "{} is a directory",
                path.display()
            )));
        }
        Ok(Some(Arc::new(PathHandle::new(path.clone()))))
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Only the native format is written back to disk.
pub fn is_editable_name(name: &str) -> bool {
    extension_of(name).as_deref() == Some(NATIVE_EXTENSION)
}

/// Serialize a document the way a file of the given mode stores it.
pub fn render(document: &Document, mode: FileMode) -> Result<String, serde_json::Error> {
    match mode {
        FileMode::Full => serde_json::to_string(document),
        FileMode::Tree => serde_json::to_string(&document.root),
    }
}

/// Result of opening a file: its content, and whether it is now the bound write target.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedFile {
    pub payload: ImportPayload,
    pub bound: bool,
}

#[derive(Debug, Clone)]
struct BoundFile {
    handle: Arc<dyn FileHandle>,
    mode: FileMode,
}

/// The bridge state: at most one bound, writable file.
#[derive(Debug, Default)]
pub struct LocalFileBridge {
    bound: Option<BoundFile>,
}

impl LocalFileBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.bound.is_some()
    }

    pub fn mode(&self) -> Option<FileMode> {
        self.bound.as_ref().map(|b| b.mode)
    }

    pub fn file_name(&self) -> Option<String> {
        self.bound.as_ref().map(|b| b.handle.name())
    }

    /// Ask for a save target, bind it as a full-document file and write `document` to it.
    /// Returns false if the user cancelled.
    pub fn create(
        &mut self,
        picker: &dyn FilePicker,
        suggested_name: &str,
        document: &Document,
    ) -> Result<bool, BridgeError> {
        let Some(handle) = picker.pick_save_target(suggested_name)? else {
            log::debug!("[mindsync.bridge] Save picker dismissed");
            return Ok(false);
        };
        let content = render(document, FileMode::Full)?;
        handle.write(&content)?;
        log::info!("[mindsync.bridge] Created local file {}", handle.name());
        self.bound = Some(BoundFile {
            handle,
            mode: FileMode::Full,
        });
        Ok(true)
    }

    /// Ask for a file to open and read it. Returns the parsed content for import,
    /// or `None` if the user cancelled.
    pub fn open(&mut self, picker: &dyn FilePicker) -> Result<Option<OpenedFile>, BridgeError> {
        match picker.pick_open_target()? {
            Some(handle) => self.open_handle(handle).map(Some),
            None => {
                log::debug!("[mindsync.bridge] Open picker dismissed");
                Ok(None)
            }
        }
    }

    /// Read and parse an already granted handle. Native files are bound for
    /// write-back with the mode found in their content; interchange files are
    /// imported without binding. Nothing changes if the content is malformed.
    pub fn open_handle(&mut self, handle: Arc<dyn FileHandle>) -> Result<OpenedFile, BridgeError> {
        let name = handle.name();
        match extension_of(&name).as_deref() {
            Some(NATIVE_EXTENSION) | Some("json") => {}
            _ => return Err(BridgeError::Unsupported(name)),
        }

        let content = handle.read()?;
        let payload = ImportPayload::parse(&content)?;

        let bound = is_editable_name(&name);
        if bound {
            log::info!(
                "[mindsync.bridge] Editing local file {} ({:?} mode)",
                name,
                payload.mode
            );
            self.bound = Some(BoundFile {
                handle,
                mode: payload.mode,
            });
        } else {
            log::info!("[mindsync.bridge] Imported read-only file {}", name);
        }
        Ok(OpenedFile { payload, bound })
    }

    /// Handle plus serialized content for a write of `document`, if a file is bound.
    pub fn prepare(
        &self,
        document: &Document,
    ) -> Result<Option<(Arc<dyn FileHandle>, String)>, serde_json::Error> {
        let Some(bound) = &self.bound else {
            return Ok(None);
        };
        let content = render(document, bound.mode)?;
        Ok(Some((bound.handle.clone(), content)))
    }

    /// Drop the handle. Returns its name if a file was bound.
    pub fn disable(&mut self) -> Option<String> {
        self.bound.take().map(|b| b.handle.name())
    }
}
