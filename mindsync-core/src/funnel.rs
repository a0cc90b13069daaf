/// Change Funnel: typed publish/subscribe bus between the editing engine and
/// the persistence backends.
///
/// Two channels:
///   `EditorEvent`: engine notifications and user commands, consumed by the coordinator.
///   `Notice`: outcomes reported by the coordinator, consumed by the UI layer.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::{Node, View};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    Readonly,
    Edit,
}

/// Messages flowing into the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EditorEvent {
    /// Full tree snapshot after any edit.
    DocumentChanged { root: Node },
    /// Pan/zoom moved.
    ViewChanged { view: View },
    RenderComplete,
    NodeActivated { uids: Vec<String> },
    ModeChanged { mode: EditorMode },
    /// Replace the whole document (import). Raw JSON, validated before use.
    SetData { data: Value },
    ManualSave,
    /// Page hidden / about to unload: flush what can be flushed.
    PageHidden,
}

impl EditorEvent {
    /// Events that never touch persisted state.
    pub fn is_passive(&self) -> bool {
        matches!(
            self,
            EditorEvent::RenderComplete
                | EditorEvent::NodeActivated { .. }
                | EditorEvent::ModeChanged { .. }
        )
    }
}

/// Outcomes reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notice {
    StorageExceeded,
    RemoteSaved { file_id: String },
    RemoteFailed { message: String },
    SessionExpired,
    FileSaved { name: String },
    FileFailed { name: String, message: String },
    FileBridgeDisabled { name: String },
    ImportRejected { message: String },
    /// Manual save requested while no remote file is bound.
    NoRemoteFile,
    /// An import carried rich text, so rich-text editing was switched on.
    RichTextEnabled,
}

/// Process-wide bus. Cloning shares the same channels.
#[derive(Clone)]
pub struct ChangeFunnel {
    events: broadcast::Sender<EditorEvent>,
    notices: broadcast::Sender<Notice>,
}

impl Default for ChangeFunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFunnel {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (notices, _) = broadcast::channel(capacity);
        Self { events, notices }
    }

    pub fn publish(&self, event: EditorEvent) {
        if let Err(e) = self.events.send(event) {
            log::warn!("[mindsync.funnel.send] No event subscribers: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        log::debug!("[mindsync.funnel.notice] {:?}", notice);
        // Nobody listening for notices is normal in headless use
        let _ = self.notices.send(notice);
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}
