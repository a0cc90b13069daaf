/// Local Snapshot Store.
///
/// Four independent slots in a key-value area, each a serialized JSON string:
/// document snapshot, editor config, local-only preferences, cloud-sync metadata.
/// Every successful document write stamps `local_updated_at` in the metadata slot.
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{KeyValueArea, StorageError};
use crate::timer::{Clock, SystemClock};
use crate::types::{CloudMeta, Document, DocumentPatch, EditorConfig, LocalPreferences};

pub const DATA_KEY: &str = "MINDSYNC_DATA";
pub const CONFIG_KEY: &str = "MINDSYNC_CONFIG";
pub const LOCAL_CONFIG_KEY: &str = "MINDSYNC_LOCAL_CONFIG";
pub const CLOUD_META_KEY: &str = "MINDSYNC_CLOUD_META";

pub struct SnapshotStore {
    area: Arc<dyn KeyValueArea>,
    clock: Arc<dyn Clock>,
}

impl SnapshotStore {
    pub fn new(area: Arc<dyn KeyValueArea>) -> Self {
        Self::with_clock(area, Arc::new(SystemClock))
    }

    pub fn with_clock(area: Arc<dyn KeyValueArea>, clock: Arc<dyn Clock>) -> Self {
        Self { area, clock }
    }

    /// The underlying area, shared with other local slots (session, last file).
    pub fn area(&self) -> &Arc<dyn KeyValueArea> {
        &self.area
    }

    /// Latest stored document. Absent or unreadable snapshots yield `None`.
    pub fn read(&self) -> Option<Document> {
        let raw = match self.area.get(DATA_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                log::warn!("[mindsync.storage.snapshot] Failed to read snapshot: {}", e);
                return None;
            }
        };
        match Document::from_json_str(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                log::warn!("[mindsync.storage.snapshot] Ignoring corrupt snapshot: {}", e);
                None
            }
        }
    }

    /// Stored document, or the built-in example when nothing usable is stored.
    pub fn read_or_example(&self) -> Document {
        self.read().unwrap_or_else(Document::example)
    }

    /// Shallow-merge `patch` into the stored snapshot and persist the result.
    /// Returns the document as written.
    pub fn write(&self, patch: DocumentPatch) -> Result<Document, StorageError> {
        let mut doc = self.read_or_example();
        doc.apply(patch);
        self.store_document(&doc)?;
        Ok(doc)
    }

    /// Replace the stored snapshot entirely.
    pub fn replace(&self, doc: &Document) -> Result<(), StorageError> {
        self.store_document(doc)
    }

    fn store_document(&self, doc: &Document) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(doc)?;
        self.area.set(DATA_KEY, &serialized)?;
        self.touch_local_updated_at()
    }

    fn touch_local_updated_at(&self) -> Result<(), StorageError> {
        let mut meta = self.read_cloud_meta().unwrap_or_default();
        meta.local_updated_at = Some(self.clock.now_ms());
        self.write_cloud_meta(&meta)
    }

    pub fn read_config(&self) -> Option<EditorConfig> {
        self.read_slot(CONFIG_KEY)
    }

    pub fn write_config(&self, config: &EditorConfig) -> Result<(), StorageError> {
        self.write_slot(CONFIG_KEY, config)
    }

    /// Local preferences, falling back to defaults when unset.
    pub fn read_local_config(&self) -> LocalPreferences {
        self.read_slot(LOCAL_CONFIG_KEY).unwrap_or_default()
    }

    pub fn write_local_config(&self, prefs: &LocalPreferences) -> Result<(), StorageError> {
        self.write_slot(LOCAL_CONFIG_KEY, prefs)
    }

    pub fn read_cloud_meta(&self) -> Option<CloudMeta> {
        self.read_slot(CLOUD_META_KEY)
    }

    pub fn write_cloud_meta(&self, meta: &CloudMeta) -> Result<(), StorageError> {
        self.write_slot(CLOUD_META_KEY, meta)
    }

    /// Drop the document snapshot and its metadata. Config slots are kept.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.area.remove(DATA_KEY)?;
        self.area.remove(CLOUD_META_KEY)
    }

    fn read_slot<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.area.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[mindsync.storage.snapshot] Failed to read {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("[mindsync.storage.snapshot] Ignoring unreadable {}: {}", key, e);
                None
            }
        }
    }

    fn write_slot<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(value)?;
        self.area.set(key, &serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryArea;
    use crate::timer::ManualClock;
    use crate::types::{Node, View};

    fn store() -> (SnapshotStore, Arc<MemoryArea>, Arc<ManualClock>) {
        let area = Arc::new(MemoryArea::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let store = SnapshotStore::with_clock(area.clone(), clock.clone());
        (store, area, clock)
    }

    #[test]
    fn test_empty_store_reads_none_and_example() {
        let (store, _, _) = store();
        assert!(store.read().is_none());
        assert_eq!(store.read_or_example(), Document::example());
        assert!(store.read_config().is_none());
        assert!(store.read_cloud_meta().is_none());
        assert_eq!(store.read_local_config(), LocalPreferences::default());
    }

    #[test]
    fn test_write_merges_into_example_when_empty() {
        let (store, _, _) = store();
        let written = store.write(DocumentPatch::root(Node::new("only root"))).unwrap();
        assert_eq!(written.root.data.text, "only root");
        assert_eq!(written.theme, Document::example().theme);
        assert_eq!(store.read().unwrap(), written);
    }

    #[test]
    fn test_write_is_shallow_merge() {
        let (store, _, _) = store();
        store.replace(&Document::example()).unwrap();
        store.write(DocumentPatch::view(View::at(1.0, 2.0, 1.5))).unwrap();

        let doc = store.read().unwrap();
        assert_eq!(doc.root, Document::example().root);
        assert_eq!(doc.view.unwrap().state.x, 1.0);
    }

    #[test]
    fn test_repeated_write_is_idempotent_and_stamps_each_call() {
        let (store, area, clock) = store();
        let patch = DocumentPatch::root(Node::new("same"));

        store.write(patch.clone()).unwrap();
        let first = area.get(DATA_KEY).unwrap();
        assert_eq!(store.read_cloud_meta().unwrap().local_updated_at, Some(1_000));

        clock.advance(5);
        store.write(patch).unwrap();
        let second = area.get(DATA_KEY).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.read_cloud_meta().unwrap().local_updated_at, Some(1_005));
    }

    #[test]
    fn test_cloud_meta_keeps_unknown_keys() {
        let (store, area, _) = store();
        area.set(CLOUD_META_KEY, r#"{"remote_updated_at":7}"#).unwrap();
        store.replace(&Document::example()).unwrap();

        let meta = store.read_cloud_meta().unwrap();
        assert_eq!(meta.local_updated_at, Some(1_000));
        assert_eq!(meta.extra["remote_updated_at"], 7);
    }

    #[test]
    fn test_corrupt_snapshot_falls_back() {
        let (store, area, _) = store();
        area.set(DATA_KEY, "{broken").unwrap();
        assert!(store.read().is_none());
        assert_eq!(store.read_or_example(), Document::example());
    }

    #[test]
    fn test_quota_reports_exceeded_and_keeps_previous() {
        let area = Arc::new(MemoryArea::with_quota(2_000));
        let store = SnapshotStore::with_clock(area.clone(), Arc::new(ManualClock::new(0)));
        store.write(DocumentPatch::root(Node::new("small"))).unwrap();
        let before = area.get(DATA_KEY).unwrap();

        let mut big = Node::new("big");
        big.data.text = "x".repeat(4_000);
        let err = store.write(DocumentPatch::root(big)).unwrap_err();
        assert!(err.is_exceeded());
        assert_eq!(area.get(DATA_KEY).unwrap(), before);
    }

    #[test]
    fn test_config_slots_independent() {
        let (store, _, _) = store();
        let mut config = EditorConfig::new();
        config.insert("nodeTextEditZIndex".into(), 1000.into());
        store.write_config(&config).unwrap();

        let prefs = LocalPreferences {
            is_zen_mode: true,
            ..LocalPreferences::default()
        };
        store.write_local_config(&prefs).unwrap();

        assert_eq!(store.read_config().unwrap(), config);
        assert!(store.read_local_config().is_zen_mode);
        assert!(store.read().is_none());
    }

    #[test]
    fn test_clear_keeps_config() {
        let (store, _, _) = store();
        store.replace(&Document::example()).unwrap();
        store.write_config(&EditorConfig::new()).unwrap();
        store.clear().unwrap();
        assert!(store.read().is_none());
        assert!(store.read_cloud_meta().is_none());
        assert!(store.read_config().is_some());
    }
}
