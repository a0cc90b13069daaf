pub mod local;
pub mod snapshot;

pub use local::{DirArea, MemoryArea};
pub use snapshot::SnapshotStore;

/// Abstract persistent key-value area backing the snapshot store.
/// Implementations: MemoryArea (tests, ephemeral sessions), DirArea (one file per key).
pub trait KeyValueArea: Send + Sync {
    /// Read a key. `Ok(None)` means "not yet initialized", never an error.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store a value under a key, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing {key}: {needed} bytes over a {quota} byte limit")]
    Exceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// True for the distinguished "storage exceeded" condition.
    pub fn is_exceeded(&self) -> bool {
        matches!(self, StorageError::Exceeded { .. })
    }
}
