/// Persisted authentication state and the current remote file binding.
///
/// Lives in the same key-value area as the snapshot store, under its own keys.
use std::sync::Arc;

use mindsync_core::storage::{KeyValueArea, StorageError};

use crate::api::TokenResponse;

pub const TOKEN_KEY: &str = "MINDSYNC_TOKEN";
pub const USER_KEY: &str = "MINDSYNC_USER";
pub const LAST_FILE_KEY: &str = "MINDSYNC_LAST_FILE";

pub struct Session {
    area: Arc<dyn KeyValueArea>,
}

impl Session {
    pub fn new(area: Arc<dyn KeyValueArea>) -> Self {
        Self { area }
    }

    pub fn token(&self) -> Option<String> {
        self.read(TOKEN_KEY)
    }

    pub fn username(&self) -> Option<String> {
        self.read(USER_KEY)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn store(&self, token: &TokenResponse) -> Result<(), StorageError> {
        self.write(TOKEN_KEY, Some(&token.token))?;
        self.write(USER_KEY, Some(&token.username))
    }

    /// Forget token, user and remote file binding.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.write(TOKEN_KEY, None)?;
        self.write(USER_KEY, None)?;
        self.write(LAST_FILE_KEY, None)
    }

    pub fn last_file(&self) -> Option<String> {
        self.read(LAST_FILE_KEY)
    }

    pub fn set_last_file(&self, file_id: Option<&str>) -> Result<(), StorageError> {
        self.write(LAST_FILE_KEY, file_id)
    }

    fn read(&self, key: &str) -> Option<String> {
        let raw = match self.area.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                log::warn!("[mindsync.session] Failed to read {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str::<String>(&raw) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                log::warn!("[mindsync.session] Ignoring unreadable {}: {}", key, e);
                None
            }
        }
    }

    /// `None` (or an empty value) removes the key.
    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        match value {
            Some(value) if !value.is_empty() => {
                let serialized = serde_json::to_string(value)?;
                self.area.set(key, &serialized)
            }
            _ => self.area.remove(key),
        }
    }
}
