/// Configuration for the mindsync client.
/// Reads client.json from ~/.config/mindsync/client.json (or platform equivalent).
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mindsync_core::config::SyncTimings;
use serde::{Deserialize, Serialize};

/// Overrides `api_base` when set.
pub const API_BASE_ENV: &str = "MINDSYNC_API_BASE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Where the snapshot store and session live. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub timings: SyncTimings,
}

fn default_api_base() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            data_dir: None,
            request_timeout_ms: default_request_timeout(),
            timings: SyncTimings::default(),
        }
    }
}

impl ClientConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn with_api_base_override(mut self, value: Option<String>) -> Self {
        if let Some(base) = value.filter(|v| !v.trim().is_empty()) {
            log::debug!("[mindsync.config] API base from {}: {}", API_BASE_ENV, base);
            self.api_base = base;
        }
        self
    }
}

/// Default config path: ~/.config/mindsync/client.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mindsync")
        .join("client.json")
}

/// Default data dir: ~/.local/share/mindsync
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mindsync")
}

/// Load config from path, then apply the environment override.
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_config(path: &Path) -> ClientConfig {
    read_config_file(path).with_api_base_override(std::env::var(API_BASE_ENV).ok())
}

fn read_config_file(path: &Path) -> ClientConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("[mindsync.config] Failed to parse config {}: {}", path.display(), e);
            ClientConfig::default()
        }),
        Err(_) => {
            log::info!("[mindsync.config] No config at {}, using defaults", path.display());
            ClientConfig::default()
        }
    }
}
