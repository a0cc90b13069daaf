/// Timing configuration shared by the coordinator and the client config file.
use serde::{Deserialize, Serialize};

/// Quiet windows for the coordinator's timers, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTimings {
    /// Coalescing window for view changes before they reach the snapshot store.
    #[serde(default = "default_view_debounce")]
    pub view_debounce_ms: u64,
    /// Idle time after the last change before the remote file is pushed.
    #[serde(default = "default_remote_idle")]
    pub remote_idle_ms: u64,
    /// Idle time after the last change before the local file is rewritten.
    #[serde(default = "default_file_idle")]
    pub file_idle_ms: u64,
}

fn default_view_debounce() -> u64 {
    300
}

fn default_remote_idle() -> u64 {
    20_000
}

fn default_file_idle() -> u64 {
    1_000
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            view_debounce_ms: default_view_debounce(),
            remote_idle_ms: default_remote_idle(),
            file_idle_ms: default_file_idle(),
        }
    }
}
