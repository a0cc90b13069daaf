pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod driver;
pub mod echo;
pub mod engine;
pub mod funnel;
pub mod sink;
pub mod storage;
pub mod timer;
pub mod types;

pub use coordinator::{Destination, SyncCoordinator, SyncStatus};
pub use funnel::{ChangeFunnel, EditorEvent, Notice};
pub use types::Document;
