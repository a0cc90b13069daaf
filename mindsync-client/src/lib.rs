//! Mind-map sync client: REST access to the document service, a persisted
//! session, and a workspace that drives the core coordinator.

pub mod api;
pub mod config;
pub mod logging;
pub mod session;
pub mod sink;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, ApiError};
pub use config::ClientConfig;
pub use workspace::{Workspace, WorkspaceError};
