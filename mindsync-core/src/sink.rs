/// Outbound seams of the coordinator: where flushed documents go and how
/// failures come back.
use std::future::Future;

use crate::types::Document;

/// Failure of a single flush, as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlushError {
    /// The remote rejected the credentials; the session must be cleared, not retried.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Flush failed: {0}")]
    Failed(String),

    /// The local file capability is gone (permission revoked, file removed).
    #[error("File access revoked: {0}")]
    Revoked(String),
}

impl FlushError {
    pub fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound => {
                FlushError::Revoked(e.to_string())
            }
            _ => FlushError::Failed(e.to_string()),
        }
    }
}

/// Remote destination for document flushes. Implementations fire exactly one
/// request per call; retry policy belongs to the coordinator.
pub trait RemoteSink {
    fn update_file_data(
        &self,
        file_id: &str,
        document: &Document,
    ) -> impl Future<Output = Result<(), FlushError>>;
}

/// Sink for sessions that never reach a server.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineSink;

impl RemoteSink for OfflineSink {
    async fn update_file_data(&self, file_id: &str, _document: &Document) -> Result<(), FlushError> {
        Err(FlushError::Failed(format!(
            "offline, cannot push file {}",
            file_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_classified() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(FlushError::from_io(denied), FlushError::Revoked(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(matches!(FlushError::from_io(other), FlushError::Failed(_)));
    }

    #[tokio::test]
    async fn test_offline_sink_always_fails() {
        let result = OfflineSink
            .update_file_data("1", &Document::example())
            .await;
        assert!(matches!(result, Err(FlushError::Failed(_))));
    }
}
