/// The REST client as the coordinator's remote destination.
use mindsync_core::sink::{FlushError, RemoteSink};
use mindsync_core::types::Document;

use crate::api::{ApiClient, ApiError};

impl From<ApiError> for FlushError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unauthorized(detail) => FlushError::SessionExpired(detail),
            other => FlushError::Failed(other.to_string()),
        }
    }
}

impl RemoteSink for ApiClient {
    async fn update_file_data(&self, file_id: &str, document: &Document) -> Result<(), FlushError> {
        ApiClient::update_file_data(self, file_id, document)
            .await
            .map(|_| ())
            .map_err(FlushError::from)
    }
}
