use mindsync_core::types::{Document, DocumentError, ImportPayload};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApiClient, ApiError};

/// File record without its data, as returned by list/rename/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileSummary {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(flatten)]
    pub summary: RemoteFileSummary,
    pub data: Value,
}

impl RemoteFile {
    /// Validated document carried by the record.
    pub fn document(&self) -> Result<ImportPayload, DocumentError> {
        ImportPayload::from_value(self.data.clone())
    }
}

#[derive(Serialize)]
struct CreateBody<'a> {
    name: &'a str,
    data: &'a Document,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct DataBody<'a> {
    data: &'a Document,
}

impl ApiClient {
    pub async fn list_files(&self) -> Result<Vec<RemoteFileSummary>, ApiError> {
        self.request_json::<_, ()>(Method::GET, "/api/files", None)
            .await
    }

    pub async fn create_file(&self, name: &str, data: &Document) -> Result<RemoteFile, ApiError> {
        let body = CreateBody { name, data };
        let file: RemoteFile = self
            .request_json(Method::POST, "/api/files", Some(&body))
            .await?;
        log::info!(
            "[mindsync.api.files] Created file {} ({})",
            file.summary.id,
            file.summary.name
        );
        Ok(file)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<RemoteFile, ApiError> {
        self.request_json::<_, ()>(Method::GET, &format!("/api/files/{}", file_id), None)
            .await
    }

    pub async fn rename_file(&self, file_id: &str, name: &str) -> Result<RemoteFileSummary, ApiError> {
        let body = RenameBody { name };
        self.request_json(
            Method::PUT,
            &format!("/api/files/{}/rename", file_id),
            Some(&body),
        )
        .await
    }

    pub async fn update_file_data(&self, file_id: &str, data: &Document) -> Result<RemoteFileSummary, ApiError> {
        let body = DataBody { data };
        self.request_json(
            Method::PUT,
            &format!("/api/files/{}/data", file_id),
            Some(&body),
        )
        .await
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), ApiError> {
        self.request::<()>(Method::DELETE, &format!("/api/files/{}", file_id), None)
            .await?;
        log::info!("[mindsync.api.files] Deleted file {}", file_id);
        Ok(())
    }
}
