use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

mod auth;
mod files;

pub use auth::{CurrentUser, TokenResponse};
pub use files::{RemoteFile, RemoteFileSummary};

/// Remote Sync Client: REST access to the document service.
///
///   POST   /api/auth/login            -> {token, username}
///   POST   /api/auth/register         -> {token, username}
///   GET    /api/auth/me               -> current user
///   POST   /api/auth/reset-password   -> change own password
///   GET    /api/files                 -> file summaries
///   POST   /api/files                 -> create file {name, data}
///   GET    /api/files/{id}            -> file with data
///   PUT    /api/files/{id}/rename     -> {name}
///   PUT    /api/files/{id}/data       -> {data}
///   DELETE /api/files/{id}
///
/// Every call is sent once. Retry policy belongs to the caller.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401: the session is gone and must be cleared, not retried.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED.as_u16()),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

enum Body {
    Json(Value),
    Text(String),
    Empty,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    /// Send one request. JSON responses are returned parsed; 204 and non-JSON
    /// bodies are success without payload.
    pub(crate) async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Option<Value>, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = self.token() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| {
            log::warn!("[mindsync.api] {} {} failed: {}", method, path, e);
            ApiError::Network(e)
        })?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        let body = if is_json {
            let value = response
                .json::<Value>()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            Body::Json(value)
        } else if status == StatusCode::NO_CONTENT {
            Body::Empty
        } else {
            Body::Text(response.text().await?)
        };

        if !status.is_success() {
            let detail = error_detail(&body);
            log::debug!("[mindsync.api] {} {} -> {}: {}", method, path, status, detail);
            if status == StatusCode::UNAUTHORIZED {
                return Err(ApiError::Unauthorized(detail));
            }
            return Err(ApiError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        log::debug!("[mindsync.api] {} {} -> {}", method, path, status);
        Ok(match body {
            Body::Json(value) => Some(value),
            Body::Text(_) | Body::Empty => None,
        })
    }

    /// Request whose response must carry a JSON payload of type `T`.
    pub(crate) async fn request_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let value = self
            .request(method, path, body)
            .await?
            .ok_or_else(|| ApiError::Decode(format!("empty response from {}", path)))?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// `detail` field of a JSON error, else the text body, else a generic message.
fn error_detail(body: &Body) -> String {
    match body {
        Body::Json(value) => match value.get("detail") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Null) | None => "Request failed".to_string(),
            Some(other) => other.to_string(),
        },
        Body::Text(text) if !text.is_empty() => text.clone(),
        _ => "Request failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;

    #[tokio::test]
    async fn test_bearer_token_attached() {
        let base = FakeServer::default().spawn().await;
        let client = ApiClient::new(&base, Duration::from_secs(5)).unwrap();

        let err = client.fetch_current_user().await.unwrap_err();
        assert!(err.is_unauthorized());

        client.set_token(Some("tok-ada".into()));
        let user = client.fetch_current_user().await.unwrap();
        assert_eq!(user.username, "ada");
    }

    #[tokio::test]
    async fn test_empty_and_text_bodies_are_payload_free() {
        let base = FakeServer::default().spawn().await;
        let client = ApiClient::new(&base, Duration::from_secs(5)).unwrap();

        let empty = client
            .request::<()>(Method::POST, "/api/ping", None)
            .await
            .unwrap();
        assert!(empty.is_none());

        let text = client
            .request::<()>(Method::GET, "/api/health.txt", None)
            .await
            .unwrap();
        assert!(text.is_none());
    }

    #[tokio::test]
    async fn test_error_detail_fallbacks() {
        let base = FakeServer::default().spawn().await;
        let client = ApiClient::new(&base, Duration::from_secs(5)).unwrap();

        match client.get_file("999").await {
            Err(ApiError::Unauthorized(detail)) => assert_eq!(detail, "Invalid token"),
            other => panic!("unexpected: {:?}", other.map(|f| f.summary.id)),
        }

        client.set_token(Some("tok-ada".into()));
        match client.get_file("999").await {
            Err(ApiError::Http { status, detail }) => {
                assert_eq!(status, 404);
                assert_eq!(detail, "File not found");
            }
            other => panic!("unexpected: {:?}", other.map(|f| f.summary.id)),
        }

        let err = client
            .request::<()>(Method::GET, "/api/broken", None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "HTTP 500: boom");

        let err = client
            .request::<()>(Method::GET, "/api/silent-failure", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP 503: Request failed");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ApiClient::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = client.list_files().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_detail_extraction() {
        let json = Body::Json(serde_json::json!({"detail": [{"msg": "too short"}]}));
        assert!(error_detail(&json).contains("too short"));
        assert_eq!(error_detail(&Body::Empty), "Request failed");
        assert_eq!(error_detail(&Body::Text(String::new())), "Request failed");
    }
}
