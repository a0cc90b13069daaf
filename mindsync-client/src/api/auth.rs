use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ApiClient, ApiError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CurrentUser {
    pub username: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct PasswordChange<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

impl ApiClient {
    /// Exchange credentials for a token. The token is not installed on the client.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let body = Credentials { username, password };
        self.request_json(Method::POST, "/api/auth/login", Some(&body))
            .await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<TokenResponse, ApiError> {
        let body = Credentials { username, password };
        self.request_json(Method::POST, "/api/auth/register", Some(&body))
            .await
    }

    pub async fn fetch_current_user(&self) -> Result<CurrentUser, ApiError> {
        self.request_json::<_, ()>(Method::GET, "/api/auth/me", None)
            .await
    }

    pub async fn reset_password(&self, current_password: &str, new_password: &str) -> Result<(), ApiError> {
        let body = PasswordChange {
            current_password,
            new_password,
        };
        self.request(Method::POST, "/api/auth/reset-password", Some(&body))
            .await?;
        Ok(())
    }
}
