//! In-process stand-in for the document service, served by axum on 127.0.0.1:0.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};

#[derive(Default)]
struct ServerState {
    files: BTreeMap<i64, StoredFile>,
    next_id: i64,
    updates: usize,
    expired: bool,
    fail_deletes: bool,
}

struct StoredFile {
    name: String,
    data: Value,
    created_at: i64,
    updated_at: i64,
}

impl StoredFile {
    fn summary(&self, id: i64) -> Value {
        json!({
            "id": id,
            "name": self.name,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }

    fn detail(&self, id: i64) -> Value {
        let mut value = self.summary(id);
        value["data"] = self.data.clone();
        value
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub(crate) async fn spawn(self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn router(self) -> Router {
        Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/register", post(register))
            .route("/api/auth/me", get(me))
            .route("/api/auth/reset-password", post(reset_password))
            .route("/api/files", get(list_files).post(create_file))
            .route("/api/files/{id}", get(get_file).delete(delete_file))
            .route("/api/files/{id}/rename", put(rename_file))
            .route("/api/files/{id}/data", put(update_file))
            .route("/api/ping", post(|| async { StatusCode::NO_CONTENT }))
            .route("/api/health.txt", get(|| async { "ok" }))
            .route(
                "/api/broken",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/api/silent-failure",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            )
            .with_state(self)
    }

    pub(crate) fn update_count(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    pub(crate) fn file_data(&self, id: i64) -> Option<Value> {
        self.state.lock().unwrap().files.get(&id).map(|f| f.data.clone())
    }

    pub(crate) fn insert_raw(&self, name: &str, data: Value) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.files.insert(
            id,
            StoredFile {
                name: name.to_string(),
                data,
                created_at: 1,
                updated_at: 1,
            },
        );
        id
    }

    /// Every later DELETE gets 500.
    pub(crate) fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_deletes = true;
    }

    /// Every later authenticated request gets 401 "Token expired".
    pub(crate) fn expire_tokens(&self) {
        self.state.lock().unwrap().expired = true;
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<String, Response> {
        let user = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|t| t.strip_prefix("tok-"))
            .map(|u| u.to_string());
        match user {
            Some(_) if self.state.lock().unwrap().expired => Err(error(StatusCode::UNAUTHORIZED, "Token expired")),
            Some(user) => Ok(user),
            None => Err(error(StatusCode::UNAUTHORIZED, "Invalid token")),
        }
    }
}

fn error(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

fn token_for(username: &str) -> Json<Value> {
    Json(json!({ "token": format!("tok-{}", username), "username": username }))
}

async fn login(Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default();
    if body["password"] != "secret" {
        return error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }
    token_for(username).into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    let username = body["username"].as_str().unwrap_or_default();
    token_for(username).into_response()
}

async fn me(State(server): State<FakeServer>, headers: HeaderMap) -> Response {
    match server.authorize(&headers) {
        Ok(user) => Json(json!({ "id": 1, "username": user })).into_response(),
        Err(resp) => resp,
    }
}

async fn reset_password(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    if body["current_password"] != "secret" {
        return error(StatusCode::BAD_REQUEST, "Current password is incorrect");
    }
    Json(json!({ "status": "ok" })).into_response()
}

async fn list_files(State(server): State<FakeServer>, headers: HeaderMap) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    let state = server.state.lock().unwrap();
    let files: Vec<Value> = state
        .files
        .iter()
        .map(|(id, f)| f.summary(*id))
        .collect();
    Json(Value::Array(files)).into_response()
}

async fn create_file(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let id = server.insert_raw(&name, body["data"].clone());
    let state = server.state.lock().unwrap();
    Json(state.files[&id].detail(id)).into_response()
}

async fn get_file(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    let state = server.state.lock().unwrap();
    match state.files.get(&id) {
        Some(file) => Json(file.detail(id)).into_response(),
        None => error(StatusCode::NOT_FOUND, "File not found"),
    }
}

async fn rename_file(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    let mut state = server.state.lock().unwrap();
    match state.files.get_mut(&id) {
        Some(file) => {
            file.name = body["name"].as_str().unwrap_or_default().to_string();
            file.updated_at += 1;
            Json(file.summary(id)).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "File not found"),
    }
}

async fn update_file(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    let mut state = server.state.lock().unwrap();
    state.updates += 1;
    match state.files.get_mut(&id) {
        Some(file) => {
            file.data = body["data"].clone();
            file.updated_at += 1;
            Json(file.summary(id)).into_response()
        }
        None => error(StatusCode::NOT_FOUND, "File not found"),
    }
}

async fn delete_file(
    State(server): State<FakeServer>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(resp) = server.authorize(&headers) {
        return resp;
    }
    let mut state = server.state.lock().unwrap();
    if state.fail_deletes {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Storage backend unavailable");
    }
    match state.files.remove(&id) {
        Some(_) => Json(json!({ "status": "ok" })).into_response(),
        None => error(StatusCode::NOT_FOUND, "File not found"),
    }
}
