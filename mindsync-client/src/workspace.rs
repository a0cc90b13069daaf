/// Workspace: ties the REST client, the persisted session and the coordinator
/// together behind user-level operations (login, open, create, delete...).
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use mindsync_core::bridge::{BridgeError, PathPicker};
use mindsync_core::coordinator::SyncCoordinator;
use mindsync_core::driver;
use mindsync_core::engine::HeadlessEngine;
use mindsync_core::funnel::{ChangeFunnel, Notice};
use mindsync_core::storage::{DirArea, KeyValueArea, SnapshotStore, StorageError};
use mindsync_core::types::{Document, DocumentError};
use tokio::sync::{broadcast, watch};

use crate::api::{ApiClient, ApiError, CurrentUser, RemoteFileSummary, TokenResponse};
use crate::config::ClientConfig;
use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Import rejected: {0}")]
    ImportRejected(String),
}

pub struct Workspace {
    api: ApiClient,
    session: Session,
    coordinator: SyncCoordinator,
    origin: Instant,
}

impl Workspace {
    /// Open the workspace stored under the configured data dir.
    pub fn open(config: &ClientConfig) -> Result<Self, WorkspaceError> {
        let area: Arc<dyn KeyValueArea> = Arc::new(DirArea::new(config.data_dir())?);
        let api = ApiClient::new(&config.api_base, config.request_timeout())?;
        Ok(Self::with_parts(api, area, config))
    }

    pub fn with_parts(api: ApiClient, area: Arc<dyn KeyValueArea>, config: &ClientConfig) -> Self {
        let store = SnapshotStore::new(area.clone());
        let session = Session::new(area);
        let document = store.read_or_example();
        let engine = Box::new(HeadlessEngine::new(document.clone()));
        let mut coordinator = SyncCoordinator::with_document(
            store,
            engine,
            ChangeFunnel::new(),
            config.timings,
            document,
        );

        api.set_token(session.token());
        coordinator.set_authenticated(session.is_authenticated());
        if session.is_authenticated() {
            if let Some(file_id) = session.last_file() {
                coordinator.bind_remote(file_id);
            }
        }

        Self {
            api,
            session,
            coordinator,
            origin: Instant::now(),
        }
    }

    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn funnel(&self) -> ChangeFunnel {
        self.coordinator.funnel().clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.coordinator.funnel().subscribe_notices()
    }

    pub fn document(&self) -> &Document {
        self.coordinator.document()
    }

    fn require_auth(&self) -> Result<(), WorkspaceError> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            Err(WorkspaceError::NotAuthenticated)
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, WorkspaceError> {
        let token = self.api.login(username, password).await?;
        self.start_session(&token)?;
        Ok(token.username)
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<String, WorkspaceError> {
        let token = self.api.register(username, password).await?;
        self.start_session(&token)?;
        Ok(token.username)
    }

    fn start_session(&mut self, token: &TokenResponse) -> Result<(), WorkspaceError> {
        self.session.store(token)?;
        self.api.set_token(Some(token.token.clone()));
        self.coordinator.set_authenticated(true);
        log::info!("[mindsync.workspace] Logged in as {}", token.username);
        Ok(())
    }

    /// Drop the session. Pending remote work for the current file is cancelled.
    pub fn logout(&mut self) -> Result<(), WorkspaceError> {
        self.api.set_token(None);
        self.coordinator.logout();
        self.session.clear()?;
        log::info!("[mindsync.workspace] Logged out");
        Ok(())
    }

    /// Current user, or `None` without a session. A rejected token clears the session.
    pub async fn refresh_user(&mut self) -> Result<Option<CurrentUser>, WorkspaceError> {
        if !self.session.is_authenticated() {
            return Ok(None);
        }
        match self.api.fetch_current_user().await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_unauthorized() => {
                log::warn!("[mindsync.workspace] Session rejected: {}", e);
                self.logout()?;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), WorkspaceError> {
        self.require_auth()?;
        self.api.reset_password(current, new).await?;
        Ok(())
    }

    pub async fn list_files(&self) -> Result<Vec<RemoteFileSummary>, WorkspaceError> {
        self.require_auth()?;
        Ok(self.api.list_files().await?)
    }

    /// Load a remote file and make it the current document.
    pub async fn open_file(&mut self, file_id: &str) -> Result<(), WorkspaceError> {
        self.require_auth()?;
        let file = self.api.get_file(file_id).await?;
        let payload = file.document()?;
        let now = self.now();
        self.coordinator.open_remote(file_id, payload.document, now);
        self.session.set_last_file(Some(file_id))?;
        log::info!(
            "[mindsync.workspace] Opened remote file {} ({})",
            file_id,
            file.summary.name
        );
        Ok(())
    }

    /// Upload the current document as a new remote file and bind to it.
    pub async fn create_file(&mut self, name: &str) -> Result<RemoteFileSummary, WorkspaceError> {
        self.require_auth()?;
        let file = self.api.create_file(name, self.coordinator.document()).await?;
        let file_id = file.summary.id.to_string();
        self.coordinator.bind_remote(file_id.clone());
        self.session.set_last_file(Some(&file_id))?;
        Ok(file.summary)
    }

    pub async fn rename_file(&self, file_id: &str, name: &str) -> Result<RemoteFileSummary, WorkspaceError> {
        self.require_auth()?;
        Ok(self.api.rename_file(file_id, name).await?)
    }

    /// Delete a remote file. The current file is unbound only once the server
    /// has accepted the delete; until then its pending flush is held back.
    pub async fn delete_file(&mut self, file_id: &str) -> Result<(), WorkspaceError> {
        self.require_auth()?;
        let is_current = self.coordinator.remote_file_id() == Some(file_id);
        if is_current {
            self.coordinator.pause_remote();
        }
        if let Err(e) = self.api.delete_file(file_id).await {
            if is_current {
                let now = self.now();
                self.coordinator.resume_remote(now);
            }
            return Err(e.into());
        }
        if is_current {
            self.coordinator.unbind_remote();
            self.session.set_last_file(None)?;
        }
        Ok(())
    }

    /// Replace the current document with a JSON file's content.
    pub fn import_path(&mut self, path: &Path) -> Result<(), WorkspaceError> {
        let content = std::fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(DocumentError::from)?;
        let now = self.now();
        if !self.coordinator.set_data(value, now) {
            return Err(WorkspaceError::ImportRejected(path.display().to_string()));
        }
        Ok(())
    }

    /// Write the current document to a new `.smm` file in `dir`.
    /// Returns false if no target was picked.
    pub fn export_to(&mut self, dir: &Path, name: &str) -> Result<bool, WorkspaceError> {
        let picker = PathPicker::save_into(dir);
        Ok(self.coordinator.create_local_file(&picker, name)?)
    }

    /// Bind a local `.smm` file for write-back, importing its content.
    pub fn attach_file(&mut self, path: &Path) -> Result<bool, WorkspaceError> {
        let picker = PathPicker::open(path);
        let now = self.now();
        Ok(self.coordinator.open_local_file(&picker, now)?)
    }

    /// Manual save: snapshot, remote and local file, waiting for the writes.
    pub async fn save(&mut self) -> Result<(), WorkspaceError> {
        let now = self.now();
        let mut jobs = self.coordinator.manual_save(now);
        while !jobs.is_empty() {
            for job in jobs {
                let outcome = driver::execute(&self.api, job).await;
                self.coordinator.complete(outcome);
            }
            // Flushes deferred behind the ones just completed
            let now = self.now();
            jobs = self.coordinator.poll_timers(now);
        }
        self.sync_session()
    }

    /// Run the sync loop until `shutdown` turns true. Events arrive through `funnel()`.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), WorkspaceError> {
        let events = self.coordinator.funnel().subscribe();
        driver::run(&mut self.coordinator, &self.api, events, shutdown).await;
        self.sync_session()
    }

    /// The coordinator drops the session when the server rejects the token;
    /// mirror that in the persisted session.
    fn sync_session(&mut self) -> Result<(), WorkspaceError> {
        if self.session.is_authenticated() && !self.coordinator.is_authenticated() {
            log::warn!("[mindsync.workspace] Session expired, clearing stored token");
            self.api.set_token(None);
            self.session.clear()?;
        }
        Ok(())
    }
}
