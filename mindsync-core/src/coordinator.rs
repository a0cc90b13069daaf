/// Sync Coordinator.
///
/// Owns the in-memory document and decides when each destination is written:
/// - Snapshot: document changes are written synchronously, view changes after a quiet window
/// - Remote: idle timer or manual save, only while authenticated with a bound file id
/// - File: idle timer or manual save, only while the file bridge holds a handle
///
/// The coordinator does no I/O towards the remote or the local file itself. It
/// hands out `FlushJob`s carrying a copy of the data to write; whoever runs the
/// job reports back through `complete`. Time is a caller-supplied millisecond
/// timeline, see `crate::timer`.
use std::sync::Arc;

use serde_json::Value;

use crate::bridge::{BridgeError, FileHandle, FilePicker, LocalFileBridge};
use crate::config::SyncTimings;
use crate::echo::EchoTracker;
use crate::engine::EditorEngine;
use crate::funnel::{ChangeFunnel, EditorEvent, Notice};
use crate::sink::FlushError;
use crate::storage::{SnapshotStore, StorageError};
use crate::timer::{earliest, Timer};
use crate::types::{Document, DocumentPatch, FileMode, ImportPayload, Node, View};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Snapshot,
    Remote,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Clean,
    Dirty,
    Flushing,
}

/// Per-destination bookkeeping.
///
/// Every change bumps `generation`. A flush captures the generation it writes;
/// its success raises `confirmed` to that value. The destination is dirty while
/// `confirmed < generation`, so a change arriving mid-flight keeps it dirty even
/// after the older flush succeeds. At most one flush is in flight; a trigger
/// that arrives meanwhile is remembered in `follow_up` and served on completion.
#[derive(Debug, Default)]
struct DestinationState {
    generation: u64,
    confirmed: u64,
    in_flight: Option<u64>,
    follow_up: bool,
    /// Bumped whenever the target changes (new file, logout); outcomes of
    /// jobs issued for an older binding are ignored.
    binding: u64,
    idle: Timer,
}

impl DestinationState {
    fn mark_dirty(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn is_dirty(&self) -> bool {
        self.confirmed < self.generation
    }

    fn status(&self) -> SyncStatus {
        if !self.is_dirty() {
            SyncStatus::Clean
        } else if self.in_flight == Some(self.generation) {
            SyncStatus::Flushing
        } else {
            SyncStatus::Dirty
        }
    }

    /// True if a flush is already running; the trigger is kept for later.
    fn defer_if_busy(&mut self) -> bool {
        if self.in_flight.is_some() {
            self.follow_up = true;
            return true;
        }
        false
    }

    /// After a completion: schedule the remembered trigger if there is still
    /// something to write.
    fn take_follow_up(&mut self) {
        if std::mem::take(&mut self.follow_up) && self.is_dirty() {
            self.idle.arm_now();
        }
    }

    fn begin_flush(&mut self) -> u64 {
        self.idle.cancel();
        self.in_flight = Some(self.generation);
        self.generation
    }

    fn finish(&mut self, generation: u64, ok: bool) {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }
        if ok {
            self.confirmed = self.confirmed.max(generation);
        }
    }

    /// Forget pending work and start over against a new target.
    fn rebind(&mut self) {
        self.confirmed = self.generation;
        self.in_flight = None;
        self.follow_up = false;
        self.binding += 1;
        self.idle.cancel();
    }
}

/// What a flush job writes.
#[derive(Debug, Clone)]
pub enum FlushTarget {
    Remote { file_id: String, document: Document },
    File { handle: Arc<dyn FileHandle>, content: String },
}

/// A self-contained write of one document snapshot to one destination.
#[derive(Debug, Clone)]
pub struct FlushJob {
    pub destination: Destination,
    pub generation: u64,
    pub binding: u64,
    /// File id or file name, used in notices.
    pub label: String,
    pub target: FlushTarget,
}

impl FlushJob {
    pub fn outcome(&self, result: Result<(), FlushError>) -> FlushOutcome {
        FlushOutcome {
            destination: self.destination,
            generation: self.generation,
            binding: self.binding,
            label: self.label.clone(),
            result,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlushOutcome {
    pub destination: Destination,
    pub generation: u64,
    pub binding: u64,
    pub label: String,
    pub result: Result<(), FlushError>,
}

pub struct SyncCoordinator {
    store: SnapshotStore,
    engine: Box<dyn EditorEngine>,
    funnel: ChangeFunnel,
    bridge: LocalFileBridge,
    timings: SyncTimings,

    document: Document,
    authenticated: bool,
    file_id: Option<String>,

    snapshot: DestinationState,
    remote: DestinationState,
    file: DestinationState,

    view_debounce: Timer,
    pending_view: Option<View>,
    echo: EchoTracker,

    /// Set after a failed snapshot write; the next write replaces the whole
    /// document instead of merging into a stale stored copy.
    snapshot_stale: bool,
    storage_exceeded_reported: bool,
    torn_down: bool,
}

impl SyncCoordinator {
    /// Start from the stored snapshot, or the example document if there is none.
    pub fn new(
        store: SnapshotStore,
        engine: Box<dyn EditorEngine>,
        funnel: ChangeFunnel,
        timings: SyncTimings,
    ) -> Self {
        let document = store.read_or_example();
        Self::with_document(store, engine, funnel, timings, document)
    }

    pub fn with_document(
        store: SnapshotStore,
        mut engine: Box<dyn EditorEngine>,
        funnel: ChangeFunnel,
        timings: SyncTimings,
        document: Document,
    ) -> Self {
        engine.set_full_data(&document);
        Self {
            store,
            engine,
            funnel,
            bridge: LocalFileBridge::new(),
            timings,
            document,
            authenticated: false,
            file_id: None,
            snapshot: DestinationState::default(),
            remote: DestinationState::default(),
            file: DestinationState::default(),
            view_debounce: Timer::new(),
            pending_view: None,
            echo: EchoTracker::new(),
            snapshot_stale: false,
            storage_exceeded_reported: false,
            torn_down: false,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn bridge(&self) -> &LocalFileBridge {
        &self.bridge
    }

    pub fn funnel(&self) -> &ChangeFunnel {
        &self.funnel
    }

    pub fn status(&self, destination: Destination) -> SyncStatus {
        self.state(destination).status()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn remote_file_id(&self) -> Option<&str> {
        self.file_id.as_deref()
    }

    /// Remote writes happen only with a session and a bound file.
    pub fn is_remote_active(&self) -> bool {
        self.authenticated && self.file_id.is_some()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn state(&self, destination: Destination) -> &DestinationState {
        match destination {
            Destination::Snapshot => &self.snapshot,
            Destination::Remote => &self.remote,
            Destination::File => &self.file,
        }
    }

    fn state_mut(&mut self, destination: Destination) -> &mut DestinationState {
        match destination {
            Destination::Snapshot => &mut self.snapshot,
            Destination::Remote => &mut self.remote,
            Destination::File => &mut self.file,
        }
    }

    /// Route one funnel event. Returns the flush jobs it started.
    pub fn handle_event(&mut self, event: EditorEvent, now: u64) -> Vec<FlushJob> {
        if self.torn_down {
            log::debug!("[mindsync.coordinator] Ignoring event after teardown");
            return Vec::new();
        }
        if event.is_passive() {
            log::trace!("[mindsync.coordinator] Passive event: {:?}", event);
            return Vec::new();
        }
        match event {
            EditorEvent::DocumentChanged { root } => {
                self.on_document_changed(root, now);
                Vec::new()
            }
            EditorEvent::ViewChanged { view } => {
                self.on_view_changed(view, now);
                Vec::new()
            }
            EditorEvent::SetData { data } => {
                self.set_data(data, now);
                Vec::new()
            }
            EditorEvent::ManualSave => self.manual_save(now),
            EditorEvent::PageHidden => self.flush_all(now),
            EditorEvent::RenderComplete
            | EditorEvent::NodeActivated { .. }
            | EditorEvent::ModeChanged { .. } => Vec::new(),
        }
    }

    fn on_document_changed(&mut self, root: Node, now: u64) {
        let serialized = match serde_json::to_string(&root) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("[mindsync.coordinator] Unserializable tree dropped: {}", e);
                return;
            }
        };
        // Only a tree identical to the current one can be an echo; anything
        // else is an edit, even if it matches an earlier flush.
        if root == self.document.root && self.echo.check_and_consume(&serialized) {
            log::debug!("[mindsync.coordinator] Consumed flush echo");
            return;
        }
        if let Err(e) = root.validate_ids() {
            log::warn!("[mindsync.coordinator] Invalid tree dropped: {}", e);
            return;
        }

        self.document.root = root.clone();
        self.mark_changed(now);
        self.write_snapshot(Some(DocumentPatch::root(root)));
    }

    fn on_view_changed(&mut self, view: View, now: u64) {
        self.document.view = Some(view.clone());
        self.pending_view = Some(view);
        self.snapshot.mark_dirty();
        self.view_debounce.arm(now, self.timings.view_debounce_ms);
        self.mark_changed(now);
    }

    /// Mark Remote and File dirty and (re)arm their idle timers.
    fn mark_changed(&mut self, now: u64) {
        if self.is_remote_active() {
            self.remote.mark_dirty();
            self.remote.idle.arm(now, self.timings.remote_idle_ms);
        }
        if self.bridge.is_active() {
            self.file.mark_dirty();
            self.file.idle.arm(now, self.timings.file_idle_ms);
        }
    }

    /// Persist to the snapshot store: merge `patch`, or replace the whole
    /// document when `patch` is None.
    fn write_snapshot(&mut self, patch: Option<DocumentPatch>) {
        let generation = self.snapshot.mark_dirty();
        let result = match patch {
            Some(patch) if !self.snapshot_stale => self.store.write(patch).map(|_| ()),
            _ => self.store.replace(&self.document),
        };
        match result {
            Ok(()) => {
                self.snapshot_stale = false;
                self.storage_exceeded_reported = false;
                if !self.view_debounce.is_armed() {
                    self.snapshot.finish(generation, true);
                }
            }
            Err(e) => self.report_storage_error(e),
        }
    }

    fn report_storage_error(&mut self, e: StorageError) {
        self.snapshot_stale = true;
        if e.is_exceeded() {
            if !self.storage_exceeded_reported {
                log::warn!("[mindsync.coordinator] {}", e);
                self.storage_exceeded_reported = true;
                self.funnel.notify(Notice::StorageExceeded);
            }
        } else {
            log::error!("[mindsync.coordinator] Snapshot write failed: {}", e);
        }
    }

    fn flush_pending_view(&mut self) {
        self.view_debounce.cancel();
        if let Some(view) = self.pending_view.take() {
            self.write_snapshot(Some(DocumentPatch::view(view)));
        }
    }

    /// Fire whatever timers are due at `now`.
    pub fn poll_timers(&mut self, now: u64) -> Vec<FlushJob> {
        if self.torn_down {
            return Vec::new();
        }
        self.echo.cleanup_expired(now);

        if self.view_debounce.fire_if_due(now) {
            self.flush_pending_view();
        }

        let mut jobs = Vec::new();
        if self.remote.idle.fire_if_due(now) {
            jobs.extend(self.flush_remote(now));
        }
        if self.file.idle.fire_if_due(now) {
            jobs.extend(self.flush_file(now));
        }
        jobs
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        earliest([&self.view_debounce, &self.remote.idle, &self.file.idle])
    }

    /// Start a remote flush if remote is active and has unflushed changes.
    fn flush_remote(&mut self, now: u64) -> Option<FlushJob> {
        if !self.is_remote_active() {
            return None;
        }
        if self.remote.defer_if_busy() {
            log::debug!("[mindsync.coordinator] Remote flush still running, deferring");
            return None;
        }
        if self.remote.status() != SyncStatus::Dirty {
            log::debug!(
                "[mindsync.coordinator] Remote is {:?}, nothing to flush",
                self.remote.status()
            );
            return None;
        }
        let file_id = self.file_id.clone()?;
        let generation = self.remote.begin_flush();
        self.register_echo(now);
        log::info!(
            "[mindsync.coordinator] Flushing remote file {} (generation {})",
            file_id,
            generation
        );
        Some(FlushJob {
            destination: Destination::Remote,
            generation,
            binding: self.remote.binding,
            label: file_id.clone(),
            target: FlushTarget::Remote {
                file_id,
                document: self.document.clone(),
            },
        })
    }

    fn flush_file(&mut self, now: u64) -> Option<FlushJob> {
        if !self.bridge.is_active() {
            return None;
        }
        if self.file.defer_if_busy() {
            log::debug!("[mindsync.coordinator] Local file write still running, deferring");
            return None;
        }
        if self.file.status() != SyncStatus::Dirty {
            return None;
        }
        let (handle, content) = match self.bridge.prepare(&self.document) {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return None,
            Err(e) => {
                log::error!("[mindsync.coordinator] Cannot render local file: {}", e);
                return None;
            }
        };
        let generation = self.file.begin_flush();
        self.register_echo(now);
        let label = handle.name();
        log::debug!("[mindsync.coordinator] Flushing local file {}", label);
        Some(FlushJob {
            destination: Destination::File,
            generation,
            binding: self.file.binding,
            label,
            target: FlushTarget::File { handle, content },
        })
    }

    fn register_echo(&mut self, now: u64) {
        match serde_json::to_string(&self.document.root) {
            Ok(serialized) => self.echo.register(&serialized, now),
            Err(e) => log::warn!("[mindsync.coordinator] Cannot fingerprint tree: {}", e),
        }
    }

    /// Flush every dirty destination now: pending view included. Used when the
    /// page is hidden and on shutdown.
    pub fn flush_all(&mut self, now: u64) -> Vec<FlushJob> {
        if self.torn_down {
            return Vec::new();
        }
        self.flush_pending_view();
        let mut jobs = Vec::new();
        jobs.extend(self.flush_remote(now));
        jobs.extend(self.flush_file(now));
        jobs
    }

    /// Explicit save: rewrite the snapshot from the current document and flush
    /// Remote and File immediately, whatever their timers say. A destination
    /// with a write still running is flushed again once it completes.
    pub fn manual_save(&mut self, now: u64) -> Vec<FlushJob> {
        if self.torn_down {
            return Vec::new();
        }
        self.view_debounce.cancel();
        self.pending_view = None;
        self.write_snapshot(None);

        let mut jobs = Vec::new();
        if self.is_remote_active() {
            self.remote.mark_dirty();
            jobs.extend(self.flush_remote(now));
        } else {
            self.funnel.notify(Notice::NoRemoteFile);
        }
        if self.bridge.is_active() {
            self.file.mark_dirty();
            jobs.extend(self.flush_file(now));
        }
        jobs
    }

    /// Replace the document with raw imported data. Malformed data is rejected
    /// and nothing changes.
    pub fn set_data(&mut self, data: Value, now: u64) -> bool {
        match ImportPayload::from_value(data) {
            Ok(payload) => {
                self.import(payload, now);
                true
            }
            Err(e) => {
                log::warn!("[mindsync.coordinator] Import rejected: {}", e);
                self.funnel.notify(Notice::ImportRejected {
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Replace the document with a validated payload. A bare tree keeps the
    /// current layout and theme.
    pub fn import(&mut self, payload: ImportPayload, now: u64) {
        if self.torn_down {
            return;
        }
        let ImportPayload { document, mode } = payload;
        let mut document = match mode {
            FileMode::Full => {
                self.engine.set_full_data(&document);
                document
            }
            FileMode::Tree => {
                self.engine.set_data(&document.root);
                Document {
                    root: document.root,
                    ..self.document.clone()
                }
            }
        };
        self.engine.reset_view();
        document.view = None;

        self.document = document;
        self.register_echo(now);
        self.view_debounce.cancel();
        self.pending_view = None;
        self.write_snapshot(None);
        self.mark_changed(now);
        self.enable_rich_text_if_needed();
        log::info!(
            "[mindsync.coordinator] Imported document ({} nodes)",
            self.document.root.node_count()
        );
    }

    fn enable_rich_text_if_needed(&mut self) {
        if !self.document.root.data.rich_text {
            return;
        }
        let mut prefs = self.store.read_local_config();
        if prefs.open_node_rich_text {
            return;
        }
        prefs.open_node_rich_text = true;
        if let Err(e) = self.store.write_local_config(&prefs) {
            log::warn!("[mindsync.coordinator] Cannot store preferences: {}", e);
        }
        self.funnel.notify(Notice::RichTextEnabled);
    }

    /// Ask for a save target and bind it. Returns false if the user cancelled.
    pub fn create_local_file(
        &mut self,
        picker: &dyn FilePicker,
        suggested_name: &str,
    ) -> Result<bool, BridgeError> {
        if !self.bridge.create(picker, suggested_name, &self.document)? {
            return Ok(false);
        }
        self.file.rebind();
        if let Some(name) = self.bridge.file_name() {
            self.funnel.notify(Notice::FileSaved { name });
        }
        Ok(true)
    }

    /// Ask for a file, import its content and bind it if it is editable.
    /// Returns false if the user cancelled.
    pub fn open_local_file(
        &mut self,
        picker: &dyn FilePicker,
        now: u64,
    ) -> Result<bool, BridgeError> {
        let Some(opened) = self.bridge.open(picker)? else {
            return Ok(false);
        };
        self.import(opened.payload, now);
        if opened.bound {
            // The file already holds this content
            self.file.rebind();
        }
        Ok(true)
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        if authenticated {
            self.authenticated = true;
        } else {
            self.logout();
        }
    }

    /// Bind the current document to a remote file that already holds it.
    pub fn bind_remote(&mut self, file_id: impl Into<String>) {
        let file_id = file_id.into();
        log::info!("[mindsync.coordinator] Bound remote file {}", file_id);
        self.file_id = Some(file_id);
        self.remote.rebind();
    }

    /// Switch to a document loaded from the remote. Pending work for the
    /// previous document is dropped and the local file is released.
    pub fn open_remote(&mut self, file_id: impl Into<String>, document: Document, now: u64) {
        self.view_debounce.cancel();
        self.pending_view = None;
        if let Some(name) = self.bridge.disable() {
            log::info!("[mindsync.coordinator] Released local file {}", name);
        }
        self.file.rebind();

        self.engine.set_full_data(&document);
        self.document = document;
        self.register_echo(now);
        self.write_snapshot(None);
        self.bind_remote(file_id);
    }

    /// Forget the remote binding (active file deleted). Remote timers and
    /// dirty state are dropped.
    pub fn unbind_remote(&mut self) {
        if let Some(file_id) = self.file_id.take() {
            log::info!("[mindsync.coordinator] Unbound remote file {}", file_id);
        }
        self.remote.rebind();
    }

    /// Hold remote flushes while the bound file may be going away. The binding
    /// and dirty state are kept; see `resume_remote`.
    pub fn pause_remote(&mut self) {
        self.remote.idle.cancel();
    }

    /// Undo `pause_remote`: re-arm the idle flush if changes are pending.
    pub fn resume_remote(&mut self, now: u64) {
        if self.is_remote_active() && self.remote.is_dirty() {
            self.remote.idle.arm(now, self.timings.remote_idle_ms);
        }
    }

    pub fn logout(&mut self) {
        self.authenticated = false;
        self.unbind_remote();
    }

    /// Apply the result of a flush job. Completions never dirty anything.
    pub fn complete(&mut self, outcome: FlushOutcome) {
        let FlushOutcome {
            destination,
            generation,
            binding,
            label,
            result,
        } = outcome;

        if self.torn_down || self.state(destination).binding != binding {
            log::debug!(
                "[mindsync.coordinator] Ignoring stale {:?} outcome for {}",
                destination,
                label
            );
            return;
        }

        let ok = result.is_ok();
        let state = self.state_mut(destination);
        state.finish(generation, ok);
        state.take_follow_up();

        match (destination, result) {
            (Destination::File, Ok(())) => {
                log::debug!("[mindsync.coordinator] Local file {} saved", label);
                self.funnel.notify(Notice::FileSaved { name: label });
            }
            (_, Ok(())) => {
                log::info!("[mindsync.coordinator] Remote file {} saved", label);
                self.funnel.notify(Notice::RemoteSaved { file_id: label });
            }
            (_, Err(FlushError::SessionExpired(message))) => {
                log::warn!("[mindsync.coordinator] Session expired: {}", message);
                self.logout();
                self.funnel.notify(Notice::SessionExpired);
            }
            (Destination::File, Err(FlushError::Revoked(message))) => {
                log::warn!(
                    "[mindsync.coordinator] Lost access to {}: {}",
                    label,
                    message
                );
                if let Some(name) = self.bridge.disable() {
                    self.file.rebind();
                    self.funnel.notify(Notice::FileBridgeDisabled { name });
                }
            }
            (Destination::File, Err(e)) => {
                log::warn!("[mindsync.coordinator] Local file {} not saved: {}", label, e);
                self.funnel.notify(Notice::FileFailed {
                    name: label,
                    message: e.to_string(),
                });
            }
            (_, Err(e)) => {
                log::warn!("[mindsync.coordinator] Remote file {} not saved: {}", label, e);
                self.funnel.notify(Notice::RemoteFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Cancel every timer and stop reacting. Events and outcomes arriving
    /// afterwards are ignored; the driver drops its funnel subscription.
    pub fn teardown(&mut self) {
        self.view_debounce.cancel();
        self.pending_view = None;
        self.remote.idle.cancel();
        self.file.idle.cancel();
        self.echo.clear();
        self.torn_down = true;
        log::debug!("[mindsync.coordinator] Torn down");
    }
}
