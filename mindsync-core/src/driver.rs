//! Async event loop around the coordinator.
//!
//! One task owns the coordinator and `select!`s over funnel events, the next
//! timer deadline, completions of in-flight flush jobs and shutdown. Jobs run
//! concurrently with the loop; the coordinator is never borrowed by a job.

use std::time::Duration;

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use crate::coordinator::{FlushJob, FlushOutcome, FlushTarget, SyncCoordinator};
use crate::funnel::EditorEvent;
use crate::sink::{FlushError, RemoteSink};

/// Run until the funnel closes or `shutdown` turns true. On the way out every
/// dirty destination is flushed once and the coordinator is torn down.
pub async fn run<R: RemoteSink>(
    coordinator: &mut SyncCoordinator,
    remote: &R,
    mut events: broadcast::Receiver<EditorEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let origin = Instant::now();
    let now = move || origin.elapsed().as_millis() as u64;
    let mut in_flight: FuturesUnordered<LocalBoxFuture<'_, FlushOutcome>> =
        FuturesUnordered::new();
    let mut shutdown_open = true;

    log::debug!("[mindsync.driver] Started");

    loop {
        let deadline = coordinator
            .next_deadline()
            .map(|ms| origin + Duration::from_millis(ms));

        let jobs = tokio::select! {
            received = events.recv() => match received {
                Ok(event) => coordinator.handle_event(event, now()),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[mindsync.driver] Lagged behind, {} events skipped", skipped);
                    Vec::new()
                }
                Err(RecvError::Closed) => {
                    log::debug!("[mindsync.driver] Funnel closed");
                    break;
                }
            },
            _ = sleep_until(deadline) => coordinator.poll_timers(now()),
            Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                coordinator.complete(outcome);
                Vec::new()
            }
            changed = shutdown.changed(), if shutdown_open => {
                match changed {
                    Ok(()) if *shutdown.borrow() => break,
                    Ok(()) => {}
                    Err(_) => shutdown_open = false,
                }
                Vec::new()
            }
        };

        for job in jobs {
            in_flight.push(execute(remote, job));
        }
    }

    for job in coordinator.flush_all(now()) {
        in_flight.push(execute(remote, job));
    }
    while let Some(outcome) = in_flight.next().await {
        coordinator.complete(outcome);
        // Triggers deferred behind the finished job
        for job in coordinator.poll_timers(now()) {
            in_flight.push(execute(remote, job));
        }
    }
    coordinator.teardown();
    // Dropping the receiver unsubscribes from the funnel
    drop(events);
    log::debug!("[mindsync.driver] Stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Perform one flush job. File writes go to the blocking pool.
pub fn execute<'a, R: RemoteSink>(remote: &'a R, job: FlushJob) -> LocalBoxFuture<'a, FlushOutcome> {
    async move {
        let result = match &job.target {
            FlushTarget::Remote { file_id, document } => {
                remote.update_file_data(file_id, document).await
            }
            FlushTarget::File { handle, content } => {
                let handle = handle.clone();
                let content = content.clone();
                match tokio::task::spawn_blocking(move || handle.write(&content)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(FlushError::from_io(e)),
                    Err(e) => Err(FlushError::Failed(format!("file write task failed: {}", e))),
                }
            }
        };
        job.outcome(result)
    }
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncTimings;
    use crate::engine::HeadlessEngine;
    use crate::funnel::{ChangeFunnel, Notice};
    use crate::storage::{MemoryArea, SnapshotStore};
    use crate::types::{Document, Node};
    use std::cell::RefCell;
    use std::sync::Arc;

    /// Remote that records every push.
    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<(String, Document)>>,
        fail_with: RefCell<Option<FlushError>>,
    }

    impl RemoteSink for RecordingSink {
        async fn update_file_data(&self, file_id: &str, document: &Document) -> Result<(), FlushError> {
            self.calls
                .borrow_mut()
                .push((file_id.to_string(), document.clone()));
            match self.fail_with.borrow().clone() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn coordinator(funnel: &ChangeFunnel, timings: SyncTimings) -> SyncCoordinator {
        let store = SnapshotStore::new(Arc::new(MemoryArea::new()));
        let engine = Box::new(HeadlessEngine::new(Document::example()));
        SyncCoordinator::new(store, engine, funnel.clone(), timings)
    }

    fn changed(text: &str) -> EditorEvent {
        let mut root: Node = Document::example().root;
        root.data.text = text.to_string();
        EditorEvent::DocumentChanged { root }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_push_happens_once_with_latest_tree() {
        let funnel = ChangeFunnel::new();
        let mut coordinator = coordinator(&funnel, SyncTimings::default());
        coordinator.set_authenticated(true);
        coordinator.bind_remote("42");
        let sink = RecordingSink::default();
        let events = funnel.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let script = async {
            funnel.publish(changed("draft"));
            tokio::time::sleep(Duration::from_secs(5)).await;
            funnel.publish(changed("final"));
            tokio::time::sleep(Duration::from_secs(21)).await;
            assert_eq!(sink.calls.borrow().len(), 1);
            stop_tx.send(true).unwrap();
        };
        tokio::join!(run(&mut coordinator, &sink, events, stop_rx), script);

        let calls = sink.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "42");
        assert_eq!(calls[0].1.root.data.text, "final");
        assert!(coordinator.is_torn_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_edits_never_reach_remote() {
        let funnel = ChangeFunnel::new();
        let mut coordinator = coordinator(&funnel, SyncTimings::default());
        coordinator.bind_remote("42");
        let sink = RecordingSink::default();
        let events = funnel.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let script = async {
            for i in 0..10 {
                funnel.publish(changed(&format!("edit {}", i)));
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            funnel.publish(EditorEvent::PageHidden);
            tokio::time::sleep(Duration::from_secs(30)).await;
            stop_tx.send(true).unwrap();
        };
        tokio::join!(run(&mut coordinator, &sink, events, stop_rx), script);

        assert!(sink.calls.borrow().is_empty());
        assert_eq!(
            coordinator.store().read().unwrap().root.data.text,
            "edit 9"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_changes() {
        let funnel = ChangeFunnel::new();
        let mut coordinator = coordinator(&funnel, SyncTimings::default());
        coordinator.set_authenticated(true);
        coordinator.bind_remote("7");
        let sink = RecordingSink::default();
        let events = funnel.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let script = async {
            funnel.publish(changed("unsaved"));
            tokio::time::sleep(Duration::from_secs(1)).await;
            stop_tx.send(true).unwrap();
        };
        tokio::join!(run(&mut coordinator, &sink, events, stop_rx), script);

        let calls = sink.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.root.data.text, "unsaved");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_save_pushes_latest_funnel_change() {
        let funnel = ChangeFunnel::new();
        let mut coordinator = coordinator(&funnel, SyncTimings::default());
        coordinator.set_authenticated(true);
        coordinator.bind_remote("11");
        let sink = RecordingSink::default();
        let events = funnel.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let script = async {
            funnel.publish(changed("fed line"));
            funnel.publish(EditorEvent::ManualSave);
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(sink.calls.borrow().len(), 1);
            stop_tx.send(true).unwrap();
        };
        tokio::join!(run(&mut coordinator, &sink, events, stop_rx), script);

        assert_eq!(sink.calls.borrow()[0].1.root.data.text, "fed line");
        assert_eq!(
            coordinator.store().read().unwrap().root.data.text,
            "fed line"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_is_reported_and_not_retried() {
        let funnel = ChangeFunnel::new();
        let mut notices = funnel.subscribe_notices();
        let mut coordinator = coordinator(&funnel, SyncTimings::default());
        coordinator.set_authenticated(true);
        coordinator.bind_remote("7");
        let sink = RecordingSink::default();
        *sink.fail_with.borrow_mut() = Some(FlushError::Failed("HTTP 500".into()));
        let events = funnel.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let script = async {
            funnel.publish(EditorEvent::ManualSave);
            tokio::time::sleep(Duration::from_secs(60)).await;
            // Shutdown flush retries once since the remote is still dirty
            *sink.fail_with.borrow_mut() = None;
            stop_tx.send(true).unwrap();
        };
        tokio::join!(run(&mut coordinator, &sink, events, stop_rx), script);

        assert_eq!(sink.calls.borrow().len(), 2);
        let mut seen = Vec::new();
        while let Ok(n) = notices.try_recv() {
            seen.push(n);
        }
        assert!(seen.iter().any(|n| matches!(n, Notice::RemoteFailed { .. })));
        assert!(seen.contains(&Notice::RemoteSaved { file_id: "7".into() }));
    }

    #[tokio::test]
    async fn test_local_file_written_after_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let funnel = ChangeFunnel::new();
        let timings = SyncTimings {
            file_idle_ms: 20,
            ..SyncTimings::default()
        };
        let mut coordinator = coordinator(&funnel, timings);
        let picker = crate::bridge::PathPicker::save_into(tmp.path());
        assert!(coordinator.create_local_file(&picker, "map").unwrap());

        let sink = RecordingSink::default();
        let events = funnel.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        let script = async {
            funnel.publish(changed("on disk"));
            tokio::time::sleep(Duration::from_millis(300)).await;
            stop_tx.send(true).unwrap();
        };
        tokio::join!(run(&mut coordinator, &sink, events, stop_rx), script);

        let content = std::fs::read_to_string(tmp.path().join("map.smm")).unwrap();
        let doc = Document::from_json_str(&content).unwrap();
        assert_eq!(doc.root.data.text, "on disk");
        assert!(sink.calls.borrow().is_empty());
    }
}
