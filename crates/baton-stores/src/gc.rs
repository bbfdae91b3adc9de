//! Garbage collection for result storage.
//!
//! Two strategies:
//! 1. TTL-based: a periodic background sweep over expired refs
//! 2. Scope hooks: the orchestrator calls `cleanup_step` /
//!    `cleanup_execution` / `cleanup_workflow` at lifecycle transitions
//!
//! Individual deletion failures are logged, never aborting the batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::result_store::ResultStore;
use crate::scope_tracker::{ScopeStats, ScopeTracker};

/// Garbage collector settings.
#[derive(Debug, Clone)]
pub struct GcConfig {
    pub ttl_sweep_interval_seconds: u64,
    /// Max deletions per sweep pass; the remainder waits for the next tick.
    pub batch_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            ttl_sweep_interval_seconds: 300,
            batch_size: 100,
        }
    }
}

#[derive(Default)]
struct GcCounters {
    ttl_deleted: AtomicU64,
    step_deleted: AtomicU64,
    execution_deleted: AtomicU64,
    workflow_deleted: AtomicU64,
}

/// GC statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GcStats {
    pub running: bool,
    pub ttl_sweep_interval_seconds: u64,
    pub ttl_deleted: u64,
    pub step_deleted: u64,
    pub execution_deleted: u64,
    pub workflow_deleted: u64,
    pub total_deleted: u64,
    pub scope_stats: ScopeStats,
}

struct SweepTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Garbage collector for result storage.
///
/// `stopped` initially; `start` spawns the periodic TTL sweep and `stop`
/// cancels it. Calling `stop` while stopped is a no-op.
pub struct GarbageCollector {
    store: Arc<ResultStore>,
    tracker: Arc<ScopeTracker>,
    config: GcConfig,
    counters: Arc<GcCounters>,
    sweep_task: Mutex<Option<SweepTask>>,
}

impl GarbageCollector {
    pub fn new(store: Arc<ResultStore>, tracker: Arc<ScopeTracker>, config: GcConfig) -> Self {
        Self {
            store,
            tracker,
            config,
            counters: Arc::new(GcCounters::default()),
            sweep_task: Mutex::new(None),
        }
    }

    /// Spawn the periodic TTL sweep task. No-op when already running.
    pub fn start(&self) {
        let Ok(mut guard) = self.sweep_task.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let store = self.store.clone();
        let counters = self.counters.clone();
        let batch_size = self.config.batch_size;
        let interval = Duration::from_secs(self.config.ttl_sweep_interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let deleted = sweep(&store, batch_size, &counters).await;
                        if deleted > 0 {
                            info!(deleted, "ttl sweep removed expired refs");
                        }
                    }
                }
            }
        });

        *guard = Some(SweepTask {
            stop: stop_tx,
            handle,
        });
        info!(
            interval_seconds = self.config.ttl_sweep_interval_seconds,
            "garbage collector started"
        );
    }

    /// Cancel the periodic task and wait for it to wind down.
    pub async fn stop(&self) {
        let task = {
            let Ok(mut guard) = self.sweep_task.lock() else {
                return;
            };
            guard.take()
        };

        if let Some(task) = task {
            let _ = task.stop.send(true);
            let _ = task.handle.await;
            info!("garbage collector stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweep_task
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Delete expired refs from the store's local cache, up to `batch_size`
    /// per pass. Returns the number deleted.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.store, self.config.batch_size, &self.counters).await
    }

    /// Delete step-scoped refs when a step completes.
    pub async fn cleanup_step(&self, execution_id: &str, step_name: &str) -> usize {
        let uris = self
            .tracker
            .get_refs_for_step_cleanup(execution_id, step_name);
        let deleted = self.delete_all(&uris).await;
        self.counters
            .step_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
        if deleted > 0 {
            debug!(step = %step_name, deleted, "step cleanup");
        }
        deleted
    }

    /// Delete execution-scoped refs when an execution completes.
    pub async fn cleanup_execution(&self, execution_id: &str) -> usize {
        let uris = self.tracker.get_refs_for_execution_cleanup(execution_id);
        let deleted = self.delete_all(&uris).await;
        self.counters
            .execution_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
        if deleted > 0 {
            info!(execution_id = %execution_id, deleted, "execution cleanup");
        }
        deleted
    }

    /// Delete refs across the whole workflow tree when it completes.
    pub async fn cleanup_workflow(&self, root_execution_id: &str) -> usize {
        let uris = self
            .tracker
            .get_refs_for_workflow_cleanup(root_execution_id);
        let deleted = self.delete_all(&uris).await;
        self.counters
            .workflow_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
        if deleted > 0 {
            info!(root = %root_execution_id, deleted, "workflow cleanup");
        }
        deleted
    }

    pub fn get_stats(&self) -> GcStats {
        let ttl_deleted = self.counters.ttl_deleted.load(Ordering::Relaxed);
        let step_deleted = self.counters.step_deleted.load(Ordering::Relaxed);
        let execution_deleted = self.counters.execution_deleted.load(Ordering::Relaxed);
        let workflow_deleted = self.counters.workflow_deleted.load(Ordering::Relaxed);
        GcStats {
            running: self.is_running(),
            ttl_sweep_interval_seconds: self.config.ttl_sweep_interval_seconds,
            ttl_deleted,
            step_deleted,
            execution_deleted,
            workflow_deleted,
            total_deleted: ttl_deleted + step_deleted + execution_deleted + workflow_deleted,
            scope_stats: self.tracker.stats(),
        }
    }

    async fn delete_all(&self, uris: &[String]) -> usize {
        let mut deleted = 0;
        for uri in uris {
            match self.store.delete(uri).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => warn!(uri = %uri, error = %err, "cleanup delete failed"),
            }
        }
        deleted
    }
}

async fn sweep(store: &ResultStore, batch_size: usize, counters: &GcCounters) -> usize {
    let mut deleted = 0;
    for result_ref in store.cached_refs() {
        if !result_ref.is_expired() {
            continue;
        }
        match store.delete(&result_ref.uri).await {
            Ok(true) => {
                deleted += 1;
                if deleted >= batch_size {
                    break;
                }
            }
            Ok(false) => {}
            Err(err) => warn!(uri = %result_ref.uri, error = %err, "expired ref delete failed"),
        }
    }
    counters
        .ttl_deleted
        .fetch_add(deleted as u64, Ordering::Relaxed);
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use baton_core::{Scope, StorageRouter, StoreTier};

    use crate::memory::MemoryBackend;
    use crate::result_store::PutRequest;

    fn storage() -> (Arc<ResultStore>, Arc<ScopeTracker>, GarbageCollector) {
        let tracker = Arc::new(ScopeTracker::new());
        let store = Arc::new(
            ResultStore::new(StorageRouter::default(), tracker.clone())
                .with_backend(StoreTier::Kv, Arc::new(MemoryBackend::new())),
        );
        let gc = GarbageCollector::new(store.clone(), tracker.clone(), GcConfig::default());
        (store, tracker, gc)
    }

    async fn expire(store: &ResultStore, uri: &str) {
        let mut refs = store.cached_refs();
        let entry = refs.iter_mut().find(|r| r.uri == uri).unwrap();
        entry.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.cache_ref(entry.clone()).unwrap();
    }

    #[test]
    fn test_sweep_deletes_only_expired_refs() {
        tokio_test::block_on(async {
            let (store, _tracker, gc) = storage();
            let a = store
                .put(PutRequest::new("e1", "a", json!(1)))
                .await
                .unwrap();
            let b = store
                .put(PutRequest::new("e1", "b", json!(2)))
                .await
                .unwrap();
            expire(&store, &a.uri).await;

            assert_eq!(gc.sweep_expired().await, 1);

            let remaining = store.list_refs("e1", None, None).unwrap();
            assert_eq!(remaining.len(), 1);
            assert_eq!(remaining[0].uri, b.uri);
        });
    }

    #[test]
    fn test_sweep_respects_batch_size() {
        tokio_test::block_on(async {
            let tracker = Arc::new(ScopeTracker::new());
            let store = Arc::new(
                ResultStore::new(StorageRouter::default(), tracker.clone())
                    .with_backend(StoreTier::Kv, Arc::new(MemoryBackend::new())),
            );
            let gc = GarbageCollector::new(
                store.clone(),
                tracker,
                GcConfig {
                    batch_size: 2,
                    ..GcConfig::default()
                },
            );

            for name in ["a", "b", "c"] {
                let r = store
                    .put(PutRequest::new("e1", name, json!(0)))
                    .await
                    .unwrap();
                expire(&store, &r.uri).await;
            }

            // First pass stops at the batch limit; the next pass drains.
            assert_eq!(gc.sweep_expired().await, 2);
            assert_eq!(gc.sweep_expired().await, 1);
            assert_eq!(gc.get_stats().ttl_deleted, 3);
        });
    }

    #[test]
    fn test_execution_cleanup_is_complete_and_idempotent() {
        tokio_test::block_on(async {
            let (store, _tracker, gc) = storage();
            store
                .put(PutRequest::new("e1", "a", json!(1)).with_scope(Scope::Execution))
                .await
                .unwrap();
            store
                .put(PutRequest::new("e1", "b", json!(2)).with_scope(Scope::Execution))
                .await
                .unwrap();

            assert_eq!(gc.cleanup_execution("e1").await, 2);
            assert!(store
                .list_refs("e1", Some(Scope::Execution), None)
                .unwrap()
                .is_empty());
            // A second cleanup deletes nothing further.
            assert_eq!(gc.cleanup_execution("e1").await, 0);
        });
    }

    #[test]
    fn test_step_cleanup_deletes_step_refs() {
        tokio_test::block_on(async {
            let (store, _tracker, gc) = storage();
            store
                .put(
                    PutRequest::new("e1", "tmp", json!(1))
                        .with_scope(Scope::Step)
                        .with_source_step("fetch"),
                )
                .await
                .unwrap();

            assert_eq!(gc.cleanup_step("e1", "fetch").await, 1);
            assert!(store.list_refs("e1", None, None).unwrap().is_empty());
        });
    }

    #[test]
    fn test_workflow_cleanup_is_transitive() {
        tokio_test::block_on(async {
            let (store, _tracker, gc) = storage();

            // Root execution with its own data.
            store
                .put(PutRequest::new("e1", "root", json!(1)))
                .await
                .unwrap();
            // Children register workflow-scoped refs against the root plus
            // their own execution-scoped data.
            store
                .put(
                    PutRequest::new("e2", "shared", json!(2))
                        .with_scope(Scope::Workflow)
                        .with_parent_execution("e1"),
                )
                .await
                .unwrap();
            store
                .put(PutRequest::new("e2", "local", json!(3)))
                .await
                .unwrap();
            store
                .put(
                    PutRequest::new("e3", "shared", json!(4))
                        .with_scope(Scope::Workflow)
                        .with_parent_execution("e1"),
                )
                .await
                .unwrap();
            store
                .put(PutRequest::new("e3", "local", json!(5)))
                .await
                .unwrap();

            assert_eq!(gc.cleanup_workflow("e1").await, 5);
            for execution_id in ["e1", "e2", "e3"] {
                assert!(store.list_refs(execution_id, None, None).unwrap().is_empty());
            }
        });
    }

    #[test]
    fn test_start_stop_state_machine() {
        tokio_test::block_on(async {
            let (_store, _tracker, gc) = storage();
            assert!(!gc.is_running());

            // Stopping while stopped is a no-op.
            gc.stop().await;
            assert!(!gc.is_running());

            gc.start();
            assert!(gc.is_running());
            // Starting twice keeps the existing task.
            gc.start();
            assert!(gc.is_running());

            gc.stop().await;
            assert!(!gc.is_running());
            assert!(!gc.get_stats().running);
        });
    }
}
