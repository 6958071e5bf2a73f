//! Background task scheduling
//!
//! Tasks are durable rows dispatched by per-queue loops. A task type maps
//! to a registered handler; a handler's body may fan out to a bounded
//! worker pool (see `worker_pool`). The unique-key rule gives at most one
//! pending-or-running task per key: re-enqueues against an active task
//! are silent no-ops, stale terminal records are cleared and replaced. A
//! partial unique index on active keys backstops the rule when two
//! enqueuers race.
//!
//! Handler errors mark the task failed; they never unwind past the
//! dispatch loop.

pub mod artwork_pass;
pub mod fingerprint_pass;
pub mod metadata_pass;
pub mod scan_pass;
pub mod schedule;
pub mod worker_pool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{Database, TaskRecord, TaskStatus};
use crate::services::notifier::{Event, Notifier};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Queue classes and how many task bodies each runs concurrently.
/// Item-level parallelism lives inside the task bodies, so these stay
/// small.
const QUEUES: &[(&str, usize)] = &[
    ("scan", 2),
    ("fingerprint", 1),
    ("artwork", 1),
    ("metadata", 1),
];

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Type tag matched against `tasks.task_type`
    fn task_type(&self) -> &'static str;

    /// Queue class this handler's tasks run on
    fn queue(&self) -> &'static str;

    async fn run(
        &self,
        queue: &TaskQueue,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()>;
}

pub struct TaskQueue {
    db: Database,
    notifier: Notifier,
    handlers: Mutex<HashMap<String, Arc<dyn TaskHandler>>>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

impl TaskQueue {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self {
            db,
            notifier,
            handlers: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type().to_string();
        debug!(task_type, queue = handler.queue(), "handler registered");
        self.handlers.lock().insert(task_type, handler);
    }

    /// Enqueue without deduplication
    pub async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        queue: &str,
    ) -> Result<TaskRecord> {
        self.db
            .tasks()
            .insert(task_type, payload, None, queue)
            .await?
            .ok_or_else(|| anyhow::anyhow!("keyless task insert returned no row"))
    }

    /// Enqueue under a unique key. Returns `None` when an identical task
    /// is already pending or running; that is the dedup working, not an
    /// error.
    pub async fn enqueue_unique(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        unique_key: &str,
        queue: &str,
    ) -> Result<Option<TaskRecord>> {
        let tasks = self.db.tasks();

        if let Some(existing) = tasks.find_active_by_key(unique_key).await? {
            debug!(
                unique_key,
                existing_id = %existing.id,
                status = existing.status,
                "enqueue dropped, key already active"
            );
            return Ok(None);
        }

        let cleared = tasks.delete_terminal_by_key(unique_key).await?;
        if cleared > 0 {
            debug!(unique_key, cleared, "cleared stale terminal records");
        }

        // The insert itself can still lose to a concurrent enqueuer that
        // passed the same pre-check; the active-key index turns that into
        // a silent skip
        let record = tasks
            .insert(task_type, payload, Some(unique_key), queue)
            .await?;
        if record.is_none() {
            debug!(unique_key, "enqueue lost the insert race, key already active");
        }
        Ok(record)
    }

    /// Request cooperative cancellation of a task. Running tasks get their
    /// token cancelled and finish at the next item boundary; pending tasks
    /// are marked cancelled directly.
    pub async fn cancel(&self, task_id: Uuid) -> Result<bool> {
        if let Some(token) = self.active.lock().get(&task_id) {
            token.cancel();
            return Ok(true);
        }

        if let Some(record) = self.db.tasks().get_by_id(task_id).await? {
            if record.status() == TaskStatus::Pending {
                self.db.tasks().mark_cancelled(task_id).await?;
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Start one dispatch loop per queue class. Returns immediately; the
    /// loops run until `shutdown`.
    pub fn run(self: &Arc<Self>) {
        for (queue, concurrency) in QUEUES.iter().copied() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.dispatch_loop(queue, concurrency).await;
            });
        }
        info!(queues = QUEUES.len(), "task dispatch started");
    }

    async fn dispatch_loop(self: Arc<Self>, queue: &'static str, concurrency: usize) {
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut tick = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }

            // Hold a permit before claiming so a claimed row is never
            // left waiting behind a full queue. Shutdown must also win
            // while all permits are taken by long task bodies.
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                acquired = Arc::clone(&permits).acquire_owned() => {
                    let Ok(permit) = acquired else { break };
                    permit
                }
            };

            let claimed = match self.db.tasks().claim_next_pending(queue).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!(queue, error = %err, "claim failed");
                    drop(permit);
                    continue;
                }
            };

            let Some(record) = claimed else {
                drop(permit);
                continue;
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.execute(record).await;
                drop(permit);
            });
        }

        debug!(queue, "dispatch loop stopped");
    }

    async fn execute(self: &Arc<Self>, record: TaskRecord) {
        let handler = self.handlers.lock().get(&record.task_type).cloned();

        let Some(handler) = handler else {
            warn!(task_type = record.task_type, task_id = %record.id, "no handler for task");
            let _ = self
                .db
                .tasks()
                .mark_failed(record.id, "no handler registered")
                .await;
            return;
        };

        let token = self.shutdown.child_token();
        self.active.lock().insert(record.id, token.clone());

        info!(task_id = %record.id, task_type = record.task_type, "task started");
        let outcome = handler.run(self, record.payload.clone(), token.clone()).await;

        self.active.lock().remove(&record.id);

        let result = match outcome {
            Ok(()) if token.is_cancelled() => {
                info!(task_id = %record.id, "task cancelled");
                self.db.tasks().mark_cancelled(record.id).await
            }
            Ok(()) => {
                info!(task_id = %record.id, "task completed");
                self.notifier.emit(Event::TaskCompleted {
                    task_id: record.id,
                    task_type: record.task_type.clone(),
                });
                self.db.tasks().mark_completed(record.id).await
            }
            Err(err) => {
                error!(task_id = %record.id, error = %err, "task failed");
                self.notifier.emit(Event::TaskFailed {
                    task_id: record.id,
                    task_type: record.task_type.clone(),
                    error: err.to_string(),
                });
                self.db.tasks().mark_failed(record.id, &err.to_string()).await
            }
        };

        if let Err(err) = result {
            error!(task_id = %record.id, error = %err, "failed to persist task outcome");
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Decode a task payload, surfacing the task type in the error
pub fn decode_payload<T: DeserializeOwned>(task_type: &str, payload: serde_json::Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|err| anyhow::anyhow!("bad {task_type} payload: {err}"))
}

/// Payload shared by all per-library passes
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct LibraryPayload {
    pub library_id: Uuid,
}
