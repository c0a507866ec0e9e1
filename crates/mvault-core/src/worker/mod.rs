//! Worker: single-writer executor of queue tasks.
//!
//! Grounded in `original_source/app/services/worker.py`'s main loop, cast
//! into the poll/dispatch/report shape of a conventional scheduler run loop,
//! generalized here from "download jobs" to the six queue task types. The
//! Worker is the sole filesystem mutator for the two roots: exactly one
//! task is ever `running` at a time.

mod copy;
mod dedupe_scan;
mod delete;
mod hash_file;
mod mv;
mod verify;

use crate::dedupe::Dedupe;
use crate::error::Side;
use crate::events::{Bus, Topic};
use crate::hasher::Hasher;
use crate::queue::{Queue, TaskType};
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone)]
pub struct WorkerRoots {
    pub local: PathBuf,
    pub lake: PathBuf,
}

impl WorkerRoots {
    pub fn of(&self, side: Side) -> &Path {
        match side {
            Side::Local => &self.local,
            Side::Lake => &self.lake,
        }
    }
}

/// Shared handles every per-type dispatch function needs. Cheap to clone;
/// every field is itself a cloneable handle.
#[derive(Clone)]
pub struct Ctx {
    pub store: Store,
    pub queue: Queue,
    pub bus: Bus,
    pub hasher: Hasher,
    pub dedupe: Dedupe,
    pub roots: WorkerRoots,
    pub retry_count: u32,
}

pub struct Worker {
    ctx: Ctx,
}

impl Worker {
    pub fn new(ctx: Ctx) -> Self {
        Worker { ctx }
    }

    /// Run until `shutdown` is signalled. Orphan `running` rows were already
    /// reset to `pending` by `Store::open` at startup.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            if self.ctx.queue.is_paused() {
                if tokio::time::timeout(Duration::from_secs(2), shutdown.changed()).await.is_ok() {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                continue;
            }

            let task = match self.ctx.queue.oldest_pending().await {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(error = %err, "failed to poll queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let task = match task {
                Some(t) => t,
                None => {
                    if tokio::time::timeout(Duration::from_secs(1), shutdown.changed()).await.is_ok() {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    continue;
                }
            };

            self.run_one(task.id, task.task_type).await;
        }
    }

    async fn run_one(&self, task_id: i64, task_type: TaskType) {
        let now = Utc::now().to_rfc3339();
        if let Err(err) = sqlx::query("UPDATE queue SET status = 'running', started_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(task_id)
            .execute(self.ctx.store.pool())
            .await
        {
            tracing::error!(error = %err, task_id, "failed to mark task running");
            return;
        }
        self.ctx.bus.publish(Topic::TaskStarted, serde_json::json!({"task_id": task_id, "task_type": task_type}));

        let task = match self.ctx.queue.get(task_id).await {
            Ok(Some(t)) => t,
            _ => return,
        };

        let outcome = match task_type {
            TaskType::Copy => copy::run(&self.ctx, &task).await,
            TaskType::Move => mv::run(&self.ctx, &task).await,
            TaskType::Delete => delete::run(&self.ctx, &task).await,
            TaskType::Verify => verify::run(&self.ctx, &task).await,
            TaskType::HashFile => hash_file::run(&self.ctx, &task).await,
            TaskType::DedupeScan => dedupe_scan::run(&self.ctx, &task).await,
        };

        let now = Utc::now().to_rfc3339();
        match outcome {
            Ok(result) => {
                let _ = sqlx::query(
                    "UPDATE queue SET status = 'completed', completed_at = ?1 WHERE id = ?2 AND status = 'running'",
                )
                .bind(&now)
                .bind(task_id)
                .execute(self.ctx.store.pool())
                .await;
                self.ctx.bus.publish(
                    Topic::TaskComplete,
                    serde_json::json!({"task_id": task_id, "status": "completed", "result": result}),
                );
            }
            Err(TaskOutcome::Cancelled) => {
                self.ctx.bus.publish(
                    Topic::TaskComplete,
                    serde_json::json!({"task_id": task_id, "status": "cancelled"}),
                );
            }
            Err(TaskOutcome::Failed(message)) => {
                let _ = sqlx::query(
                    "UPDATE queue SET status = 'failed', completed_at = ?1, error_message = ?2, \
                     retry_count = retry_count + 1 WHERE id = ?3 AND status = 'running'",
                )
                .bind(&now)
                .bind(&message)
                .bind(task_id)
                .execute(self.ctx.store.pool())
                .await;
                self.ctx.bus.publish(
                    Topic::TaskComplete,
                    serde_json::json!({"task_id": task_id, "status": "failed", "error": message}),
                );
            }
        }
    }
}

/// The two non-success terminal states a dispatch function can report.
/// Anything else (timeouts, IO errors, policy violations) is mapped to
/// `Failed` at the dispatch boundary — the Worker never panics or dies on a
/// single task's error.
pub enum TaskOutcome {
    Cancelled,
    Failed(String),
}

impl From<anyhow::Error> for TaskOutcome {
    fn from(err: anyhow::Error) -> Self {
        TaskOutcome::Failed(format!("{err:#}"))
    }
}

impl From<crate::error::VaultError> for TaskOutcome {
    fn from(err: crate::error::VaultError) -> Self {
        TaskOutcome::Failed(err.to_string())
    }
}

pub(crate) type DispatchResult = std::result::Result<serde_json::Value, TaskOutcome>;

/// Poll the task's current status; used by long-running dispatch functions
/// between chunks to honor a UI-issued cancel.
pub(crate) async fn is_cancelled(store: &Store, task_id: i64) -> bool {
    let row: Option<(String,)> = sqlx::query_as("SELECT status FROM queue WHERE id = ?1")
        .bind(task_id)
        .fetch_optional(store.pool())
        .await
        .ok()
        .flatten();
    matches!(row, Some((status,)) if status == "cancelled")
}

pub(crate) async fn persist_progress(store: &Store, task_id: i64, bytes_transferred: i64) -> Result<()> {
    sqlx::query("UPDATE queue SET bytes_transferred = ?1 WHERE id = ?2")
        .bind(bytes_transferred)
        .bind(task_id)
        .execute(store.pool())
        .await?;
    Ok(())
}
