//! Queue & Mirror Planner: durable task table, enqueue/cancel/remove,
//! and pure mirror-plan set operations.
//!
//! Grounded in `original_source/app/services/queue.py`. The underlying
//! durable-row pattern (typed row struct, string-enum columns, atomic
//! status transition) follows a conventional job-table design.

use crate::differ::{DiffEntry, DiffStatus, Differ};
use crate::error::{Side, VaultError};
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Copy,
    Move,
    Delete,
    Verify,
    DedupeScan,
    HashFile,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Copy => "copy",
            TaskType::Move => "move",
            TaskType::Delete => "delete",
            TaskType::Verify => "verify",
            TaskType::DedupeScan => "dedupe_scan",
            TaskType::HashFile => "hash_file",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "copy" => Some(TaskType::Copy),
            "move" => Some(TaskType::Move),
            "delete" => Some(TaskType::Delete),
            "verify" => Some(TaskType::Verify),
            "dedupe_scan" => Some(TaskType::DedupeScan),
            "hash_file" => Some(TaskType::HashFile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueTask {
    pub id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub src_side: Option<String>,
    pub src_relpath: Option<String>,
    pub dst_side: Option<String>,
    pub dst_relpath: Option<String>,
    pub size_bytes: Option<i64>,
    pub bytes_transferred: i64,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub verify_folder: Option<String>,
}

type TaskRow = (
    i64,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn row_to_task(row: TaskRow) -> QueueTask {
    QueueTask {
        id: row.0,
        task_type: TaskType::from_str(&row.1).expect("valid task_type"),
        status: TaskStatus::from_str(&row.2).expect("valid status"),
        src_side: row.3,
        src_relpath: row.4,
        dst_side: row.5,
        dst_relpath: row.6,
        size_bytes: row.7,
        bytes_transferred: row.8,
        error_message: row.9,
        retry_count: row.10,
        created_at: row.11,
        started_at: row.12,
        completed_at: row.13,
        verify_folder: row.14,
    }
}

const TASK_COLUMNS: &str = "id, task_type, status, src_side, src_relpath, dst_side, dst_relpath, \
    size_bytes, bytes_transferred, error_message, retry_count, created_at, started_at, completed_at, verify_folder";

/// Durable task queue. `paused` is a process-wide flag the Worker consults
/// each cycle; it is not persisted, so a restart always resumes running.
#[derive(Clone)]
pub struct Queue {
    store: Store,
    paused: Arc<AtomicBool>,
}

impl Queue {
    pub fn new(store: Store) -> Self {
        Queue {
            store,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn enqueue_copy(
        &self,
        src_side: Side,
        src_relpath: &str,
        dst_side: Side,
        dst_relpath: &str,
    ) -> Result<i64> {
        if src_side == dst_side {
            anyhow::bail!(VaultError::Validation("copy requires different sides".into()));
        }
        self.insert(
            TaskType::Copy,
            Some(src_side),
            Some(src_relpath),
            Some(dst_side),
            Some(dst_relpath),
            None,
        )
        .await
    }

    /// Enqueue a move across every side in `sides`. Preflight per side: reject
    /// if the source is missing, the destination exists, or the paths are
    /// equal. Either all succeed or none are enqueued.
    pub async fn enqueue_move(&self, sides: &[Side], src_relpath: &str, dst_relpath: &str) -> Result<Vec<i64>> {
        if src_relpath == dst_relpath {
            anyhow::bail!(VaultError::Validation("move source and destination are identical".into()));
        }
        for &side in sides {
            let exists_src = self.file_exists(side, src_relpath).await?;
            if !exists_src {
                anyhow::bail!(VaultError::FileMissing(format!("{side}:{src_relpath}")));
            }
            let exists_dst = self.file_exists(side, dst_relpath).await?;
            if exists_dst {
                anyhow::bail!(VaultError::FileExists(format!("{side}:{dst_relpath}")));
            }
        }

        let mut ids = Vec::with_capacity(sides.len());
        for &side in sides {
            let id = self
                .insert(TaskType::Move, Some(side), Some(src_relpath), Some(side), Some(dst_relpath), None)
                .await?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn file_exists(&self, side: Side, relpath: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM file_index WHERE side = ?1 AND relpath = ?2")
                .bind(side.as_str())
                .bind(relpath)
                .fetch_optional(self.store.pool())
                .await?;
        Ok(row.is_some())
    }

    /// Enqueue a delete. When `respect_policy` is set, `allow_delete` must be
    /// honored by the caller *before* calling this (policy denial is a
    /// synchronous rejection, not a queued failure); dedupe
    /// execution bypasses this by calling with `respect_policy = false`.
    pub async fn enqueue_delete(&self, side: Side, relpath: &str, respect_policy: bool, allow_delete: bool) -> Result<i64> {
        if respect_policy && !allow_delete {
            anyhow::bail!(VaultError::PolicyDenied(format!("delete not allowed on {side}")));
        }
        self.insert(TaskType::Delete, None, None, Some(side), Some(relpath), None).await
    }

    /// Coalesced: refuses to enqueue a duplicate verify for the same target
    /// while one is pending or running.
    pub async fn enqueue_verify(&self, folder: &str) -> Result<i64> {
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM queue WHERE task_type = 'verify' AND status IN ('pending', 'running') \
             AND verify_folder = ?1",
        )
        .bind(folder)
        .fetch_optional(self.store.pool())
        .await?;
        if let Some((id,)) = existing {
            return Ok(id);
        }

        let now = Utc::now().to_rfc3339();
        let id: (i64,) = sqlx::query_as(
            "INSERT INTO queue (task_type, status, verify_folder, created_at) \
             VALUES ('verify', 'pending', ?1, ?2) RETURNING id",
        )
        .bind(folder)
        .bind(&now)
        .fetch_one(self.store.pool())
        .await?;
        Ok(id.0)
    }

    /// Coalesced identically to `enqueue_verify`, keyed on `(side, relpath)`.
    pub async fn enqueue_hash_file(&self, side: Side, relpath: &str) -> Result<i64> {
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM queue WHERE task_type = 'hash_file' AND status IN ('pending', 'running') \
             AND dst_side = ?1 AND dst_relpath = ?2",
        )
        .bind(side.as_str())
        .bind(relpath)
        .fetch_optional(self.store.pool())
        .await?;
        if let Some((id,)) = existing {
            return Ok(id);
        }
        self.insert(TaskType::HashFile, None, None, Some(side), Some(relpath), None).await
    }

    pub async fn enqueue_dedupe_scan(&self, side: Side, mode: &str, min_size: i64) -> Result<i64> {
        // `mode`/`min_size` are carried in `verify_folder` as a tiny encoded
        // payload ("mode:min_size") rather than adding bespoke columns for a
        // single task type — the row is consumed only by the dedupe_scan
        // dispatch in `worker`.
        let payload = format!("{mode}:{min_size}");
        self.insert(TaskType::DedupeScan, Some(side), None, None, None, Some(&payload)).await
    }

    async fn insert(
        &self,
        task_type: TaskType,
        src_side: Option<Side>,
        src_relpath: Option<&str>,
        dst_side: Option<Side>,
        dst_relpath: Option<&str>,
        verify_folder: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let id: (i64,) = sqlx::query_as(
            "INSERT INTO queue (task_type, status, src_side, src_relpath, dst_side, dst_relpath, \
             verify_folder, created_at) VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, ?7) RETURNING id",
        )
        .bind(task_type.as_str())
        .bind(src_side.map(|s| s.as_str()))
        .bind(src_relpath)
        .bind(dst_side.map(|s| s.as_str()))
        .bind(dst_relpath)
        .bind(verify_folder)
        .bind(&now)
        .fetch_one(self.store.pool())
        .await?;
        Ok(id.0)
    }

    /// Only `pending|running` rows transition to `cancelled`.
    pub async fn cancel(&self, id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE queue SET status = 'cancelled', completed_at = ?1 \
             WHERE id = ?2 AND status IN ('pending', 'running')",
        )
        .bind(&now)
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Only `pending` rows may be removed outright.
    pub async fn remove(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue WHERE id = ?1 AND status = 'pending'")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM queue WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(row_to_task))
    }

    pub async fn list(&self) -> Result<Vec<QueueTask>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM queue ORDER BY id DESC"))
                .fetch_all(self.store.pool())
                .await?;
        Ok(rows.into_iter().map(row_to_task).collect())
    }

    pub async fn oldest_pending(&self) -> Result<Option<QueueTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM queue WHERE status = 'pending' ORDER BY id ASC LIMIT 1"
        ))
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(row_to_task))
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }
}

/// A planned mirror operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MirrorPlan {
    pub copies: Vec<String>,
    pub deletes: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Pure set operation over two folder-scoped `DiffEntry` lists, exposed as a
/// function on in-memory views so it can be property-tested without a store.
/// `src_folder`/`dst_folder` are stripped from each
/// side's relpaths before the relative paths are compared.
pub fn plan_mirror(
    src_side: Side,
    src_folder: &str,
    src_entries: &[DiffEntry],
    dst_side: Side,
    dst_folder: &str,
    dst_entries: &[DiffEntry],
) -> MirrorPlan {
    let strip = |folder: &str, relpath: &str| -> Option<String> {
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            Some(relpath.to_string())
        } else {
            relpath.strip_prefix(folder).and_then(|r| r.strip_prefix('/')).map(|r| r.to_string())
        }
    };

    let present = |side: Side, e: &DiffEntry| -> bool {
        match side {
            Side::Local => e.local_size.is_some(),
            Side::Lake => e.lake_size.is_some(),
        }
    };
    let size_of = |side: Side, e: &DiffEntry| -> Option<i64> {
        match side {
            Side::Local => e.local_size,
            Side::Lake => e.lake_size,
        }
    };
    let hash_of = |side: Side, e: &DiffEntry| -> Option<String> {
        match side {
            Side::Local => e.local_hash.clone(),
            Side::Lake => e.lake_hash.clone(),
        }
    };

    let mut src_map = std::collections::HashMap::new();
    for e in src_entries {
        if present(src_side, e) {
            if let Some(rel) = strip(src_folder, &e.relpath) {
                src_map.insert(rel, e);
            }
        }
    }
    let mut dst_map = std::collections::HashMap::new();
    for e in dst_entries {
        if present(dst_side, e) {
            if let Some(rel) = strip(dst_folder, &e.relpath) {
                dst_map.insert(rel, e);
            }
        }
    }

    let mut copies = Vec::new();
    let mut deletes = Vec::new();
    let mut conflicts = Vec::new();

    for (rel, src_e) in &src_map {
        match dst_map.get(rel) {
            None => copies.push(rel.clone()),
            Some(dst_e) => {
                let same = match (hash_of(src_side, src_e), hash_of(dst_side, dst_e)) {
                    (Some(a), Some(b)) => a == b,
                    _ => size_of(src_side, src_e) == size_of(dst_side, dst_e),
                };
                if !same {
                    conflicts.push(rel.clone());
                }
            }
        }
    }
    for rel in dst_map.keys() {
        if !src_map.contains_key(rel) {
            deletes.push(rel.clone());
        }
    }

    copies.sort();
    deletes.sort();
    conflicts.sort();
    MirrorPlan { copies, deletes, conflicts }
}

/// Compute a mirror plan by reading both folders' diff entries from the
/// store, then enqueue copies and deletes for it.
pub struct MirrorPlanner<'a> {
    differ: &'a Differ,
    queue: &'a Queue,
}

impl<'a> MirrorPlanner<'a> {
    pub fn new(differ: &'a Differ, queue: &'a Queue) -> Self {
        MirrorPlanner { differ, queue }
    }

    pub async fn plan(
        &self,
        src_side: Side,
        src_folder: &str,
        dst_side: Side,
        dst_folder: &str,
    ) -> Result<MirrorPlan> {
        let src_entries = self.differ.compute_diff(src_folder, "").await?;
        let dst_entries = self.differ.compute_diff(dst_folder, "").await?;
        Ok(plan_mirror(src_side, src_folder, &src_entries, dst_side, dst_folder, &dst_entries))
    }

    pub async fn execute(
        &self,
        src_side: Side,
        src_folder: &str,
        dst_side: Side,
        dst_folder: &str,
        allow_delete_on_dst: bool,
    ) -> Result<MirrorPlan> {
        let plan = self.plan(src_side, src_folder, dst_side, dst_folder).await?;
        let join = |folder: &str, rel: &str| -> String {
            let folder = folder.trim_matches('/');
            if folder.is_empty() {
                rel.to_string()
            } else {
                format!("{folder}/{rel}")
            }
        };
        for rel in &plan.copies {
            self.queue
                .enqueue_copy(src_side, &join(src_folder, rel), dst_side, &join(dst_folder, rel))
                .await?;
        }
        for rel in &plan.deletes {
            self.queue
                .enqueue_delete(dst_side, &join(dst_folder, rel), true, allow_delete_on_dst)
                .await?;
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_copy_rejects_same_side() {
        let store = Store::open_memory().await.unwrap();
        let queue = Queue::new(store);
        let err = queue.enqueue_copy(Side::Local, "a.bin", Side::Local, "b.bin").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn enqueue_move_preflight_rejects_missing_source() {
        let store = Store::open_memory().await.unwrap();
        let queue = Queue::new(store);
        let err = queue.enqueue_move(&[Side::Local], "missing.bin", "dst.bin").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn enqueue_move_preflight_rejects_existing_destination() {
        let store = Store::open_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', 'a.bin', 1, 1, '2024')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', 'b.bin', 1, 1, '2024')",
        )
        .execute(store.pool())
        .await
        .unwrap();
        let queue = Queue::new(store);
        let err = queue.enqueue_move(&[Side::Local], "a.bin", "b.bin").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn enqueue_verify_is_coalesced() {
        let store = Store::open_memory().await.unwrap();
        let queue = Queue::new(store);
        let id1 = queue.enqueue_verify("models").await.unwrap();
        let id2 = queue.enqueue_verify("models").await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(queue.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancel_only_affects_pending_or_running() {
        let store = Store::open_memory().await.unwrap();
        let queue = Queue::new(store);
        let id = queue.enqueue_delete(Side::Local, "x.bin", false, false).await.unwrap();
        assert!(queue.cancel(id).await.unwrap());
        assert!(!queue.cancel(id).await.unwrap());
    }

    #[tokio::test]
    async fn remove_only_affects_pending() {
        let store = Store::open_memory().await.unwrap();
        let queue = Queue::new(store);
        let id = queue.enqueue_delete(Side::Local, "x.bin", false, false).await.unwrap();
        queue.cancel(id).await.unwrap();
        assert!(!queue.remove(id).await.unwrap());
    }

    fn entry(relpath: &str, local_size: Option<i64>, local_hash: Option<&str>, lake_size: Option<i64>, lake_hash: Option<&str>) -> DiffEntry {
        DiffEntry {
            relpath: relpath.to_string(),
            status: DiffStatus::Same,
            local_size,
            local_mtime_ns: local_size.map(|_| 1),
            local_hash: local_hash.map(|s| s.to_string()),
            lake_size,
            lake_mtime_ns: lake_size.map(|_| 1),
            lake_hash: lake_hash.map(|s| s.to_string()),
        }
    }

    #[test]
    fn plan_mirror_empty_when_sets_identical() {
        let entries = vec![entry("a.bin", Some(10), Some("h1"), Some(10), Some("h1"))];
        let plan = plan_mirror(Side::Local, "", &entries, Side::Lake, "", &entries);
        assert!(plan.copies.is_empty());
        assert!(plan.deletes.is_empty());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn plan_mirror_detects_copies_deletes_conflicts() {
        let src = vec![
            entry("only_src.bin", Some(5), None, None, None),
            entry("conflict.bin", Some(5), Some("h1"), Some(5), Some("h1")),
        ];
        let dst = vec![
            entry("only_dst.bin", None, None, Some(7), None),
            entry("conflict.bin", Some(5), Some("h2"), Some(5), Some("h2")),
        ];
        let plan = plan_mirror(Side::Local, "", &src, Side::Lake, "", &dst);
        assert_eq!(plan.copies, vec!["only_src.bin".to_string()]);
        assert_eq!(plan.deletes, vec!["only_dst.bin".to_string()]);
        assert_eq!(plan.conflicts, vec!["conflict.bin".to_string()]);
    }
}
