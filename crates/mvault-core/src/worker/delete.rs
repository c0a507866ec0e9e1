//! `delete` task dispatch: unlink target; missing file is idempotent
//! success.

use super::{Ctx, DispatchResult, TaskOutcome};
use crate::error::Side;
use crate::queue::QueueTask;

pub async fn run(ctx: &Ctx, task: &QueueTask) -> DispatchResult {
    let side = Side::from_str(task.dst_side.as_deref().unwrap_or_default())
        .ok_or_else(|| TaskOutcome::Failed("delete task missing side".into()))?;
    let relpath = task.dst_relpath.clone().ok_or_else(|| TaskOutcome::Failed("delete task missing relpath".into()))?;

    let path = ctx.roots.of(side).join(&relpath);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(TaskOutcome::Failed(err.to_string())),
    }

    sqlx::query("DELETE FROM file_index WHERE side = ?1 AND relpath = ?2")
        .bind(side.as_str())
        .bind(&relpath)
        .execute(ctx.store.pool())
        .await
        .map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    Ok(serde_json::json!({"relpath": relpath}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::Dedupe;
    use crate::hasher::Hasher;
    use crate::queue::Queue;
    use crate::store::Store;
    use crate::worker::WorkerRoots;

    async fn make_ctx(root: &std::path::Path) -> Ctx {
        let store = Store::open_memory().await.unwrap();
        let queue = Queue::new(store.clone());
        let hasher = Hasher::new(store.clone(), 1);
        let dedupe = Dedupe::new(store.clone(), hasher.clone());
        Ctx {
            store,
            queue,
            bus: crate::events::Bus::new(),
            hasher,
            dedupe,
            roots: WorkerRoots { local: root.to_path_buf(), lake: root.to_path_buf() },
            retry_count: 3,
        }
    }

    #[tokio::test]
    async fn delete_of_missing_file_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = make_ctx(dir.path()).await;
        let id = ctx.queue.enqueue_delete(Side::Local, "missing.bin", false, false).await.unwrap();
        let task = ctx.queue.get(id).await.unwrap().unwrap();
        assert!(run(&ctx, &task).await.is_ok());
    }

    #[tokio::test]
    async fn delete_removes_file_and_index_row() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        let ctx = make_ctx(dir.path()).await;
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', 'a.bin', 1, 1, '2024')",
        )
        .execute(ctx.store.pool())
        .await
        .unwrap();

        let id = ctx.queue.enqueue_delete(Side::Local, "a.bin", false, false).await.unwrap();
        let task = ctx.queue.get(id).await.unwrap().unwrap();
        run(&ctx, &task).await.unwrap();

        assert!(!dir.path().join("a.bin").exists());
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM file_index WHERE relpath = 'a.bin'")
            .fetch_optional(ctx.store.pool())
            .await
            .unwrap();
        assert!(row.is_none());
    }
}
