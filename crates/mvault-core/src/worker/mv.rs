//! `move` task dispatch: same-side rename, falling back to copy-then-delete
//! across filesystems. `enqueue_move` only ever produces
//! same-side tasks, but the fallback keeps this correct if that changes.

use super::{Ctx, DispatchResult, TaskOutcome};
use crate::error::Side;
use chrono::Utc;

pub async fn run(ctx: &Ctx, task: &crate::queue::QueueTask) -> DispatchResult {
    let side = Side::from_str(task.dst_side.as_deref().unwrap_or_default())
        .ok_or_else(|| TaskOutcome::Failed("move task missing side".into()))?;
    let src_relpath = task.src_relpath.clone().ok_or_else(|| TaskOutcome::Failed("move task missing src_relpath".into()))?;
    let dst_relpath = task.dst_relpath.clone().ok_or_else(|| TaskOutcome::Failed("move task missing dst_relpath".into()))?;

    let root = ctx.roots.of(side);
    let src_path = root.join(&src_relpath);
    let dst_path = root.join(&dst_relpath);

    if let Some(parent) = dst_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    }

    match tokio::fs::rename(&src_path, &dst_path).await {
        Ok(()) => {}
        Err(err) if is_cross_device(&err) => {
            tokio::fs::copy(&src_path, &dst_path).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
            tokio::fs::remove_file(&src_path).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
        }
        Err(err) => return Err(TaskOutcome::Failed(err.to_string())),
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE file_index SET relpath = ?1, indexed_at = ?2 WHERE side = ?3 AND relpath = ?4")
        .bind(&dst_relpath)
        .bind(&now)
        .bind(side.as_str())
        .bind(&src_relpath)
        .execute(ctx.store.pool())
        .await
        .map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    Ok(serde_json::json!({"relpath": dst_relpath}))
}

fn is_cross_device(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::Dedupe;
    use crate::hasher::Hasher;
    use crate::queue::Queue;
    use crate::store::Store;
    use crate::worker::WorkerRoots;

    #[tokio::test]
    async fn move_renames_file_and_updates_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"data").unwrap();

        let store = Store::open_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', 'a.bin', 4, 1, '2024')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let queue = Queue::new(store.clone());
        let hasher = Hasher::new(store.clone(), 1);
        let dedupe = Dedupe::new(store.clone(), hasher.clone());
        let ctx = Ctx {
            store: store.clone(),
            queue: queue.clone(),
            bus: crate::events::Bus::new(),
            hasher,
            dedupe,
            roots: WorkerRoots { local: dir.path().to_path_buf(), lake: dir.path().to_path_buf() },
            retry_count: 3,
        };

        let id = queue.enqueue_move(&[crate::error::Side::Local], "a.bin", "b.bin").await.unwrap()[0];
        let task = queue.get(id).await.unwrap().unwrap();
        run(&ctx, &task).await.unwrap();

        assert!(!dir.path().join("a.bin").exists());
        assert!(dir.path().join("b.bin").exists());
    }
}
