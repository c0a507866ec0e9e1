//! `copy` task dispatch: stream source to destination in 1 MiB chunks,
//! hashing as we go, then upsert both sides' FileRecord with the shared
//! hash.

use super::{is_cancelled, persist_progress, Ctx, DispatchResult, TaskOutcome};
use crate::error::Side;
use crate::events::Topic;
use crate::queue::QueueTask;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const CHUNK_SIZE: usize = 1024 * 1024;

pub async fn run(ctx: &Ctx, task: &QueueTask) -> DispatchResult {
    let src_side = Side::from_str(task.src_side.as_deref().unwrap_or_default())
        .ok_or_else(|| TaskOutcome::Failed("copy task missing src_side".into()))?;
    let dst_side = Side::from_str(task.dst_side.as_deref().unwrap_or_default())
        .ok_or_else(|| TaskOutcome::Failed("copy task missing dst_side".into()))?;
    let src_relpath = task.src_relpath.clone().ok_or_else(|| TaskOutcome::Failed("copy task missing src_relpath".into()))?;
    let dst_relpath = task.dst_relpath.clone().ok_or_else(|| TaskOutcome::Failed("copy task missing dst_relpath".into()))?;

    let src_path = ctx.roots.of(src_side).join(&src_relpath);
    let dst_path = ctx.roots.of(dst_side).join(&dst_relpath);

    let src_meta = tokio::fs::metadata(&src_path)
        .await
        .map_err(|e| TaskOutcome::Failed(format!("source missing: {e}")))?;
    let total = src_meta.len();

    if let Some(parent) = dst_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    }

    let mut src_file = tokio::fs::File::open(&src_path).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    let mut dst_file = tokio::fs::File::create(&dst_path).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut transferred: u64 = 0;
    let mut last_persist = Instant::now();
    let mut last_decile = -1i64;

    loop {
        if is_cancelled(&ctx.store, task.id).await {
            let _ = tokio::fs::remove_file(&dst_path).await;
            return Err(TaskOutcome::Cancelled);
        }

        let n = src_file.read(&mut buf).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
        if n == 0 {
            break;
        }
        dst_file.write_all(&buf[..n]).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
        hasher.update(&buf[..n]);
        transferred += n as u64;

        if last_persist.elapsed() >= Duration::from_secs(1) {
            let _ = persist_progress(&ctx.store, task.id, transferred as i64).await;
            last_persist = Instant::now();
        }
        if total > 0 {
            let decile = (transferred as i64 * 10) / total as i64;
            if decile != last_decile {
                last_decile = decile;
                ctx.bus.publish(
                    Topic::QueueProgress,
                    serde_json::json!({"task_id": task.id, "bytes_transferred": transferred, "total_bytes": total}),
                );
            }
        }
    }

    dst_file.flush().await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    drop(dst_file);
    let _ = persist_progress(&ctx.store, task.id, transferred as i64).await;

    let mtime = filetime::FileTime::from_last_modification_time(&src_meta);
    filetime::set_file_mtime(&dst_path, mtime).map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    let hash = hasher.finalize().to_hex().to_string();
    let now = Utc::now().to_rfc3339();
    let dst_meta = tokio::fs::metadata(&dst_path).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    let dst_mtime_ns = crate::hasher::mtime_ns(&dst_meta);

    sqlx::query(
        "INSERT INTO file_index (side, relpath, size, mtime_ns, hash, hash_computed_at, indexed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
         ON CONFLICT(side, relpath) DO UPDATE SET size = excluded.size, mtime_ns = excluded.mtime_ns, \
         hash = excluded.hash, hash_computed_at = excluded.hash_computed_at",
    )
    .bind(dst_side.as_str())
    .bind(&dst_relpath)
    .bind(transferred as i64)
    .bind(dst_mtime_ns)
    .bind(&hash)
    .bind(&now)
    .execute(ctx.store.pool())
    .await
    .map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    sqlx::query(
        "UPDATE file_index SET hash = ?1, hash_computed_at = ?2 WHERE side = ?3 AND relpath = ?4",
    )
    .bind(&hash)
    .bind(&now)
    .bind(src_side.as_str())
    .bind(&src_relpath)
    .execute(ctx.store.pool())
    .await
    .map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    ctx.bus.publish(
        Topic::QueueProgress,
        serde_json::json!({"task_id": task.id, "bytes_transferred": transferred, "total_bytes": total}),
    );

    Ok(serde_json::json!({"hash": hash, "bytes": transferred}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::Dedupe;
    use crate::hasher::Hasher;
    use crate::queue::Queue;
    use crate::store::Store;
    use crate::worker::WorkerRoots;

    async fn make_ctx(local: &std::path::Path, lake: &std::path::Path) -> Ctx {
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
            roots: WorkerRoots { local: local.to_path_buf(), lake: lake.to_path_buf() },
            retry_count: 3,
        }
    }

    #[tokio::test]
    async fn copy_produces_identical_hash_on_both_sides() {
        let local = tempfile::tempdir().unwrap();
        let lake = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.bin"), b"hello world").unwrap();

        let ctx = make_ctx(local.path(), lake.path()).await;
        let id = ctx.queue.enqueue_copy(Side::Local, "a.bin", Side::Lake, "a.bin").await.unwrap();
        let task = ctx.queue.get(id).await.unwrap().unwrap();

        let result = run(&ctx, &task).await.unwrap();
        assert!(lake.path().join("a.bin").exists());
        assert_eq!(std::fs::read(lake.path().join("a.bin")).unwrap(), b"hello world");
        assert!(result["hash"].as_str().is_some());
    }
}
