//! `hash_file` task dispatch: compute the hash for one relpath, persist it,
//! and migrate any `relpath:` SourceMapping to the new hash key.

use super::{Ctx, DispatchResult, TaskOutcome};
use crate::error::Side;
use crate::hasher::HashMode;
use crate::queue::QueueTask;
use crate::source::SourceRegistry;

pub async fn run(ctx: &Ctx, task: &QueueTask) -> DispatchResult {
    let side = Side::from_str(task.dst_side.as_deref().unwrap_or_default())
        .ok_or_else(|| TaskOutcome::Failed("hash_file task missing side".into()))?;
    let relpath = task.dst_relpath.clone().ok_or_else(|| TaskOutcome::Failed("hash_file task missing relpath".into()))?;

    let hash = ctx
        .hasher
        .get_hash(side, &relpath, ctx.roots.of(side), HashMode::Full, true)
        .await
        .map_err(|e| TaskOutcome::Failed(e.to_string()))?
        .ok_or_else(|| TaskOutcome::Failed(format!("file missing: {relpath}")))?;

    let registry = SourceRegistry::new(ctx.store.clone());
    let migrated = registry
        .migrate_relpath_to_hash(&relpath, &hash)
        .await
        .map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    Ok(serde_json::json!({"hash": hash, "source_migrated": migrated}))
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
    async fn hash_file_migrates_relpath_source_mapping() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"content").unwrap();

        let store = Store::open_memory().await.unwrap();
        let meta = std::fs::metadata(dir.path().join("a.bin")).unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', 'a.bin', ?1, ?2, '2024')",
        )
        .bind(meta.len() as i64)
        .bind(crate::hasher::mtime_ns(&meta))
        .execute(store.pool())
        .await
        .unwrap();

        let registry = SourceRegistry::new(store.clone());
        registry.upsert_for_relpath("a.bin", "https://example.com/a", None, None).await.unwrap();

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

        let id = queue.enqueue_hash_file(crate::error::Side::Local, "a.bin").await.unwrap();
        let task = queue.get(id).await.unwrap().unwrap();
        let result = run(&ctx, &task).await.unwrap();
        assert_eq!(result["source_migrated"], true);

        let hash = result["hash"].as_str().unwrap();
        assert!(registry.get_by_hash(hash).await.unwrap().is_some());
        assert!(registry.get_by_relpath("a.bin").await.unwrap().is_none());
    }
}
