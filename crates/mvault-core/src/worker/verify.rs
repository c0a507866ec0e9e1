//! `verify` task dispatch: for every relpath present on both sides with a
//! missing hash on at least one side, compute the missing hash(es) and
//! persist them; report matched/mismatched counts.
//! A hash mismatch is not fatal — both hashes are stored and reported.

use super::{is_cancelled, Ctx, DispatchResult, TaskOutcome};
use crate::error::Side;
use crate::events::Topic;
use crate::hasher::HashMode;
use crate::queue::QueueTask;

pub async fn run(ctx: &Ctx, task: &QueueTask) -> DispatchResult {
    let folder = task.verify_folder.clone().unwrap_or_default();

    let local_rows = side_rows(ctx, Side::Local, &folder).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;
    let lake_rows = side_rows(ctx, Side::Lake, &folder).await.map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    let mut matched = 0u64;
    let mut mismatched = 0u64;
    let mut checked = 0u64;
    let total = local_rows.iter().filter(|(relpath, _, _)| lake_rows.iter().any(|(r, _, _)| r == relpath)).count();

    for (relpath, local_size, local_hash) in &local_rows {
        let Some((_, _lake_size, lake_hash)) = lake_rows.iter().find(|(r, _, _)| r == relpath) else {
            continue;
        };

        if is_cancelled(&ctx.store, task.id).await {
            return Err(TaskOutcome::Cancelled);
        }

        let local_hash = match local_hash {
            Some(h) => h.clone(),
            None => ctx
                .hasher
                .get_hash(Side::Local, relpath, &ctx.roots.local, HashMode::Full, false)
                .await
                .map_err(|e| TaskOutcome::Failed(e.to_string()))?
                .unwrap_or_default(),
        };
        let lake_hash = match lake_hash {
            Some(h) => h.clone(),
            None => ctx
                .hasher
                .get_hash(Side::Lake, relpath, &ctx.roots.lake, HashMode::Full, false)
                .await
                .map_err(|e| TaskOutcome::Failed(e.to_string()))?
                .unwrap_or_default(),
        };

        if local_hash == lake_hash {
            matched += 1;
        } else {
            mismatched += 1;
            tracing::warn!(relpath, "hash mismatch during verify");
        }
        checked += 1;

        ctx.bus.publish(
            Topic::VerifyProgress,
            serde_json::json!({"task_id": task.id, "relpath": relpath, "checked": checked, "total": total}),
        );
        ctx.bus.publish(
            Topic::QueueProgress,
            serde_json::json!({"task_id": task.id, "checked": checked, "total": total}),
        );
        let _ = super::persist_progress(&ctx.store, task.id, checked as i64).await;
        let _ = local_size;
    }

    Ok(serde_json::json!({"matched": matched, "mismatched": mismatched, "checked": checked}))
}

async fn side_rows(ctx: &Ctx, side: Side, folder: &str) -> anyhow::Result<Vec<(String, i64, Option<String>)>> {
    let mut sql = String::from("SELECT relpath, size, hash FROM file_index WHERE side = ?1");
    let folder = folder.trim_matches('/');
    if !folder.is_empty() {
        sql.push_str(" AND relpath LIKE ?2");
    }
    let mut q = sqlx::query_as::<_, (String, i64, Option<String>)>(&sql).bind(side.as_str());
    if !folder.is_empty() {
        q = q.bind(format!("{folder}/%"));
    }
    Ok(q.fetch_all(ctx.store.pool()).await?)
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
    async fn verify_fills_missing_hashes_and_reports_matched() {
        let local = tempfile::tempdir().unwrap();
        let lake = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("x.bin"), b"same bytes").unwrap();
        std::fs::write(lake.path().join("x.bin"), b"same bytes").unwrap();

        let store = Store::open_memory().await.unwrap();
        let local_meta = std::fs::metadata(local.path().join("x.bin")).unwrap();
        let lake_meta = std::fs::metadata(lake.path().join("x.bin")).unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', 'x.bin', ?1, ?2, '2024')",
        )
        .bind(local_meta.len() as i64)
        .bind(crate::hasher::mtime_ns(&local_meta))
        .execute(store.pool())
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('lake', 'x.bin', ?1, ?2, '2024')",
        )
        .bind(lake_meta.len() as i64)
        .bind(crate::hasher::mtime_ns(&lake_meta))
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
            roots: WorkerRoots { local: local.path().to_path_buf(), lake: lake.path().to_path_buf() },
            retry_count: 3,
        };

        let id = queue.enqueue_verify("").await.unwrap();
        let task = queue.get(id).await.unwrap().unwrap();
        let result = run(&ctx, &task).await.unwrap();
        assert_eq!(result["matched"], 1);
        assert_eq!(result["mismatched"], 0);
    }
}
