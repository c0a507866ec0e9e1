//! `dedupe_scan` task dispatch: delegate to `dedupe::Dedupe::scan` and
//! return the new scan's totals in the task result.

use super::{Ctx, DispatchResult, TaskOutcome};
use crate::error::Side;
use crate::hasher::HashMode;
use crate::queue::QueueTask;

pub async fn run(ctx: &Ctx, task: &QueueTask) -> DispatchResult {
    let side = Side::from_str(task.src_side.as_deref().unwrap_or_default())
        .ok_or_else(|| TaskOutcome::Failed("dedupe_scan task missing side".into()))?;
    let payload = task.verify_folder.clone().unwrap_or_default();
    let (mode_str, min_size_str) = payload.split_once(':').unwrap_or(("full", "0"));
    let mode = if mode_str == "fast" { HashMode::Fast } else { HashMode::Full };
    let min_size: i64 = min_size_str.parse().unwrap_or(0);

    let summary = ctx
        .dedupe
        .scan(side, ctx.roots.of(side), mode, min_size)
        .await
        .map_err(|e| TaskOutcome::Failed(e.to_string()))?;

    Ok(serde_json::json!({
        "scan_id": summary.scan_id,
        "groups": summary.groups,
        "reclaimable_bytes": summary.reclaimable_bytes,
    }))
}
