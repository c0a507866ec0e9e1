//! Downloader: resumable multi-job HTTP downloader with stall
//! detection and byte-range resume.
//!
//! Grounded in `original_source/app/services/downloader.py`, with the
//! blocking-transfer-in-`spawn_blocking` shape used for every CPU/IO-bound
//! transfer in this crate. `max_concurrent` active jobs are promoted from
//! `queued` by a scheduler loop; each job runs its own attempt loop with
//! indefinite retry on stall/reset and terminal failure on HTTP >= 400.

mod provider;
mod transfer;

pub use provider::{detect as detect_provider, Provider};

use crate::queue::Queue;
use crate::error::Side;
use crate::events::{Bus, Topic};
use crate::retry::{classify_curl_error, ErrorKind, RetryDecision, RetryPolicy};
use crate::source::SourceRegistry;
use crate::store::Store;
use crate::url_model::derive_filename;
use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadJob {
    pub id: i64,
    pub url: String,
    pub filename: Option<String>,
    pub provider: String,
    pub status: JobStatus,
    pub bytes_downloaded: i64,
    pub total_bytes: Option<i64>,
    pub attempts: i64,
    pub dest_path: Option<String>,
    pub temp_path: Option<String>,
    pub target_root: Option<String>,
    pub record_source: bool,
    pub error_message: Option<String>,
}

type JobRow = (
    i64,
    String,
    Option<String>,
    String,
    String,
    i64,
    Option<i64>,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
);

const JOB_COLUMNS: &str = "id, url, filename, provider, status, bytes_downloaded, total_bytes, attempts, \
    dest_path, temp_path, target_root, record_source, error_message";

fn row_to_job(row: JobRow) -> DownloadJob {
    DownloadJob {
        id: row.0,
        url: row.1,
        filename: row.2,
        provider: row.3,
        status: JobStatus::from_str(&row.4),
        bytes_downloaded: row.5,
        total_bytes: row.6,
        attempts: row.7,
        dest_path: row.8,
        temp_path: row.9,
        target_root: row.10,
        record_source: row.11 != 0,
        error_message: row.12,
    }
}

#[derive(Clone)]
pub struct DownloaderConfig {
    pub stall_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_concurrent: usize,
    pub civitai_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
}

/// Concurrent download manager. Each active job runs on its own
/// `spawn_blocking` thread; `in_flight` caps how many run at once.
#[derive(Clone)]
pub struct Downloader {
    store: Store,
    bus: Bus,
    queue: Queue,
    config: DownloaderConfig,
    retry_policy: RetryPolicy,
    abort_tokens: Arc<AsyncMutex<std::collections::HashMap<i64, Arc<AtomicBool>>>>,
    in_flight: Arc<AtomicU64>,
}

impl Downloader {
    pub fn new(store: Store, bus: Bus, queue: Queue, config: DownloaderConfig) -> Self {
        Downloader {
            store,
            bus,
            queue,
            config,
            // Stalls/resets are retried indefinitely per spec.md §4.9; only
            // `ErrorKind::Other` (non-network failures) is terminal, so
            // `max_attempts` is effectively unbounded here.
            retry_policy: RetryPolicy { max_attempts: u32::MAX, ..RetryPolicy::default() },
            abort_tokens: Arc::new(AsyncMutex::new(std::collections::HashMap::new())),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn enqueue(
        &self,
        url: &str,
        filename_override: Option<&str>,
        target_root: &Path,
        record_source: bool,
    ) -> Result<i64> {
        let provider = provider::detect(url);
        let filename = filename_override
            .map(|s| s.to_string())
            .unwrap_or_else(|| derive_filename(url, None));
        let dest_path = target_root.join(&filename);
        let temp_path = path_with_part_suffix(&dest_path);

        let now = Utc::now().to_rfc3339();
        let id: (i64,) = sqlx::query_as(
            "INSERT INTO download_jobs (url, filename, provider, status, dest_path, temp_path, target_root, \
             record_source, created_at, updated_at) VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?6, ?7, ?8, ?8) \
             RETURNING id",
        )
        .bind(url)
        .bind(&filename)
        .bind(provider.as_str())
        .bind(dest_path.to_string_lossy().to_string())
        .bind(temp_path.to_string_lossy().to_string())
        .bind(target_root.to_string_lossy().to_string())
        .bind(record_source as i64)
        .bind(&now)
        .fetch_one(self.store.pool())
        .await?;
        Ok(id.0)
    }

    pub async fn get(&self, id: i64) -> Result<Option<DownloadJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM download_jobs WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(row_to_job))
    }

    pub async fn list(&self) -> Result<Vec<DownloadJob>> {
        let rows: Vec<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM download_jobs ORDER BY id DESC"))
                .fetch_all(self.store.pool())
                .await?;
        Ok(rows.into_iter().map(row_to_job).collect())
    }

    /// Cooperative cancel: the partial file is preserved so the job may be
    /// resumed later.
    pub async fn cancel(&self, id: i64) -> Result<()> {
        if let Some(token) = self.abort_tokens.lock().await.get(&id) {
            token.store(true, Ordering::SeqCst);
        }
        sqlx::query("UPDATE download_jobs SET status = 'cancelled' WHERE id = ?1 AND status IN ('queued', 'running')")
            .bind(id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    pub async fn cancel_all(&self) -> Result<()> {
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM download_jobs WHERE status IN ('queued', 'running')")
            .fetch_all(self.store.pool())
            .await?;
        for (id,) in ids {
            self.cancel(id).await?;
        }
        Ok(())
    }

    /// Scheduler loop: promote queued jobs into running up to
    /// `max_concurrent`, spawning each as its own attempt loop. Runs until
    /// `shutdown` is signalled.
    pub async fn run_scheduler(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let in_flight = self.in_flight.load(Ordering::SeqCst) as usize;
            if in_flight < self.config.max_concurrent {
                match self.next_queued().await {
                    Ok(Some(job)) => {
                        let this = self.clone();
                        self.in_flight.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            this.run_job_loop(job).await;
                            this.in_flight.fetch_sub(1, Ordering::SeqCst);
                        });
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => tracing::error!(error = %err, "failed to poll download jobs"),
                }
            }
            if tokio::time::timeout(Duration::from_millis(500), shutdown.changed()).await.is_ok()
                && *shutdown.borrow()
            {
                return;
            }
        }
    }

    async fn next_queued(&self) -> Result<Option<DownloadJob>> {
        let now = Utc::now().to_rfc3339();
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE download_jobs SET status = 'running', updated_at = ?1 \
             WHERE id = (SELECT id FROM download_jobs WHERE status = 'queued' ORDER BY id ASC LIMIT 1) \
             RETURNING id",
        )
        .bind(&now)
        .fetch_optional(self.store.pool())
        .await?;
        match row {
            Some((id,)) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn run_job_loop(&self, mut job: DownloadJob) {
        let token = Arc::new(AtomicBool::new(false));
        self.abort_tokens.lock().await.insert(job.id, Arc::clone(&token));

        loop {
            if token.load(Ordering::SeqCst) {
                break;
            }
            match self.attempt(&mut job, Arc::clone(&token)).await {
                Ok(AttemptOutcome::Completed) => {
                    self.finish(job.id, JobStatus::Completed, None).await;
                    if job.record_source {
                        if let Err(err) = self.register_source(&job).await {
                            tracing::warn!(error = %err, job_id = job.id, "failed to register source after download");
                        }
                    }
                    break;
                }
                Ok(AttemptOutcome::Cancelled) => {
                    break;
                }
                Ok(AttemptOutcome::RetryAfterStall(delay)) => {
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(message) => {
                    self.finish(job.id, JobStatus::Failed, Some(message)).await;
                    break;
                }
            }
        }

        self.abort_tokens.lock().await.remove(&job.id);
    }

    async fn attempt(&self, job: &mut DownloadJob, token: Arc<AtomicBool>) -> std::result::Result<AttemptOutcome, String> {
        let url = job.url.clone();
        let dest_path = PathBuf::from(job.dest_path.clone().ok_or("job missing dest_path")?);
        let temp_path = PathBuf::from(job.temp_path.clone().ok_or("job missing temp_path")?);

        sqlx::query("UPDATE download_jobs SET attempts = attempts + 1 WHERE id = ?1")
            .bind(job.id)
            .execute(self.store.pool())
            .await
            .map_err(|e| e.to_string())?;
        job.attempts += 1;

        let offset = tokio::fs::metadata(&temp_path).await.map(|m| m.len()).unwrap_or(0);

        let provider = provider::detect(&url);
        let mut headers = Vec::new();
        if let Some((name, value)) = provider::bearer_header(
            provider,
            self.config.civitai_api_key.as_deref(),
            self.config.huggingface_api_key.as_deref(),
        ) {
            headers.push((name, value));
        }

        let progress = Arc::new(AtomicU64::new(offset));
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<u64>(16);
        let persist_store = self.store.clone();
        let persist_bus = self.bus.clone();
        let job_id = job.id;
        let persist_handle = tokio::spawn(async move {
            let mut last = std::time::Instant::now();
            while let Some(bytes) = progress_rx.recv().await {
                if last.elapsed() >= Duration::from_secs(1) {
                    let _ = sqlx::query("UPDATE download_jobs SET bytes_downloaded = ?1, updated_at = ?2 WHERE id = ?3")
                        .bind(bytes as i64)
                        .bind(Utc::now().to_rfc3339())
                        .bind(job_id)
                        .execute(persist_store.pool())
                        .await;
                    persist_bus.publish(Topic::QueueProgress, serde_json::json!({"download_job_id": job_id, "bytes_downloaded": bytes}));
                    last = std::time::Instant::now();
                }
            }
        });

        let connect_timeout = self.config.connect_timeout;
        let stall_timeout = self.config.stall_timeout;
        let transfer_result = tokio::task::spawn_blocking({
            let temp_path = temp_path.clone();
            let token = Arc::clone(&token);
            let progress = Arc::clone(&progress);
            let progress_tx = progress_tx.clone();
            move || {
                transfer::run_transfer(
                    &url,
                    &headers,
                    offset,
                    &temp_path,
                    token,
                    progress,
                    progress_tx,
                    connect_timeout,
                    stall_timeout,
                )
            }
        })
        .await
        .map_err(|e| e.to_string())?;

        drop(progress_tx);
        let _ = persist_handle.await;

        if token.load(Ordering::SeqCst) {
            return Ok(AttemptOutcome::Cancelled);
        }

        match transfer_result {
            Ok(outcome) => {
                if let Some(name) = outcome.filename_from_disposition {
                    self.maybe_rename(job, &name).await.map_err(|e| e.to_string())?;
                }
                let final_bytes = tokio::fs::metadata(&temp_path).await.map(|m| m.len()).unwrap_or(outcome.bytes_written);
                sqlx::query("UPDATE download_jobs SET bytes_downloaded = ?1, total_bytes = ?2, updated_at = ?3 WHERE id = ?4")
                    .bind(final_bytes as i64)
                    .bind(outcome.total_bytes.map(|t| t as i64))
                    .bind(Utc::now().to_rfc3339())
                    .bind(job.id)
                    .execute(self.store.pool())
                    .await
                    .map_err(|e| e.to_string())?;

                let done = match outcome.total_bytes {
                    Some(total) => final_bytes >= total,
                    None => true, // clean EOF with unknown length
                };
                if done {
                    let dest = PathBuf::from(job.dest_path.clone().unwrap());
                    let temp = PathBuf::from(job.temp_path.clone().unwrap());
                    tokio::fs::rename(&temp, &dest).await.map_err(|e| e.to_string())?;
                    Ok(AttemptOutcome::Completed)
                } else {
                    self.retry_or_fail(job.attempts as u32, ErrorKind::Connection, job.id)
                }
            }
            Err(transfer::TransferError::HttpStatus(code)) => Err(format!("HTTP {code}")),
            Err(transfer::TransferError::Aborted) => Ok(AttemptOutcome::Cancelled),
            Err(transfer::TransferError::Curl(e)) => {
                let kind = classify_curl_error(&e);
                tracing::warn!(error = %e, job_id = job.id, "download attempt failed, classified as {kind:?}");
                self.retry_or_fail(job.attempts as u32, kind, job.id)
            }
            Err(err @ transfer::TransferError::Io(_)) => {
                tracing::warn!(error = %err, job_id = job.id, "download attempt failed with a storage error");
                self.retry_or_fail(job.attempts as u32, ErrorKind::Other, job.id)
            }
        }
    }

    /// Consults the retry policy for `kind` at `attempt` and either returns
    /// the backoff delay to sleep before the next attempt, or a terminal
    /// failure message when the policy says to stop.
    fn retry_or_fail(&self, attempt: u32, kind: ErrorKind, job_id: i64) -> std::result::Result<AttemptOutcome, String> {
        match self.retry_policy.decide(attempt, kind) {
            RetryDecision::RetryAfter(delay) => Ok(AttemptOutcome::RetryAfterStall(delay)),
            RetryDecision::NoRetry => Err(format!("job {job_id}: non-retryable error ({kind:?})")),
        }
    }

    /// Honor a `Content-Disposition` filename that differs from the current
    /// one: rename both `dest_path` and `temp_path`, keeping partial bytes
    /// intact.
    async fn maybe_rename(&self, job: &mut DownloadJob, disposition_name: &str) -> Result<()> {
        let sanitized = crate::url_model::sanitize_filename_for_linux(disposition_name);
        if sanitized.is_empty() || Some(sanitized.as_str()) == job.filename.as_deref() {
            return Ok(());
        }
        let target_root = PathBuf::from(job.target_root.clone().unwrap_or_default());
        let new_dest = target_root.join(&sanitized);
        let new_temp = path_with_part_suffix(&new_dest);
        let old_temp = PathBuf::from(job.temp_path.clone().unwrap_or_default());

        if tokio::fs::metadata(&old_temp).await.is_ok() {
            tokio::fs::rename(&old_temp, &new_temp).await.ok();
        }

        sqlx::query("UPDATE download_jobs SET filename = ?1, dest_path = ?2, temp_path = ?3 WHERE id = ?4")
            .bind(&sanitized)
            .bind(new_dest.to_string_lossy().to_string())
            .bind(new_temp.to_string_lossy().to_string())
            .bind(job.id)
            .execute(self.store.pool())
            .await?;

        job.filename = Some(sanitized);
        job.dest_path = Some(new_dest.to_string_lossy().to_string());
        job.temp_path = Some(new_temp.to_string_lossy().to_string());
        Ok(())
    }

    async fn finish(&self, id: i64, status: JobStatus, error: Option<String>) {
        let now = Utc::now().to_rfc3339();
        let _ = sqlx::query("UPDATE download_jobs SET status = ?1, error_message = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(status.as_str())
            .bind(&error)
            .bind(&now)
            .bind(id)
            .execute(self.store.pool())
            .await;
        self.bus.publish(
            Topic::TaskComplete,
            serde_json::json!({"download_job_id": id, "status": status.as_str(), "error": error}),
        );
    }

    /// On completion, register the destination's relpath under
    /// `target_root` in the Source Registry and enqueue a `hash_file` task
    /// to backfill its content hash.
    async fn register_source(&self, job: &DownloadJob) -> Result<()> {
        let target_root = match &job.target_root {
            Some(r) if !r.is_empty() => PathBuf::from(r),
            _ => return Ok(()),
        };
        let dest_path = PathBuf::from(job.dest_path.clone().unwrap_or_default());
        let relpath = match dest_path.strip_prefix(&target_root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => return Ok(()),
        };

        let registry = SourceRegistry::new(self.store.clone());
        registry.upsert_for_relpath(&relpath, &job.url, job.filename.as_deref(), None).await?;

        let metadata = tokio::fs::metadata(&dest_path).await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(side, relpath) DO UPDATE SET size = excluded.size, mtime_ns = excluded.mtime_ns",
        )
        .bind(Side::Local.as_str())
        .bind(&relpath)
        .bind(metadata.len() as i64)
        .bind(crate::hasher::mtime_ns(&metadata))
        .bind(&now)
        .execute(self.store.pool())
        .await?;

        self.queue.enqueue_hash_file(Side::Local, &relpath).await?;
        Ok(())
    }
}

enum AttemptOutcome {
    Completed,
    Cancelled,
    RetryAfterStall(Duration),
}

fn path_with_part_suffix(dest: &Path) -> PathBuf {
    let mut s = dest.as_os_str().to_os_string();
    s.push(".part");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_sets_temp_path_suffix() {
        let store = Store::open_memory().await.unwrap();
        let bus = Bus::new();
        let queue = Queue::new(store.clone());
        let cfg = DownloaderConfig {
            stall_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            max_concurrent: 1,
            civitai_api_key: None,
            huggingface_api_key: None,
        };
        let downloader = Downloader::new(store, bus, queue, cfg);
        let root = tempfile::tempdir().unwrap();
        let id = downloader.enqueue("https://example.com/model.bin", None, root.path(), true).await.unwrap();
        let job = downloader.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.temp_path.unwrap().ends_with("model.bin.part"));
        assert_eq!(job.provider, "generic");
    }

    #[tokio::test]
    async fn cancel_marks_job_cancelled() {
        let store = Store::open_memory().await.unwrap();
        let bus = Bus::new();
        let queue = Queue::new(store.clone());
        let cfg = DownloaderConfig {
            stall_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            max_concurrent: 1,
            civitai_api_key: None,
            huggingface_api_key: None,
        };
        let downloader = Downloader::new(store, bus, queue, cfg);
        let root = tempfile::tempdir().unwrap();
        let id = downloader.enqueue("https://example.com/a.bin", None, root.path(), false).await.unwrap();
        downloader.cancel(id).await.unwrap();
        let job = downloader.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
