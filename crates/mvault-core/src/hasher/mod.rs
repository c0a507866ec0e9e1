//! Hasher: streaming BLAKE3 content hash with a (size, mtime) cache.
//!
//! Grounded in `original_source/app/services/hasher.py`: full mode hashes
//! the whole file in 1 MiB chunks; fast mode hashes the first 4 MiB plus
//! the last 4 MiB (or the whole file when smaller) and prefixes the result
//! `fast:`. CPU-bound digesting runs on `tokio::task::spawn_blocking`
//! bounded by a semaphore sized by `hash_workers`, the same pattern used
//! for every CPU-bound step in this crate's worker dispatch.

mod compute;

pub use compute::{compute_full_hash, compute_partial_hash};

use crate::error::{Side, VaultError};
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    Full,
    Fast,
}

/// Bounded pool gate for CPU-heavy hashing, shared across the Worker and
/// ad-hoc request handlers — a small, fixed-size thread pool by default.
#[derive(Clone)]
pub struct Hasher {
    store: Store,
    semaphore: Arc<Semaphore>,
}

impl Hasher {
    pub fn new(store: Store, workers: usize) -> Self {
        Hasher {
            store,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Get the hash for a file, computing and caching it if necessary.
    /// Returns `Ok(None)` if the file doesn't exist.
    pub async fn get_hash(
        &self,
        side: Side,
        relpath: &str,
        root: &Path,
        mode: HashMode,
        force: bool,
    ) -> Result<Option<String>> {
        let filepath = root.join(relpath);
        let metadata = match tokio::fs::metadata(&filepath).await {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        let size = metadata.len() as i64;
        let mtime_ns = mtime_ns(&metadata);

        if !force {
            if let Some(cached) = self.cached_hash(side, relpath, size, mtime_ns).await? {
                let is_fast = cached.starts_with("fast:");
                match mode {
                    HashMode::Fast => return Ok(Some(cached)),
                    HashMode::Full if !is_fast => return Ok(Some(cached)),
                    HashMode::Full => {} // have a fast hash, need full: fall through to recompute
                }
            }
        }

        let hash_value = self.compute(filepath.clone(), mode).await?;

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE file_index SET hash = ?1, hash_computed_at = ?2 WHERE side = ?3 AND relpath = ?4",
        )
        .bind(&hash_value)
        .bind(&now)
        .bind(side.as_str())
        .bind(relpath)
        .execute(self.store.pool())
        .await
        .map_err(VaultError::from)?;

        Ok(Some(hash_value))
    }

    async fn cached_hash(
        &self,
        side: Side,
        relpath: &str,
        size: i64,
        mtime_ns: i64,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT hash FROM file_index WHERE side = ?1 AND relpath = ?2 AND size = ?3 \
             AND mtime_ns = ?4 AND hash IS NOT NULL",
        )
        .bind(side.as_str())
        .bind(relpath)
        .bind(size)
        .bind(mtime_ns)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(|(h,)| h))
    }

    async fn compute(&self, path: PathBuf, mode: HashMode) -> Result<String> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            match mode {
                HashMode::Full => compute::compute_full_hash(&path),
                HashMode::Fast => compute::compute_partial_hash(&path).map(|h| format!("fast:{h}")),
            }
        })
        .await??;
        Ok(result)
    }
}

#[cfg(unix)]
pub(crate) fn mtime_ns(metadata: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec()
}

#[cfg(not(unix))]
pub(crate) fn mtime_ns(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn seed_file_index(store: &Store, relpath: &str, size: i64, mtime_ns: i64) {
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('local', ?1, ?2, ?3, '2024-01-01')",
        )
        .bind(relpath)
        .bind(size)
        .bind(mtime_ns)
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn full_hash_is_computed_and_cached() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let metadata = std::fs::metadata(&path).unwrap();
        seed_file_index(&store, "a.bin", metadata.len() as i64, mtime_ns(&metadata)).await;

        let hasher = Hasher::new(store.clone(), 2);
        let hash = hasher
            .get_hash(Side::Local, "a.bin", dir.path(), HashMode::Full, false)
            .await
            .unwrap()
            .unwrap();
        assert!(!hash.starts_with("fast:"));

        let row: (Option<String>,) = sqlx::query_as("SELECT hash FROM file_index WHERE relpath = 'a.bin'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0.as_deref(), Some(hash.as_str()));
    }

    #[tokio::test]
    async fn fast_mode_accepts_full_cached_hash() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"data").unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        seed_file_index(&store, "a.bin", metadata.len() as i64, mtime_ns(&metadata)).await;

        let hasher = Hasher::new(store.clone(), 1);
        let full = hasher
            .get_hash(Side::Local, "a.bin", dir.path(), HashMode::Full, false)
            .await
            .unwrap()
            .unwrap();
        let fast = hasher
            .get_hash(Side::Local, "a.bin", dir.path(), HashMode::Fast, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full, fast);
    }

    #[tokio::test]
    async fn full_mode_recomputes_when_cached_is_fast() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, vec![7u8; 10]).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        seed_file_index(&store, "a.bin", metadata.len() as i64, mtime_ns(&metadata)).await;

        let hasher = Hasher::new(store.clone(), 1);
        let fast = hasher
            .get_hash(Side::Local, "a.bin", dir.path(), HashMode::Fast, false)
            .await
            .unwrap()
            .unwrap();
        assert!(fast.starts_with("fast:"));

        let full = hasher
            .get_hash(Side::Local, "a.bin", dir.path(), HashMode::Full, false)
            .await
            .unwrap()
            .unwrap();
        assert!(!full.starts_with("fast:"));
    }

    #[tokio::test]
    async fn missing_file_returns_none() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let hasher = Hasher::new(store, 1);
        let result = hasher
            .get_hash(Side::Local, "missing.bin", dir.path(), HashMode::Full, false)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
