//! Dedupe: hash-group scan and keep-selection execution.
//!
//! Grounded in `original_source/app/services/dedupe.py`. `scan` groups the
//! requested side's indexed files by hash (computing any missing ones
//! first), persists a versioned snapshot addressed by `scan_id`; `execute`
//! deletes every non-kept file in the caller's selections, bypassing the
//! side's delete policy.

use crate::error::{Side, VaultError};
use crate::hasher::{HashMode, Hasher};
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, serde::Serialize)]
pub struct DuplicateFile {
    pub relpath: String,
    pub size: i64,
    pub mtime_ns: i64,
    pub keep: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DuplicateGroup {
    pub group_id: i64,
    pub hash: String,
    pub files: Vec<DuplicateFile>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub groups: usize,
    pub reclaimable_bytes: i64,
}

#[derive(Clone)]
pub struct Dedupe {
    store: Store,
    hasher: Hasher,
}

impl Dedupe {
    pub fn new(store: Store, hasher: Hasher) -> Self {
        Dedupe { store, hasher }
    }

    /// Ensure every indexed file on `side` has a hash satisfying `mode`
    /// (cheaper `fast` hashes are accepted unless `mode` is `Full`), group by
    /// hash, and persist a fresh `scan_id` snapshot. Files smaller than
    /// `min_size` are excluded from candidacy.
    pub async fn scan(&self, side: Side, root: &Path, mode: HashMode, min_size: i64) -> Result<ScanSummary> {
        let rows: Vec<(String, i64, i64, Option<String>)> = sqlx::query_as(
            "SELECT relpath, size, mtime_ns, hash FROM file_index WHERE side = ?1 AND size >= ?2",
        )
        .bind(side.as_str())
        .bind(min_size)
        .fetch_all(self.store.pool())
        .await?;

        let mut by_hash: HashMap<String, Vec<(String, i64, i64)>> = HashMap::new();
        for (relpath, size, mtime_ns, hash) in rows {
            let needs_compute = match &hash {
                None => true,
                Some(h) if mode == HashMode::Full && h.starts_with("fast:") => true,
                _ => false,
            };
            let hash = if needs_compute {
                match self.hasher.get_hash(side, &relpath, root, mode, false).await? {
                    Some(h) => h,
                    None => continue, // file vanished between index and scan
                }
            } else {
                hash.expect("hash present when not needing compute")
            };
            by_hash.entry(hash).or_default().push((relpath, size, mtime_ns));
        }

        let scan_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let mut group_count = 0usize;
        let mut reclaimable = 0i64;

        let mut tx = self.store.pool().begin().await?;
        for (hash, mut files) in by_hash {
            if files.len() < 2 {
                continue;
            }
            files.sort_by(|a, b| a.0.cmp(&b.0));
            let group_id: (i64,) = sqlx::query_as(
                "INSERT INTO dedupe_groups (side, hash, scan_id, created_at) VALUES (?1, ?2, ?3, ?4) RETURNING id",
            )
            .bind(side.as_str())
            .bind(&hash)
            .bind(&scan_id)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;

            for (i, (relpath, size, mtime_ns)) in files.iter().enumerate() {
                let keep = i == 0;
                if !keep {
                    reclaimable += size;
                }
                sqlx::query(
                    "INSERT INTO dedupe_files (group_id, relpath, size, mtime_ns, keep) VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(group_id.0)
                .bind(relpath)
                .bind(size)
                .bind(mtime_ns)
                .bind(keep as i64)
                .execute(&mut *tx)
                .await?;
            }
            group_count += 1;
        }
        tx.commit().await?;

        Ok(ScanSummary { scan_id, groups: group_count, reclaimable_bytes: reclaimable })
    }

    pub async fn results(&self, scan_id: &str) -> Result<Vec<DuplicateGroup>> {
        let groups: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, hash FROM dedupe_groups WHERE scan_id = ?1 ORDER BY id")
                .bind(scan_id)
                .fetch_all(self.store.pool())
                .await?;

        let mut out = Vec::with_capacity(groups.len());
        for (group_id, hash) in groups {
            let files: Vec<(String, i64, i64, i64)> = sqlx::query_as(
                "SELECT relpath, size, mtime_ns, keep FROM dedupe_files WHERE group_id = ?1 ORDER BY relpath",
            )
            .bind(group_id)
            .fetch_all(self.store.pool())
            .await?;
            out.push(DuplicateGroup {
                group_id,
                hash,
                files: files
                    .into_iter()
                    .map(|(relpath, size, mtime_ns, keep)| DuplicateFile { relpath, size, mtime_ns, keep: keep != 0 })
                    .collect(),
            });
        }
        Ok(out)
    }

    pub async fn delete_scan(&self, scan_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dedupe_groups WHERE scan_id = ?1")
            .bind(scan_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Delete every file in a group whose relpath isn't the kept one,
    /// regardless of the side's `allow_delete` flag.
    pub async fn execute(&self, side: Side, root: &Path, scan_id: &str, selections: &HashMap<i64, String>) -> Result<DedupeExecuteResult> {
        let groups = self.results(scan_id).await?;
        let mut deleted = 0u64;
        let mut freed_bytes = 0i64;
        let mut errors = Vec::new();

        for group in &groups {
            let keep_relpath = match selections.get(&group.group_id) {
                Some(r) => r.clone(),
                None => group.files.iter().find(|f| f.keep).map(|f| f.relpath.clone()).unwrap_or_default(),
            };
            for file in &group.files {
                if file.relpath == keep_relpath {
                    continue;
                }
                let path = root.join(&file.relpath);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        sqlx::query("DELETE FROM file_index WHERE side = ?1 AND relpath = ?2")
                            .bind(side.as_str())
                            .bind(&file.relpath)
                            .execute(self.store.pool())
                            .await
                            .map_err(VaultError::from)?;
                        deleted += 1;
                        freed_bytes += file.size;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        // idempotent: already gone
                        sqlx::query("DELETE FROM file_index WHERE side = ?1 AND relpath = ?2")
                            .bind(side.as_str())
                            .bind(&file.relpath)
                            .execute(self.store.pool())
                            .await
                            .map_err(VaultError::from)?;
                    }
                    Err(err) => {
                        errors.push(format!("{}: {}", file.relpath, err));
                    }
                }
            }
        }

        Ok(DedupeExecuteResult { deleted, freed_bytes, errors })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DedupeExecuteResult {
    pub deleted: u64,
    pub freed_bytes: i64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_and_index(store: &Store, dir: &Path, relpath: &str, content: &[u8]) {
        let path = dir.join(relpath);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, indexed_at) VALUES ('lake', ?1, ?2, ?3, '2024-01-01')",
        )
        .bind(relpath)
        .bind(metadata.len() as i64)
        .bind(crate::hasher::mtime_ns(&metadata))
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn scan_groups_identical_content_and_execute_deletes_non_kept() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_and_index(&store, dir.path(), "p.bin", b"same bytes").await;
        write_and_index(&store, dir.path(), "q.bin", b"same bytes").await;
        write_and_index(&store, dir.path(), "r.bin", b"same bytes").await;
        write_and_index(&store, dir.path(), "unique.bin", b"different").await;

        let hasher = Hasher::new(store.clone(), 2);
        let dedupe = Dedupe::new(store.clone(), hasher);
        let summary = dedupe.scan(Side::Lake, dir.path(), HashMode::Full, 0).await.unwrap();
        assert_eq!(summary.groups, 1);

        let groups = dedupe.results(&summary.scan_id).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].files.len(), 3);

        let mut selections = HashMap::new();
        selections.insert(groups[0].group_id, "p.bin".to_string());
        let result = dedupe.execute(Side::Lake, dir.path(), &summary.scan_id, &selections).await.unwrap();
        assert_eq!(result.deleted, 2);
        assert_eq!(result.freed_bytes, 2 * "same bytes".len() as i64);
        assert!(dir.path().join("p.bin").exists());
        assert!(!dir.path().join("q.bin").exists());
        assert!(!dir.path().join("r.bin").exists());
    }

    #[tokio::test]
    async fn min_size_filters_small_candidates() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_and_index(&store, dir.path(), "a.bin", b"xx").await;
        write_and_index(&store, dir.path(), "b.bin", b"xx").await;

        let hasher = Hasher::new(store.clone(), 1);
        let dedupe = Dedupe::new(store.clone(), hasher);
        let summary = dedupe.scan(Side::Lake, dir.path(), HashMode::Fast, 100).await.unwrap();
        assert_eq!(summary.groups, 0);
    }
}
