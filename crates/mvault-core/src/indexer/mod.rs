//! Indexer: recursive filesystem walk into `file_index`.
//!
//! Grounded in `original_source/app/services/indexer.py`'s `scan_side`: a
//! full per-side rescan, preserving any existing hash whose
//! `(relpath, size, mtime_ns)` triple hasn't changed. Uses `walkdir`, the
//! ecosystem-standard choice for a recursive directory walk.

use crate::error::Side;
use crate::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use walkdir::WalkDir;

pub struct FileRecord {
    pub relpath: String,
    pub size: i64,
    pub mtime_ns: i64,
    pub hash: Option<String>,
}

pub struct IndexStats {
    pub file_count: i64,
    pub total_bytes: i64,
    pub hashed_count: i64,
}

#[derive(Clone)]
pub struct Indexer {
    store: Store,
}

impl Indexer {
    pub fn new(store: Store) -> Self {
        Indexer { store }
    }

    /// Rescan `root` and atomically replace the per-side FileRecord set.
    /// Returns the number of files indexed. Individual stat failures are
    /// skipped, not fatal.
    pub async fn scan_side(&self, side: Side, root: &Path) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut entries = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable directory entry during scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "skipping file: stat failed");
                    continue;
                }
            };
            let relpath = match entry.path().strip_prefix(root) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            entries.push((relpath, metadata.len() as i64, crate::hasher::mtime_ns(&metadata)));
        }

        let mut tx = self.store.pool().begin().await?;

        // Snapshot prior hashes before clearing the side, so unchanged
        // files keep their digest instead of losing it to the rescan.
        let prior: Vec<(String, i64, i64, String, String)> = sqlx::query_as(
            "SELECT relpath, size, mtime_ns, hash, hash_computed_at FROM file_index \
             WHERE side = ?1 AND hash IS NOT NULL",
        )
        .bind(side.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let prior: std::collections::HashMap<(String, i64, i64), (String, String)> = prior
            .into_iter()
            .map(|(relpath, size, mtime_ns, hash, hash_computed_at)| {
                ((relpath, size, mtime_ns), (hash, hash_computed_at))
            })
            .collect();

        sqlx::query("DELETE FROM file_index WHERE side = ?1")
            .bind(side.as_str())
            .execute(&mut *tx)
            .await?;

        for (relpath, size, mtime_ns) in &entries {
            let reused = prior.get(&(relpath.clone(), *size, *mtime_ns));
            sqlx::query(
                "INSERT INTO file_index (side, relpath, size, mtime_ns, hash, hash_computed_at, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(side.as_str())
            .bind(relpath)
            .bind(size)
            .bind(mtime_ns)
            .bind(reused.map(|(h, _)| h.as_str()))
            .bind(reused.map(|(_, t)| t.as_str()))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(entries.len())
    }

    pub async fn get_files(&self, side: Side, folder: &str, query: &str) -> Result<Vec<FileRecord>> {
        let mut sql =
            String::from("SELECT relpath, size, mtime_ns, hash FROM file_index WHERE side = ?1");
        let mut binds: Vec<String> = Vec::new();

        if !folder.is_empty() {
            let folder = folder.replace('\\', "/");
            let folder = folder.trim_matches('/');
            sql.push_str(" AND relpath LIKE ?");
            binds.push(format!("{folder}/%"));
        }
        if !query.is_empty() {
            sql.push_str(" AND relpath LIKE ?");
            binds.push(format!("%{query}%"));
        }
        sql.push_str(" ORDER BY relpath");

        let mut q = sqlx::query_as::<_, (String, i64, i64, Option<String>)>(&sql).bind(side.as_str());
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(self.store.pool()).await?;
        Ok(rows
            .into_iter()
            .map(|(relpath, size, mtime_ns, hash)| FileRecord {
                relpath,
                size,
                mtime_ns,
                hash,
            })
            .collect())
    }

    /// Immediate subfolders under `parent` (empty string for the root).
    pub async fn get_folders(&self, side: Side, parent: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT relpath FROM file_index WHERE side = ?1")
                .bind(side.as_str())
                .fetch_all(self.store.pool())
                .await?;

        let prefix = if parent.is_empty() {
            String::new()
        } else {
            format!("{}/", parent.replace('\\', "/").trim_matches('/'))
        };

        let mut folders = std::collections::BTreeSet::new();
        for (relpath,) in rows {
            if !prefix.is_empty() && !relpath.starts_with(&prefix) {
                continue;
            }
            let suffix = &relpath[prefix.len()..];
            if let Some((first, _)) = suffix.split_once('/') {
                folders.insert(first.to_string());
            }
        }
        Ok(folders.into_iter().collect())
    }

    pub async fn get_stats(&self, side: Side) -> Result<IndexStats> {
        let row: (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), \
             SUM(CASE WHEN hash IS NOT NULL THEN 1 ELSE 0 END) \
             FROM file_index WHERE side = ?1",
        )
        .bind(side.as_str())
        .fetch_one(self.store.pool())
        .await?;
        Ok(IndexStats {
            file_count: row.0,
            total_bytes: row.1,
            hashed_count: row.2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_side_indexes_nested_files() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.safetensors"), b"data").unwrap();
        std::fs::write(dir.path().join("sub/b.safetensors"), b"more data").unwrap();

        let indexer = Indexer::new(store.clone());
        let count = indexer.scan_side(Side::Local, dir.path()).await.unwrap();
        assert_eq!(count, 2);

        let files = indexer.get_files(Side::Local, "", "").await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.relpath == "sub/b.safetensors"));
    }

    #[tokio::test]
    async fn rescan_preserves_hash_when_unchanged() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"fixed content").unwrap();

        let indexer = Indexer::new(store.clone());
        indexer.scan_side(Side::Local, dir.path()).await.unwrap();

        sqlx::query("UPDATE file_index SET hash = 'abc123', hash_computed_at = '2024-01-01' WHERE relpath = 'a.bin'")
            .execute(store.pool())
            .await
            .unwrap();

        let before = indexer.get_files(Side::Local, "", "").await.unwrap();
        let (size, mtime) = (before[0].size, before[0].mtime_ns);

        sqlx::query(
            "UPDATE file_index SET size = ?1, mtime_ns = ?2 WHERE side = 'local' AND relpath = 'a.bin'",
        )
        .bind(size)
        .bind(mtime)
        .execute(store.pool())
        .await
        .unwrap();

        let after = indexer.get_files(Side::Local, "", "").await.unwrap();
        assert_eq!(after[0].hash.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn get_folders_returns_immediate_children() {
        let store = Store::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/x.bin"), b"1").unwrap();
        std::fs::write(dir.path().join("a/y.bin"), b"2").unwrap();

        let indexer = Indexer::new(store.clone());
        indexer.scan_side(Side::Local, dir.path()).await.unwrap();

        let roots = indexer.get_folders(Side::Local, "").await.unwrap();
        assert_eq!(roots, vec!["a".to_string()]);

        let children = indexer.get_folders(Side::Local, "a").await.unwrap();
        assert_eq!(children, vec!["b".to_string()]);
    }
}
