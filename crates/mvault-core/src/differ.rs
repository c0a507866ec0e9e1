//! Differ: set-compare Local vs Lake into diff statuses.
//!
//! Grounded in `original_source/app/services/differ.py`'s `compute_diff`,
//! simplified from the original's mtime-aware variant: when either side's
//! hash is missing, the
//! status is decided purely by size (equal -> `probable_same`, unequal ->
//! `conflict`); mtime is not consulted.

use crate::error::Side;
use crate::store::Store;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    OnlyLocal,
    OnlyLake,
    Same,
    ProbableSame,
    Conflict,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DiffEntry {
    pub relpath: String,
    pub status: DiffStatus,
    pub local_size: Option<i64>,
    pub local_mtime_ns: Option<i64>,
    pub local_hash: Option<String>,
    pub lake_size: Option<i64>,
    pub lake_mtime_ns: Option<i64>,
    pub lake_hash: Option<String>,
}

struct Row {
    size: i64,
    mtime_ns: i64,
    hash: Option<String>,
}

#[derive(Clone)]
pub struct Differ {
    store: Store,
}

impl Differ {
    pub fn new(store: Store) -> Self {
        Differ { store }
    }

    pub async fn compute_diff(&self, folder: &str, query: &str) -> Result<Vec<DiffEntry>> {
        let local = self.side_rows(Side::Local, folder, query).await?;
        let lake = self.side_rows(Side::Lake, folder, query).await?;

        let mut all_relpaths: std::collections::BTreeSet<&String> = local.keys().collect();
        all_relpaths.extend(lake.keys());

        let mut entries = Vec::with_capacity(all_relpaths.len());
        for relpath in all_relpaths {
            let l = local.get(relpath);
            let k = lake.get(relpath);
            let entry = match (l, k) {
                (Some(l), None) => DiffEntry {
                    relpath: relpath.clone(),
                    status: DiffStatus::OnlyLocal,
                    local_size: Some(l.size),
                    local_mtime_ns: Some(l.mtime_ns),
                    local_hash: l.hash.clone(),
                    lake_size: None,
                    lake_mtime_ns: None,
                    lake_hash: None,
                },
                (None, Some(k)) => DiffEntry {
                    relpath: relpath.clone(),
                    status: DiffStatus::OnlyLake,
                    local_size: None,
                    local_mtime_ns: None,
                    local_hash: None,
                    lake_size: Some(k.size),
                    lake_mtime_ns: Some(k.mtime_ns),
                    lake_hash: k.hash.clone(),
                },
                (Some(l), Some(k)) => {
                    let status = match (&l.hash, &k.hash) {
                        (Some(lh), Some(kh)) => {
                            if lh == kh {
                                DiffStatus::Same
                            } else {
                                DiffStatus::Conflict
                            }
                        }
                        _ => {
                            if l.size == k.size {
                                DiffStatus::ProbableSame
                            } else {
                                DiffStatus::Conflict
                            }
                        }
                    };
                    DiffEntry {
                        relpath: relpath.clone(),
                        status,
                        local_size: Some(l.size),
                        local_mtime_ns: Some(l.mtime_ns),
                        local_hash: l.hash.clone(),
                        lake_size: Some(k.size),
                        lake_mtime_ns: Some(k.mtime_ns),
                        lake_hash: k.hash.clone(),
                    }
                }
                (None, None) => unreachable!("relpath came from one of the two maps"),
            };
            entries.push(entry);
        }

        Ok(entries)
    }

    async fn side_rows(&self, side: Side, folder: &str, query: &str) -> Result<HashMap<String, Row>> {
        let mut sql =
            String::from("SELECT relpath, size, mtime_ns, hash FROM file_index WHERE side = ?1");
        let mut binds = Vec::new();
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

        let mut q = sqlx::query_as::<_, (String, i64, i64, Option<String>)>(&sql).bind(side.as_str());
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(self.store.pool()).await?;

        Ok(rows
            .into_iter()
            .map(|(relpath, size, mtime_ns, hash)| (relpath, Row { size, mtime_ns, hash }))
            .collect())
    }
}

/// Group diff entries by their top-level folder, for UI tree rendering.
pub fn group_by_folder(entries: &[DiffEntry]) -> BTreeMap<String, Vec<&DiffEntry>> {
    let mut groups: BTreeMap<String, Vec<&DiffEntry>> = BTreeMap::new();
    for entry in entries {
        let folder = entry
            .relpath
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();
        groups.entry(folder).or_default().push(entry);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &Store, side: &str, relpath: &str, size: i64, mtime_ns: i64, hash: Option<&str>) {
        sqlx::query(
            "INSERT INTO file_index (side, relpath, size, mtime_ns, hash, indexed_at) VALUES (?1, ?2, ?3, ?4, ?5, '2024-01-01')",
        )
        .bind(side)
        .bind(relpath)
        .bind(size)
        .bind(mtime_ns)
        .bind(hash)
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn status_matrix() {
        let store = Store::open_memory().await.unwrap();
        seed(&store, "local", "only_local.bin", 10, 1, None).await;
        seed(&store, "lake", "only_lake.bin", 10, 1, None).await;
        seed(&store, "local", "same.bin", 10, 1, Some("h1")).await;
        seed(&store, "lake", "same.bin", 10, 2, Some("h1")).await;
        seed(&store, "local", "conflict_hash.bin", 10, 1, Some("h1")).await;
        seed(&store, "lake", "conflict_hash.bin", 10, 1, Some("h2")).await;
        seed(&store, "local", "probable.bin", 10, 1, None).await;
        seed(&store, "lake", "probable.bin", 10, 99, None).await;
        seed(&store, "local", "conflict_size.bin", 10, 1, None).await;
        seed(&store, "lake", "conflict_size.bin", 20, 1, None).await;

        let differ = Differ::new(store);
        let entries = differ.compute_diff("", "").await.unwrap();
        let status_of = |name: &str| {
            entries
                .iter()
                .find(|e| e.relpath == name)
                .map(|e| e.status)
                .unwrap()
        };

        assert_eq!(status_of("only_local.bin"), DiffStatus::OnlyLocal);
        assert_eq!(status_of("only_lake.bin"), DiffStatus::OnlyLake);
        assert_eq!(status_of("same.bin"), DiffStatus::Same);
        assert_eq!(status_of("conflict_hash.bin"), DiffStatus::Conflict);
        assert_eq!(status_of("probable.bin"), DiffStatus::ProbableSame);
        assert_eq!(status_of("conflict_size.bin"), DiffStatus::Conflict);
    }

    #[tokio::test]
    async fn folder_filter_restricts_relpaths() {
        let store = Store::open_memory().await.unwrap();
        seed(&store, "local", "models/a.bin", 1, 1, None).await;
        seed(&store, "local", "other/b.bin", 1, 1, None).await;

        let differ = Differ::new(store);
        let entries = differ.compute_diff("models", "").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relpath, "models/a.bin");
    }
}
