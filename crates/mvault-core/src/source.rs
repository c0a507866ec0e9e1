//! Source Registry: key -> download URL metadata.
//!
//! A `SourceMapping` is keyed by either a content hash or the synthetic key
//! `relpath:<path>` for files not yet hashed. Grounded in
//! `original_source/app/services/source_registry.py`'s `get_by_hash` /
//! `get_by_relpath` / `upsert` trio.

use anyhow::Result;
use chrono::Utc;

const RELPATH_PREFIX: &str = "relpath:";

pub fn relpath_key(relpath: &str) -> String {
    format!("{RELPATH_PREFIX}{relpath}")
}

pub fn is_relpath_key(key: &str) -> bool {
    key.starts_with(RELPATH_PREFIX)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceMapping {
    pub key: String,
    pub url: String,
    pub filename_hint: Option<String>,
    pub notes: Option<String>,
    pub relpath: Option<String>,
    pub added_at: String,
}

#[derive(Clone)]
pub struct SourceRegistry {
    store: crate::store::Store,
}

impl SourceRegistry {
    pub fn new(store: crate::store::Store) -> Self {
        SourceRegistry { store }
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<SourceMapping>> {
        self.get_by_key(hash).await
    }

    pub async fn get_by_relpath(&self, relpath: &str) -> Result<Option<SourceMapping>> {
        self.get_by_key(&relpath_key(relpath)).await
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<SourceMapping>> {
        let row: Option<(String, String, Option<String>, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                "SELECT key, url, filename_hint, notes, relpath, added_at FROM source_urls WHERE key = ?1",
            )
            .bind(key)
            .fetch_optional(self.store.pool())
            .await?;
        Ok(row.map(|(key, url, filename_hint, notes, relpath, added_at)| SourceMapping {
            key,
            url,
            filename_hint,
            notes,
            relpath,
            added_at,
        }))
    }

    /// Upsert a mapping keyed by content hash.
    pub async fn upsert_for_hash(
        &self,
        hash: &str,
        url: &str,
        filename_hint: Option<&str>,
        notes: Option<&str>,
    ) -> Result<()> {
        self.upsert(hash, url, filename_hint, notes, None).await
    }

    /// Upsert a mapping keyed by `relpath:<relpath>` for a not-yet-hashed file.
    pub async fn upsert_for_relpath(
        &self,
        relpath: &str,
        url: &str,
        filename_hint: Option<&str>,
        notes: Option<&str>,
    ) -> Result<()> {
        self.upsert(&relpath_key(relpath), url, filename_hint, notes, Some(relpath))
            .await
    }

    async fn upsert(
        &self,
        key: &str,
        url: &str,
        filename_hint: Option<&str>,
        notes: Option<&str>,
        relpath: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO source_urls (key, url, filename_hint, notes, relpath, added_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(key) DO UPDATE SET url = excluded.url, filename_hint = excluded.filename_hint, \
             notes = excluded.notes, relpath = excluded.relpath",
        )
        .bind(key)
        .bind(url)
        .bind(filename_hint)
        .bind(notes)
        .bind(relpath)
        .bind(&now)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_by_hash(&self, hash: &str) -> Result<()> {
        self.delete_key(hash).await
    }

    pub async fn delete_by_relpath(&self, relpath: &str) -> Result<()> {
        self.delete_key(&relpath_key(relpath)).await
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM source_urls WHERE key = ?1")
            .bind(key)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Migrate a `relpath:` mapping to be hash-keyed once the file acquires a
    /// hash.
    pub async fn migrate_relpath_to_hash(&self, relpath: &str, hash: &str) -> Result<bool> {
        let existing = match self.get_by_relpath(relpath).await? {
            Some(m) => m,
            None => return Ok(false),
        };
        self.upsert_for_hash(hash, &existing.url, existing.filename_hint.as_deref(), existing.notes.as_deref())
            .await?;
        self.delete_by_relpath(relpath).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn upsert_and_get_by_hash() {
        let store = Store::open_memory().await.unwrap();
        let reg = SourceRegistry::new(store);
        reg.upsert_for_hash("abc123", "https://example.com/f.bin", Some("f.bin"), None)
            .await
            .unwrap();
        let m = reg.get_by_hash("abc123").await.unwrap().unwrap();
        assert_eq!(m.url, "https://example.com/f.bin");
    }

    #[tokio::test]
    async fn relpath_keyed_mapping_round_trips() {
        let store = Store::open_memory().await.unwrap();
        let reg = SourceRegistry::new(store);
        reg.upsert_for_relpath("a/b.bin", "https://example.com/a", None, None)
            .await
            .unwrap();
        let m = reg.get_by_relpath("a/b.bin").await.unwrap().unwrap();
        assert!(is_relpath_key(&m.key));
        assert_eq!(m.relpath.as_deref(), Some("a/b.bin"));
    }

    #[tokio::test]
    async fn migrate_relpath_to_hash_deletes_relpath_row() {
        let store = Store::open_memory().await.unwrap();
        let reg = SourceRegistry::new(store);
        reg.upsert_for_relpath("a/b.bin", "https://example.com/a", Some("b.bin"), None)
            .await
            .unwrap();

        let migrated = reg.migrate_relpath_to_hash("a/b.bin", "hash123").await.unwrap();
        assert!(migrated);

        assert!(reg.get_by_relpath("a/b.bin").await.unwrap().is_none());
        let by_hash = reg.get_by_hash("hash123").await.unwrap().unwrap();
        assert_eq!(by_hash.url, "https://example.com/a");
    }

    #[tokio::test]
    async fn migrate_with_no_existing_mapping_is_noop() {
        let store = Store::open_memory().await.unwrap();
        let reg = SourceRegistry::new(store);
        let migrated = reg.migrate_relpath_to_hash("missing.bin", "h1").await.unwrap();
        assert!(!migrated);
    }
}
