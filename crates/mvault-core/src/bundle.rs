//! Bundles: named collections of relpaths resolved by the asset resolver.
//!
//! Minimal CRUD grounded in `original_source/app/services/bundle_service.py`:
//! create/list/get/add-asset/remove-asset. `resolve_bundles`'s size-split
//! logic itself lives in `resolver::AssetResolver::resolve_bundle`; this
//! module only owns the named-collection bookkeeping it resolves over.

use crate::store::Store;
use anyhow::Result;
use chrono::Utc;

#[derive(Debug, Clone, serde::Serialize)]
pub struct BundleAsset {
    pub relpath: String,
    pub hash: Option<String>,
    pub source_url_override: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Bundle {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone)]
pub struct BundleRegistry {
    store: Store,
}

impl BundleRegistry {
    pub fn new(store: Store) -> Self {
        BundleRegistry { store }
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<Bundle> {
        let now = Utc::now().to_rfc3339();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO bundles (name, description, created_at, updated_at) VALUES (?1, ?2, ?3, ?3) RETURNING id",
        )
        .bind(name)
        .bind(description)
        .bind(&now)
        .fetch_one(self.store.pool())
        .await?;
        Ok(Bundle {
            id: row.0,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn list(&self) -> Result<Vec<Bundle>> {
        let rows: Vec<(i64, String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM bundles ORDER BY name",
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, description, created_at, updated_at)| Bundle { id, name, description, created_at, updated_at })
            .collect())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Bundle>> {
        let row: Option<(i64, String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT id, name, description, created_at, updated_at FROM bundles WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(|(id, name, description, created_at, updated_at)| Bundle { id, name, description, created_at, updated_at }))
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bundles WHERE name = ?1")
            .bind(name)
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn assets(&self, bundle_id: i64) -> Result<Vec<BundleAsset>> {
        let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT relpath, hash, source_url_override FROM bundle_assets WHERE bundle_id = ?1 ORDER BY relpath",
        )
        .bind(bundle_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(relpath, hash, source_url_override)| BundleAsset { relpath, hash, source_url_override })
            .collect())
    }

    /// Add (or replace) one asset in a bundle by name.
    pub async fn add_asset(&self, bundle_name: &str, relpath: &str, hash: Option<&str>, source_url_override: Option<&str>) -> Result<bool> {
        let bundle = match self.get(bundle_name).await? {
            Some(b) => b,
            None => return Ok(false),
        };
        sqlx::query(
            "INSERT INTO bundle_assets (bundle_id, relpath, hash, source_url_override) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(bundle_id, relpath) DO UPDATE SET hash = excluded.hash, source_url_override = excluded.source_url_override",
        )
        .bind(bundle.id)
        .bind(relpath)
        .bind(hash)
        .bind(source_url_override)
        .execute(self.store.pool())
        .await?;
        self.touch(bundle.id).await?;
        Ok(true)
    }

    pub async fn remove_asset(&self, bundle_name: &str, relpath: &str) -> Result<bool> {
        let bundle = match self.get(bundle_name).await? {
            Some(b) => b,
            None => return Ok(false),
        };
        let result = sqlx::query("DELETE FROM bundle_assets WHERE bundle_id = ?1 AND relpath = ?2")
            .bind(bundle.id)
            .bind(relpath)
            .execute(self.store.pool())
            .await?;
        if result.rows_affected() > 0 {
            self.touch(bundle.id).await?;
        }
        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, bundle_id: i64) -> Result<()> {
        sqlx::query("UPDATE bundles SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(bundle_id)
            .execute(self.store.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_list_and_get_round_trip() {
        let store = Store::open_memory().await.unwrap();
        let reg = BundleRegistry::new(store);
        reg.create("sdxl-base", Some("base checkpoint set")).await.unwrap();
        let all = reg.list().await.unwrap();
        assert_eq!(all.len(), 1);
        let found = reg.get("sdxl-base").await.unwrap().unwrap();
        assert_eq!(found.description.as_deref(), Some("base checkpoint set"));
    }

    #[tokio::test]
    async fn add_and_remove_asset() {
        let store = Store::open_memory().await.unwrap();
        let reg = BundleRegistry::new(store);
        let bundle = reg.create("pack", None).await.unwrap();
        assert!(reg.add_asset("pack", "a.safetensors", Some("h1"), None).await.unwrap());
        let assets = reg.assets(bundle.id).await.unwrap();
        assert_eq!(assets.len(), 1);
        assert!(reg.remove_asset("pack", "a.safetensors").await.unwrap());
        assert!(reg.assets(bundle.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_asset_to_missing_bundle_returns_false() {
        let store = Store::open_memory().await.unwrap();
        let reg = BundleRegistry::new(store);
        assert!(!reg.add_asset("missing", "a.bin", None, None).await.unwrap());
    }

    #[tokio::test]
    async fn delete_bundle_cascades_assets() {
        let store = Store::open_memory().await.unwrap();
        let reg = BundleRegistry::new(store.clone());
        let bundle = reg.create("pack", None).await.unwrap();
        reg.add_asset("pack", "a.bin", None, None).await.unwrap();
        assert!(reg.delete("pack").await.unwrap());
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bundle_assets WHERE bundle_id = ?1")
            .bind(bundle.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
