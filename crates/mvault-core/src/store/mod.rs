//! Embedded relational store: schema, migration, WAL mode.
//!
//! One SQLite database backs every durable entity in the vault — file
//! index, queue, dedupe snapshots, source mappings, download jobs, and
//! bundles. Connection handling and the migration-probe pattern follow a
//! conventional embedded-sqlite resume-db shape, generalized here to all
//! nine tables rather than a single `jobs` table.

mod migrate;
mod schema;

pub use schema::SCHEMA_VERSION;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Handle to the SQLite-backed store.
///
/// The database file lives under the app-data directory resolved by
/// `config::app_data_dir` (XDG state dir by default): `vault.db`.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Sqlite>,
}

impl Store {
    /// Open (or create) the store at `app_data_dir/vault.db`, run schema
    /// creation and migration, and set WAL + NORMAL sync pragmas.
    pub async fn open(app_data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(app_data_dir).await?;
        let db_path = app_data_dir.join("vault.db");
        let uri = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await
            .with_context(|| format!("opening store at {}", db_path.display()))?;

        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON;")
            .execute(&pool)
            .await?;

        let store = Store { pool };
        schema::create_all(&store.pool).await?;
        migrate::run(&store.pool).await?;
        store.recover_startup_state().await?;
        Ok(store)
    }

    /// In-memory store for tests: single connection so the schema survives
    /// across queries (SQLite's `:memory:` is per-connection otherwise).
    #[cfg(test)]
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON;")
            .execute(&pool)
            .await?;
        let store = Store { pool };
        schema::create_all(&store.pool).await?;
        migrate::run(&store.pool).await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Reset orphaned `running` rows left by an unclean shutdown: queue
    /// tasks go back to `pending`, download jobs back to `queued`.
    async fn recover_startup_state(&self) -> Result<()> {
        let n = sqlx::query("UPDATE queue SET status = 'pending' WHERE status = 'running'")
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n > 0 {
            tracing::warn!(count = n, "reset orphaned running queue tasks to pending");
        }

        let n = sqlx::query("UPDATE download_jobs SET status = 'queued' WHERE status = 'running'")
            .execute(&self.pool)
            .await?
            .rows_affected();
        if n > 0 {
            tracing::warn!(count = n, "reset orphaned running download jobs to queued");
        }
        Ok(())
    }

    /// Issue `PRAGMA optimize` on clean shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        sqlx::query("PRAGMA optimize;").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_memory_creates_schema() {
        let store = Store::open_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_index")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn recover_startup_state_resets_orphans() {
        let store = Store::open_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO queue (task_type, status, created_at) VALUES ('delete', 'running', '2020-01-01')",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        store.recover_startup_state().await.unwrap();
        let row: (String,) = sqlx::query_as("SELECT status FROM queue LIMIT 1")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(row.0, "pending");
    }
}
