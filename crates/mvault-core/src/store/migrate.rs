//! Schema-shape migration probe.
//!
//! On startup, for each table whose `CHECK` constraint may have grown a new
//! enum value since an earlier schema version, attempt an insert of a
//! representative row for the new value inside a transaction, then roll the
//! transaction back. If the constraint rejects it, the table is renamed
//! aside, recreated with the current constraint, data is copied forward
//! (preserving any columns present in both old and new shapes), and the old
//! table is dropped. This is additive and forward-compatible; no
//! down-migration is ever needed.
//!
//! Ported from the original's `startup_db()`, which ran this dance solely
//! for `queue.task_type` gaining `move`; generalized here to run the same
//! probe against any `(table, probe_sql)` pair so a future enum addition
//! doesn't need a bespoke migration function.

use anyhow::Result;
use sqlx::{Pool, Row, Sqlite};

struct EnumProbe {
    table: &'static str,
    /// INSERT statement using the *new* constraint's full value set, run
    /// inside a transaction that is always rolled back. A constraint
    /// violation here means the live table's CHECK is stale.
    probe_insert: &'static str,
    create_new: &'static str,
    /// Columns common to both the old and new table shape, used for the
    /// forward copy. `id` is always included implicitly.
    shared_columns: &'static str,
}

/// Migrations that have shipped so far. Each entry is idempotent: if the
/// live table already accepts the probe insert, nothing happens.
fn probes() -> Vec<EnumProbe> {
    vec![EnumProbe {
        table: "queue",
        probe_insert: "INSERT INTO queue (task_type, created_at) VALUES ('move', '2000-01-01T00:00:00Z')",
        create_new: crate::store::schema::SCHEMA_VERSION_QUEUE_DDL,
        shared_columns: "id, task_type, status, src_side, src_relpath, dst_side, dst_relpath, \
             size_bytes, bytes_transferred, error_message, retry_count, created_at, started_at, \
             completed_at, verify_folder",
    }]
}

pub async fn run(pool: &Pool<Sqlite>) -> Result<()> {
    for probe in probes() {
        migrate_one(pool, &probe).await?;
    }
    Ok(())
}

async fn table_exists(pool: &Pool<Sqlite>, table: &str) -> Result<bool> {
    let row = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
        .bind(table)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn migrate_one(pool: &Pool<Sqlite>, probe: &EnumProbe) -> Result<()> {
    if !table_exists(pool, probe.table).await? {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    let probe_result = sqlx::query(probe.probe_insert).execute(&mut *tx).await;
    // Always roll back: this was only a constraint check, never a real write.
    tx.rollback().await?;

    if probe_result.is_ok() {
        return Ok(());
    }

    tracing::info!(table = probe.table, "migrating table to updated constraint");

    let old_table = format!("{}_old", probe.table);
    sqlx::query(&format!("DROP TABLE IF EXISTS {old_table}"))
        .execute(pool)
        .await?;
    sqlx::query(&format!("ALTER TABLE {} RENAME TO {old_table}", probe.table))
        .execute(pool)
        .await?;
    sqlx::query(probe.create_new).execute(pool).await?;

    let old_columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info({old_table})"))
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    let copy_columns: Vec<&str> = probe
        .shared_columns
        .split(", ")
        .filter(|c| old_columns.iter().any(|oc| oc == c))
        .collect();
    let column_list = copy_columns.join(", ");

    sqlx::query(&format!(
        "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {old_table}",
        probe.table
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!("DROP TABLE {old_table}"))
        .execute(pool)
        .await?;

    tracing::info!(table = probe.table, "migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migration_is_idempotent_on_current_schema() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::store::schema::create_all(&pool).await.unwrap();
        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn migrates_legacy_queue_table_without_move() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL CHECK (task_type IN ('copy', 'delete')),
                status TEXT NOT NULL DEFAULT 'pending',
                src_side TEXT, src_relpath TEXT, dst_side TEXT, dst_relpath TEXT,
                size_bytes INTEGER, bytes_transferred INTEGER NOT NULL DEFAULT 0,
                error_message TEXT, retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL, started_at TEXT, completed_at TEXT, verify_folder TEXT
            );
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO queue (task_type, created_at) VALUES ('copy', '2020-01-01')")
            .execute(&pool)
            .await
            .unwrap();

        run(&pool).await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT task_type FROM queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, "copy");

        // Now 'move' should be accepted by the migrated constraint.
        sqlx::query("INSERT INTO queue (task_type, created_at) VALUES ('move', '2020-01-02')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
