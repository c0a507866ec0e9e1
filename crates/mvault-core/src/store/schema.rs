//! Idempotent schema creation for the nine durable tables.

use anyhow::Result;
use sqlx::{Pool, Sqlite};

/// Bumped whenever a migration adds a table or column. Not required by the
/// schema-probe approach itself (see `migrate`), but kept as a cheap
/// forward-compat marker — see DESIGN.md.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS file_index (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    side TEXT NOT NULL CHECK (side IN ('local', 'lake')),
    relpath TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    hash TEXT,
    hash_computed_at TEXT,
    indexed_at TEXT NOT NULL,
    UNIQUE(side, relpath)
);

CREATE INDEX IF NOT EXISTS idx_file_index_side ON file_index(side);
CREATE INDEX IF NOT EXISTS idx_file_index_relpath ON file_index(relpath);
CREATE INDEX IF NOT EXISTS idx_file_index_hash ON file_index(hash) WHERE hash IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_file_index_size ON file_index(size);

CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type TEXT NOT NULL CHECK (task_type IN ('copy', 'move', 'delete', 'verify', 'dedupe_scan', 'hash_file')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
    src_side TEXT,
    src_relpath TEXT,
    dst_side TEXT,
    dst_relpath TEXT,
    size_bytes INTEGER,
    bytes_transferred INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    verify_folder TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);

CREATE TABLE IF NOT EXISTS dedupe_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    side TEXT NOT NULL CHECK (side IN ('local', 'lake')),
    hash TEXT NOT NULL,
    scan_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dedupe_groups_scan ON dedupe_groups(scan_id);

CREATE TABLE IF NOT EXISTS dedupe_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES dedupe_groups(id) ON DELETE CASCADE,
    relpath TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    keep INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS source_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    filename_hint TEXT,
    notes TEXT,
    relpath TEXT,
    added_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_source_urls_key ON source_urls(key);
CREATE INDEX IF NOT EXISTS idx_source_urls_relpath ON source_urls(relpath) WHERE relpath IS NOT NULL;

CREATE TABLE IF NOT EXISTS safetensors_cache (
    key TEXT PRIMARY KEY,
    side TEXT NOT NULL CHECK (side IN ('local', 'lake')),
    relpath TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    payload_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_safetensors_cache_relpath ON safetensors_cache(relpath);

CREATE TABLE IF NOT EXISTS download_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    filename TEXT,
    provider TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('queued', 'running', 'completed', 'failed', 'cancelled')),
    bytes_downloaded INTEGER NOT NULL DEFAULT 0,
    total_bytes INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    dest_path TEXT,
    temp_path TEXT,
    target_root TEXT,
    record_source INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_download_jobs_status ON download_jobs(status);

CREATE TABLE IF NOT EXISTS ai_lookup_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
    filename TEXT NOT NULL,
    relpath TEXT,
    file_hash TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ai_lookup_status ON ai_lookup_jobs(status);

CREATE TABLE IF NOT EXISTS bundles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bundle_assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bundle_id INTEGER NOT NULL REFERENCES bundles(id) ON DELETE CASCADE,
    relpath TEXT NOT NULL,
    hash TEXT,
    source_url_override TEXT,
    UNIQUE(bundle_id, relpath)
);

CREATE INDEX IF NOT EXISTS idx_bundle_assets_bundle ON bundle_assets(bundle_id);
CREATE INDEX IF NOT EXISTS idx_bundle_assets_relpath ON bundle_assets(relpath);
"#;

pub async fn create_all(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

/// Standalone DDL for `queue`, used by the migration probe to recreate the
/// table under its current constraint without re-running the whole schema.
pub const SCHEMA_VERSION_QUEUE_DDL: &str = r#"
CREATE TABLE queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_type TEXT NOT NULL CHECK (task_type IN ('copy', 'move', 'delete', 'verify', 'dedupe_scan', 'hash_file')),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
    src_side TEXT,
    src_relpath TEXT,
    dst_side TEXT,
    dst_relpath TEXT,
    size_bytes INTEGER,
    bytes_transferred INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    verify_folder TEXT
);
CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);
"#;
