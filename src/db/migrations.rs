// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;
use anyhow::Result;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE sources (
        id TEXT PRIMARY KEY NOT NULL,
        path TEXT NOT NULL UNIQUE,
        mode TEXT NOT NULL DEFAULT 'scanOnce' CHECK (mode IN ('scanOnce', 'watch')),
        enabled INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL DEFAULT 'IDLE' CHECK (status IN ('IDLE', 'SCANNING', 'OK', 'ERROR')),
        scanned_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE files (
        id TEXT PRIMARY KEY NOT NULL,
        path TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        extension TEXT,
        size INTEGER NOT NULL DEFAULT 0,
        hash TEXT,
        is_directory INTEGER NOT NULL DEFAULT 0,
        mime_type TEXT,
        parent_id TEXT REFERENCES files(id) ON DELETE CASCADE,
        source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        modified_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE media (
        id TEXT PRIMARY KEY NOT NULL,
        file_id TEXT NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
        source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        type TEXT NOT NULL CHECK (type IN ('image', 'video')),
        mime_type TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE metadata (
        media_id TEXT PRIMARY KEY NOT NULL REFERENCES media(id) ON DELETE CASCADE,
        width INTEGER,
        height INTEGER,
        duration REAL,
        date_taken TEXT,
        make TEXT,
        model TEXT,
        lens TEXT,
        iso INTEGER,
        f_number REAL,
        exposure_time REAL,
        fps REAL,
        codec TEXT,
        bitrate INTEGER,
        raw TEXT NOT NULL DEFAULT '{}',
        sidecar_file_id TEXT REFERENCES files(id) ON DELETE SET NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE thumbnails (
        media_id TEXT NOT NULL REFERENCES media(id) ON DELETE CASCADE,
        size TEXT NOT NULL,
        path TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        PRIMARY KEY (media_id, size)
    );

    CREATE TABLE settings (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    );

    -- Job ledger: one row per submitted unit of work
    CREATE TABLE job_runs (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        type TEXT NOT NULL CHECK (type IN ('scan', 'metadata', 'thumbnail', 'preview')),
        status TEXT NOT NULL DEFAULT 'queued'
            CHECK (status IN ('queued', 'running', 'completed', 'failed')),
        data TEXT NOT NULL DEFAULT '{}',
        progress INTEGER NOT NULL DEFAULT 0,
        result TEXT,
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        started_at TEXT,
        completed_at TEXT
    );

    -- Broker: durable per-type queues, correlated to job_runs by id
    CREATE TABLE broker_queues (
        name TEXT PRIMARY KEY NOT NULL,
        paused INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE broker_jobs (
        id TEXT PRIMARY KEY NOT NULL,
        queue TEXT NOT NULL,
        payload TEXT NOT NULL DEFAULT '{}',
        state TEXT NOT NULL DEFAULT 'waiting'
            CHECK (state IN ('waiting', 'active', 'completed', 'failed')),
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        available_at INTEGER NOT NULL,
        last_error TEXT,
        claimed_by TEXT,
        created_at INTEGER NOT NULL,
        finished_at INTEGER
    );

    CREATE INDEX idx_files_parent ON files(parent_id);
    CREATE INDEX idx_files_source ON files(source_id);
    CREATE INDEX idx_media_source ON media(source_id);
    CREATE INDEX idx_media_type ON media(type);
    CREATE INDEX idx_job_runs_type_status ON job_runs(type, status);
    CREATE INDEX idx_broker_jobs_claim ON broker_jobs(queue, state, available_at);
    CREATE INDEX idx_broker_jobs_history ON broker_jobs(queue, state, finished_at);
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "PRAGMA user_version",
        [],
        |row| row.get(0)
    )?;
    Ok(version)
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a DB created by a newer build
    if current_version > target_version {
        anyhow::bail!(
            "Database schema version {} is newer than this build supports (max {})",
            current_version,
            target_version
        );
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}
