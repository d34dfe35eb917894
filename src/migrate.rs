use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Raw files: immutable apart from status/error_message
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_files (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            source_identifier TEXT,
            filename TEXT NOT NULL,
            format TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL UNIQUE,
            md5 TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            storage_kind TEXT NOT NULL CHECK (storage_kind IN ('inline', 'blob')),
            blob_locator TEXT,
            content BLOB,
            status TEXT NOT NULL CHECK (status IN ('stored', 'parsing', 'parsed', 'failed')),
            error_message TEXT,
            created_at INTEGER NOT NULL,
            CHECK ((storage_kind = 'blob') = (blob_locator IS NOT NULL))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parsed_records (
            id TEXT PRIMARY KEY,
            raw_file_id TEXT NOT NULL,
            row_number INTEGER NOT NULL CHECK (row_number >= 1),
            data_json TEXT NOT NULL,
            normalized_json TEXT NOT NULL,
            text_content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(raw_file_id, row_number),
            FOREIGN KEY (raw_file_id) REFERENCES raw_files(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lineage: status and completed_at always move together
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lineage_entries (
            id TEXT PRIMARY KEY,
            raw_file_id TEXT NOT NULL,
            parsed_record_id TEXT,
            operation TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('started', 'completed', 'failed')),
            details_json TEXT NOT NULL,
            result_json TEXT,
            message_id TEXT,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            error_message TEXT,
            error_trace TEXT,
            CHECK ((status = 'started') = (completed_at IS NULL)),
            FOREIGN KEY (raw_file_id) REFERENCES raw_files(id),
            FOREIGN KEY (parsed_record_id) REFERENCES parsed_records(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_schemas (
            id TEXT PRIMARY KEY,
            raw_file_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            columns_json TEXT NOT NULL,
            total_rows INTEGER NOT NULL,
            total_columns INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('active', 'outdated', 'deprecated')),
            discovery_json TEXT NOT NULL,
            discovered_at INTEGER NOT NULL,
            FOREIGN KEY (raw_file_id) REFERENCES raw_files(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alias_entries (
            file_schema_id TEXT NOT NULL,
            alias TEXT NOT NULL,
            original_column_name TEXT NOT NULL,
            match_type TEXT NOT NULL,
            confidence REAL NOT NULL,
            PRIMARY KEY (file_schema_id, alias),
            FOREIGN KEY (file_schema_id) REFERENCES file_schemas(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One active schema per raw file
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_file_schemas_active ON file_schemas(raw_file_id) WHERE status = 'active'",
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_file_schemas_raw_file ON file_schemas(raw_file_id, discovered_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_raw_files_source ON raw_files(source_type, source_identifier)",
        "CREATE INDEX IF NOT EXISTS idx_raw_files_created_at ON raw_files(created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_lineage_raw_file ON lineage_entries(raw_file_id, started_at)",
        "CREATE INDEX IF NOT EXISTS idx_lineage_message ON lineage_entries(message_id) WHERE message_id IS NOT NULL",
        "CREATE INDEX IF NOT EXISTS idx_alias_entries_alias ON alias_entries(alias)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
