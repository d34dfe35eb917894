//! SQLite-backed [`Store`] implementation.
//!
//! Every multi-row invariant is held by the database itself: `UNIQUE(sha256)`
//! collapses concurrent identical uploads, a partial unique index keeps one
//! active schema per file, and a `CHECK` ties lineage `status` to
//! `completed_at`. Multi-statement operations run in one transaction.
//!
//! Timestamps are stored as integer microseconds so values read back are
//! identical to the values written.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use custody_core::models::{
    AliasEntry, DiscoveryInfo, FileFormat, FileSchema, FileStatus, LineageEntry, LineageStatus,
    MatchType, Operation, ParsedRecord, RawFile, SchemaStatus, StorageLocation,
};
use custody_core::store::{InsertOutcome, LineageCount, LineageTransition, Store};

const RAW_FILE_COLUMNS: &str = "id, source_type, source_identifier, filename, format, size_bytes, \
     sha256, md5, metadata_json, storage_kind, blob_locator, status, error_message, created_at";

const LINEAGE_COLUMNS: &str = "id, raw_file_id, parsed_record_id, operation, status, details_json, \
     result_json, started_at, completed_at, error_message, error_trace";

const SCHEMA_COLUMNS: &str = "id, raw_file_id, filename, columns_json, total_rows, total_columns, \
     status, discovery_json, discovered_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| anyhow!("timestamp out of range: {}", micros))
}

fn parse_enum<T>(value: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| anyhow!("unknown {} in database: {}", kind, value))
}

fn raw_file_from_row(row: &SqliteRow) -> Result<RawFile> {
    let storage_kind: String = row.try_get("storage_kind")?;
    let storage = match storage_kind.as_str() {
        "inline" => StorageLocation::Inline,
        "blob" => StorageLocation::Blob {
            locator: row.try_get("blob_locator")?,
        },
        other => return Err(anyhow!("unknown storage kind in database: {}", other)),
    };
    let metadata_json: String = row.try_get("metadata_json")?;
    let format: String = row.try_get("format")?;
    let status: String = row.try_get("status")?;

    Ok(RawFile {
        id: row.try_get("id")?,
        source_type: row.try_get("source_type")?,
        source_identifier: row.try_get("source_identifier")?,
        filename: row.try_get("filename")?,
        format: parse_enum(&format, "file format", FileFormat::parse)?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        sha256: row.try_get("sha256")?,
        md5: row.try_get("md5")?,
        metadata: serde_json::from_str(&metadata_json)?,
        storage,
        status: parse_enum(&status, "file status", FileStatus::parse)?,
        error_message: row.try_get("error_message")?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ParsedRecord> {
    let data_json: String = row.try_get("data_json")?;
    let normalized_json: String = row.try_get("normalized_json")?;
    Ok(ParsedRecord {
        id: row.try_get("id")?,
        raw_file_id: row.try_get("raw_file_id")?,
        row_number: row.try_get::<i64, _>("row_number")? as u64,
        data: serde_json::from_str(&data_json)?,
        normalized_data: serde_json::from_str(&normalized_json)?,
        text_content: row.try_get("text_content")?,
        created_at: from_micros(row.try_get("created_at")?)?,
    })
}

fn lineage_from_row(row: &SqliteRow) -> Result<LineageEntry> {
    let operation: String = row.try_get("operation")?;
    let status: String = row.try_get("status")?;
    let details_json: String = row.try_get("details_json")?;
    let result_json: Option<String> = row.try_get("result_json")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    Ok(LineageEntry {
        id: row.try_get("id")?,
        raw_file_id: row.try_get("raw_file_id")?,
        parsed_record_id: row.try_get("parsed_record_id")?,
        operation: parse_enum(&operation, "operation", Operation::parse)?,
        status: parse_enum(&status, "lineage status", LineageStatus::parse)?,
        details: serde_json::from_str(&details_json)?,
        result: result_json.map(|j| serde_json::from_str(&j)).transpose()?,
        started_at: from_micros(row.try_get("started_at")?)?,
        completed_at: completed_at.map(from_micros).transpose()?,
        error_message: row.try_get("error_message")?,
        error_trace: row.try_get("error_trace")?,
    })
}

fn schema_from_row(row: &SqliteRow) -> Result<FileSchema> {
    let columns_json: String = row.try_get("columns_json")?;
    let discovery_json: String = row.try_get("discovery_json")?;
    let status: String = row.try_get("status")?;
    let discovery: DiscoveryInfo = serde_json::from_str(&discovery_json)?;
    Ok(FileSchema {
        id: row.try_get("id")?,
        raw_file_id: row.try_get("raw_file_id")?,
        filename: row.try_get("filename")?,
        columns: serde_json::from_str(&columns_json)?,
        total_rows: row.try_get::<i64, _>("total_rows")? as u64,
        total_columns: row.try_get::<i64, _>("total_columns")? as usize,
        status: parse_enum(&status, "schema status", SchemaStatus::parse)?,
        discovery,
        discovered_at: from_micros(row.try_get("discovered_at")?)?,
    })
}

fn alias_from_row(row: &SqliteRow) -> Result<AliasEntry> {
    let match_type: String = row.try_get("match_type")?;
    Ok(AliasEntry {
        file_schema_id: row.try_get("file_schema_id")?,
        alias: row.try_get("alias")?,
        original_column_name: row.try_get("original_column_name")?,
        match_type: parse_enum(&match_type, "match type", MatchType::parse)?,
        confidence: row.try_get("confidence")?,
    })
}

async fn insert_lineage_entry<'e, E>(executor: E, entry: &LineageEntry) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result_json = entry
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        r#"
        INSERT INTO lineage_entries (id, raw_file_id, parsed_record_id, operation, status,
                                     details_json, result_json, message_id, started_at,
                                     completed_at, error_message, error_trace)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.raw_file_id)
    .bind(&entry.parsed_record_id)
    .bind(entry.operation.as_str())
    .bind(entry.status.as_str())
    .bind(serde_json::to_string(&entry.details)?)
    .bind(result_json)
    .bind(entry.details.message_id())
    .bind(to_micros(entry.started_at))
    .bind(entry.completed_at.map(to_micros))
    .bind(&entry.error_message)
    .bind(&entry.error_trace)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_raw_file(
        &self,
        file: &RawFile,
        content: Option<&[u8]>,
        upload: &LineageEntry,
    ) -> Result<InsertOutcome> {
        let (storage_kind, blob_locator) = match &file.storage {
            StorageLocation::Inline => ("inline", None),
            StorageLocation::Blob { locator } => ("blob", Some(locator.as_str())),
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO raw_files (id, source_type, source_identifier, filename, format,
                                   size_bytes, sha256, md5, metadata_json, storage_kind,
                                   blob_locator, content, status, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sha256) DO NOTHING
            "#,
        )
        .bind(&file.id)
        .bind(&file.source_type)
        .bind(&file.source_identifier)
        .bind(&file.filename)
        .bind(file.format.as_str())
        .bind(file.size_bytes as i64)
        .bind(&file.sha256)
        .bind(&file.md5)
        .bind(serde_json::to_string(&file.metadata)?)
        .bind(storage_kind)
        .bind(blob_locator)
        .bind(content)
        .bind(file.status.as_str())
        .bind(&file.error_message)
        .bind(to_micros(file.created_at))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let row = sqlx::query(&format!(
                "SELECT {} FROM raw_files WHERE sha256 = ?",
                RAW_FILE_COLUMNS
            ))
            .bind(&file.sha256)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(InsertOutcome::Existing(raw_file_from_row(&row)?));
        }

        insert_lineage_entry(&mut *tx, upload).await?;
        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_raw_file(&self, id: &str) -> Result<Option<RawFile>> {
        let row = sqlx::query(&format!("SELECT {} FROM raw_files WHERE id = ?", RAW_FILE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(raw_file_from_row).transpose()
    }

    async fn get_raw_file_by_hash(&self, sha256: &str) -> Result<Option<RawFile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM raw_files WHERE sha256 = ?",
            RAW_FILE_COLUMNS
        ))
        .bind(sha256)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(raw_file_from_row).transpose()
    }

    async fn find_raw_files(
        &self,
        source_type: &str,
        source_identifier: Option<&str>,
    ) -> Result<Vec<RawFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM raw_files
             WHERE source_type = ? AND (? IS NULL OR source_identifier = ?)
             ORDER BY created_at DESC, rowid DESC",
            RAW_FILE_COLUMNS
        ))
        .bind(source_type)
        .bind(source_identifier)
        .bind(source_identifier)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(raw_file_from_row).collect()
    }

    async fn list_raw_files(&self) -> Result<Vec<RawFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM raw_files ORDER BY created_at DESC, rowid DESC",
            RAW_FILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(raw_file_from_row).collect()
    }

    async fn raw_file_content(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let content: Option<Option<Vec<u8>>> =
            sqlx::query_scalar("SELECT content FROM raw_files WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(content.flatten())
    }

    async fn update_raw_file_status(
        &self,
        id: &str,
        status: FileStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE raw_files SET status = ?, error_message = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error_message)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(anyhow!("raw file not found: {}", id));
        }
        Ok(())
    }

    async fn insert_records(&self, records: &[ParsedRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for record in records {
            inserted += sqlx::query(
                r#"
                INSERT INTO parsed_records (id, raw_file_id, row_number, data_json,
                                            normalized_json, text_content, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(raw_file_id, row_number) DO NOTHING
                "#,
            )
            .bind(&record.id)
            .bind(&record.raw_file_id)
            .bind(record.row_number as i64)
            .bind(serde_json::to_string(&record.data)?)
            .bind(serde_json::to_string(&record.normalized_data)?)
            .bind(&record.text_content)
            .bind(to_micros(record.created_at))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_record(&self, id: &str) -> Result<Option<ParsedRecord>> {
        let row = sqlx::query("SELECT * FROM parsed_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn records_for_file(
        &self,
        raw_file_id: &str,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<ParsedRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM parsed_records WHERE raw_file_id = ? ORDER BY row_number ASC LIMIT ? OFFSET ?",
        )
        .bind(raw_file_id)
        .bind(limit.map_or(-1, |l| l as i64))
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn count_records(&self, raw_file_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parsed_records WHERE raw_file_id = ?")
            .bind(raw_file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn insert_lineage(&self, entries: &[LineageEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            insert_lineage_entry(&mut *tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn finish_lineage(&self, id: &str, transition: &LineageTransition) -> Result<bool> {
        let result_json = transition
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let updated = sqlx::query(
            r#"
            UPDATE lineage_entries
            SET status = ?, result_json = ?, completed_at = ?, error_message = ?, error_trace = ?
            WHERE id = ? AND status = 'started'
            "#,
        )
        .bind(transition.status.as_str())
        .bind(result_json)
        .bind(to_micros(transition.completed_at))
        .bind(&transition.error_message)
        .bind(&transition.error_trace)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn get_lineage(&self, id: &str) -> Result<Option<LineageEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM lineage_entries WHERE id = ?",
            LINEAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(lineage_from_row).transpose()
    }

    async fn lineage_for_file(&self, raw_file_id: &str) -> Result<Vec<LineageEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM lineage_entries WHERE raw_file_id = ? ORDER BY started_at ASC, rowid ASC",
            LINEAGE_COLUMNS
        ))
        .bind(raw_file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lineage_from_row).collect()
    }

    async fn lineage_for_message(&self, message_id: &str) -> Result<Vec<LineageEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM lineage_entries WHERE message_id = ? ORDER BY started_at ASC, rowid ASC",
            LINEAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lineage_from_row).collect()
    }

    async fn lineage_counts(&self) -> Result<Vec<LineageCount>> {
        let rows = sqlx::query(
            "SELECT operation, status, COUNT(*) AS n FROM lineage_entries GROUP BY operation, status",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut counts = rows
            .iter()
            .map(|row| -> Result<LineageCount> {
                let operation: String = row.try_get("operation")?;
                let status: String = row.try_get("status")?;
                Ok(LineageCount {
                    operation: parse_enum(&operation, "operation", Operation::parse)?,
                    status: parse_enum(&status, "lineage status", LineageStatus::parse)?,
                    count: row.try_get::<i64, _>("n")? as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        counts.sort_by_key(|c| (c.operation, c.status));
        Ok(counts)
    }

    async fn activate_schema(
        &self,
        schema: &FileSchema,
        aliases: &[AliasEntry],
    ) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock from the start
        let demoted: Option<String> = sqlx::query_scalar(
            "UPDATE file_schemas SET status = 'outdated' WHERE raw_file_id = ? AND status = 'active' RETURNING id",
        )
        .bind(&schema.raw_file_id)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO file_schemas (id, raw_file_id, filename, columns_json, total_rows,
                                      total_columns, status, discovery_json, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(&schema.id)
        .bind(&schema.raw_file_id)
        .bind(&schema.filename)
        .bind(serde_json::to_string(&schema.columns)?)
        .bind(schema.total_rows as i64)
        .bind(schema.total_columns as i64)
        .bind(serde_json::to_string(&schema.discovery)?)
        .bind(to_micros(schema.discovered_at))
        .execute(&mut *tx)
        .await?;

        for alias in aliases {
            sqlx::query(
                r#"
                INSERT INTO alias_entries (file_schema_id, alias, original_column_name,
                                           match_type, confidence)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&alias.file_schema_id)
            .bind(&alias.alias)
            .bind(&alias.original_column_name)
            .bind(alias.match_type.as_str())
            .bind(alias.confidence)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(demoted)
    }

    async fn get_schema(&self, id: &str) -> Result<Option<FileSchema>> {
        let row = sqlx::query(&format!("SELECT {} FROM file_schemas WHERE id = ?", SCHEMA_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schema_from_row).transpose()
    }

    async fn active_schema(&self, raw_file_id: &str) -> Result<Option<FileSchema>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_schemas WHERE raw_file_id = ? AND status = 'active'",
            SCHEMA_COLUMNS
        ))
        .bind(raw_file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(schema_from_row).transpose()
    }

    async fn active_schemas(&self) -> Result<Vec<FileSchema>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM file_schemas WHERE status = 'active' ORDER BY discovered_at ASC, rowid ASC",
            SCHEMA_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schema_from_row).collect()
    }

    async fn schema_history(&self, raw_file_id: &str) -> Result<Vec<FileSchema>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM file_schemas WHERE raw_file_id = ? ORDER BY discovered_at DESC, rowid DESC",
            SCHEMA_COLUMNS
        ))
        .bind(raw_file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schema_from_row).collect()
    }

    async fn lookup_alias(
        &self,
        alias: &str,
        file_schema_id: Option<&str>,
    ) -> Result<Vec<AliasEntry>> {
        let rows = match file_schema_id {
            Some(schema_id) => {
                sqlx::query("SELECT * FROM alias_entries WHERE alias = ? AND file_schema_id = ?")
                    .bind(alias)
                    .bind(schema_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT a.* FROM alias_entries a
                    JOIN file_schemas s ON s.id = a.file_schema_id
                    WHERE a.alias = ? AND s.status = 'active'
                    "#,
                )
                .bind(alias)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(alias_from_row).collect()
    }

    async fn aliases_for_schema(&self, file_schema_id: &str) -> Result<Vec<AliasEntry>> {
        let rows = sqlx::query("SELECT * FROM alias_entries WHERE file_schema_id = ? ORDER BY rowid")
            .bind(file_schema_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(alias_from_row).collect()
    }
}
