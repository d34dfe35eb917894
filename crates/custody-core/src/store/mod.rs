//! Storage abstraction for Custody.
//!
//! The [`Store`] trait defines every persistence operation the custody
//! services need, so backends (SQLite in the `custody` crate, the in-memory
//! store here) are interchangeable. [`BlobStore`] holds the bytes of files
//! too large to keep inline.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must honour the atomicity each method documents: the services rely on
//! the store for every cross-task invariant.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    AliasEntry, FileSchema, FileStatus, LineageEntry, LineageStatus, Operation, OperationResult,
    ParsedRecord, RawFile,
};

/// Outcome of inserting a raw file keyed by its SHA-256.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The file (and its upload entry) was persisted.
    Inserted,
    /// A file with the same hash already existed; nothing was written.
    Existing(RawFile),
}

/// Terminal transition for a `started` lineage entry.
#[derive(Debug, Clone)]
pub struct LineageTransition {
    pub status: LineageStatus,
    pub result: Option<OperationResult>,
    pub completed_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

/// Number of lineage entries per operation and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageCount {
    pub operation: Operation,
    pub status: LineageStatus,
    pub count: u64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_raw_file`](Store::insert_raw_file) | Hash-deduplicated insert plus upload entry, atomically |
/// | [`finish_lineage`](Store::finish_lineage) | Conditional `started` → terminal transition |
/// | [`activate_schema`](Store::activate_schema) | Demote prior schema, insert new one and its aliases, atomically |
/// | [`lookup_alias`](Store::lookup_alias) | Exact alias lookup, optionally scoped to one schema |
#[async_trait]
pub trait Store: Send + Sync {
    // ── Raw files ──

    /// Insert `file` and its completed upload entry unless a file with the
    /// same SHA-256 exists. The existence check and the insert must be one
    /// atomic unit so concurrent identical uploads yield one row.
    ///
    /// `content` carries the bytes for inline storage.
    async fn insert_raw_file(
        &self,
        file: &RawFile,
        content: Option<&[u8]>,
        upload: &LineageEntry,
    ) -> Result<InsertOutcome>;

    async fn get_raw_file(&self, id: &str) -> Result<Option<RawFile>>;

    async fn get_raw_file_by_hash(&self, sha256: &str) -> Result<Option<RawFile>>;

    /// Files from a source, newest first.
    async fn find_raw_files(
        &self,
        source_type: &str,
        source_identifier: Option<&str>,
    ) -> Result<Vec<RawFile>>;

    /// All files, newest first.
    async fn list_raw_files(&self) -> Result<Vec<RawFile>>;

    /// Inline bytes of a file, if it is stored inline.
    async fn raw_file_content(&self, id: &str) -> Result<Option<Vec<u8>>>;

    async fn update_raw_file_status(
        &self,
        id: &str,
        status: FileStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    // ── Parsed records ──

    /// Insert records, ignoring any whose `(raw_file_id, row_number)`
    /// already exists. Returns the number inserted.
    async fn insert_records(&self, records: &[ParsedRecord]) -> Result<u64>;

    async fn get_record(&self, id: &str) -> Result<Option<ParsedRecord>>;

    /// Records of a file ordered by row number.
    async fn records_for_file(
        &self,
        raw_file_id: &str,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<ParsedRecord>>;

    async fn count_records(&self, raw_file_id: &str) -> Result<u64>;

    // ── Lineage ──

    async fn insert_lineage(&self, entries: &[LineageEntry]) -> Result<()>;

    /// Apply `transition` only if the entry is still `started`. Returns
    /// `false` when the entry is missing or already terminal. Status and
    /// completion time must change together.
    async fn finish_lineage(&self, id: &str, transition: &LineageTransition) -> Result<bool>;

    async fn get_lineage(&self, id: &str) -> Result<Option<LineageEntry>>;

    /// Entries of a file ordered by start time.
    async fn lineage_for_file(&self, raw_file_id: &str) -> Result<Vec<LineageEntry>>;

    /// Retrieval entries logged for a chat message, ordered by start time.
    async fn lineage_for_message(&self, message_id: &str) -> Result<Vec<LineageEntry>>;

    async fn lineage_counts(&self) -> Result<Vec<LineageCount>>;

    // ── Schemas and aliases ──

    /// Mark the current active schema of `schema.raw_file_id` outdated,
    /// insert `schema` as active along with `aliases`, all atomically.
    /// Returns the id of the demoted schema, if any.
    async fn activate_schema(
        &self,
        schema: &FileSchema,
        aliases: &[AliasEntry],
    ) -> Result<Option<String>>;

    async fn get_schema(&self, id: &str) -> Result<Option<FileSchema>>;

    async fn active_schema(&self, raw_file_id: &str) -> Result<Option<FileSchema>>;

    async fn active_schemas(&self) -> Result<Vec<FileSchema>>;

    /// Every schema ever discovered for a file, newest first.
    async fn schema_history(&self, raw_file_id: &str) -> Result<Vec<FileSchema>>;

    /// Entries whose alias equals `alias`. Unscoped lookups consider only
    /// active schemas.
    async fn lookup_alias(
        &self,
        alias: &str,
        file_schema_id: Option<&str>,
    ) -> Result<Vec<AliasEntry>>;

    async fn aliases_for_schema(&self, file_schema_id: &str) -> Result<Vec<AliasEntry>>;
}

/// Content-addressed byte storage for files kept by reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under their hash; returns the locator to record.
    async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<String>;

    /// Read back the bytes at `locator`, or `None` if they are gone.
    async fn get(&self, locator: &str) -> Result<Option<Vec<u8>>>;
}
