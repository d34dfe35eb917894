//! Core data models for Custody.
//!
//! These types flow through the full ingestion pipeline:
//!
//! ```text
//! bytes ──▶ RawFile ──▶ ParsedRecord ──▶ FileSchema + AliasEntry
//!              │              │                 │
//!              └──────────────┴──── LineageEntry ┘
//! ```
//!
//! A [`RawFile`] is the source of truth. Records, schemas, and lineage
//! entries reference it by id and never own it.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current UTC time truncated to microsecond precision.
///
/// Every persisted timestamp goes through this so that values survive a
/// storage round-trip unchanged and signatures recompute identically.
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── Raw files ───────────────────────────────────────────────────────

/// Declared format of an uploaded file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Tsv,
    Txt,
    Json,
    Xml,
    Pdf,
    Xlsx,
    Other,
}

impl FileFormat {
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => FileFormat::Csv,
            "tsv" | "tab" => FileFormat::Tsv,
            "txt" => FileFormat::Txt,
            "json" => FileFormat::Json,
            "xml" => FileFormat::Xml,
            "pdf" => FileFormat::Pdf,
            "xlsx" | "xls" => FileFormat::Xlsx,
            _ => FileFormat::Other,
        }
    }

    /// Whether the row extractor can read this format as delimited text.
    pub fn is_tabular(self) -> bool {
        matches!(self, FileFormat::Csv | FileFormat::Tsv | FileFormat::Txt)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Tsv => "tsv",
            FileFormat::Txt => "txt",
            FileFormat::Json => "json",
            FileFormat::Xml => "xml",
            FileFormat::Pdf => "pdf",
            FileFormat::Xlsx => "xlsx",
            FileFormat::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "csv" => FileFormat::Csv,
            "tsv" => FileFormat::Tsv,
            "txt" => FileFormat::Txt,
            "json" => FileFormat::Json,
            "xml" => FileFormat::Xml,
            "pdf" => FileFormat::Pdf,
            "xlsx" => FileFormat::Xlsx,
            "other" => FileFormat::Other,
            _ => return None,
        })
    }
}

/// Processing status of a raw file.
///
/// This is the only mutable part of a [`RawFile`]; the bytes and hashes
/// never change after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Stored,
    Parsing,
    Parsed,
    Failed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Stored => "stored",
            FileStatus::Parsing => "parsing",
            FileStatus::Parsed => "parsed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "stored" => FileStatus::Stored,
            "parsing" => FileStatus::Parsing,
            "parsed" => FileStatus::Parsed,
            "failed" => FileStatus::Failed,
            _ => return None,
        })
    }
}

/// Where the bytes of a raw file live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageLocation {
    /// Bytes are held by the [`Store`](crate::store::Store) next to the row.
    Inline,
    /// Bytes are held by a [`BlobStore`](crate::store::BlobStore) under `locator`.
    Blob { locator: String },
}

/// An immutable, content-addressed source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFile {
    pub id: String,
    pub source_type: String,
    pub source_identifier: Option<String>,
    pub filename: String,
    pub format: FileFormat,
    pub size_bytes: u64,
    /// Lowercase hex SHA-256 of the bytes. Globally unique.
    pub sha256: String,
    pub md5: String,
    pub metadata: Map<String, Value>,
    pub storage: StorageLocation,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Parsed records ──────────────────────────────────────────────────

/// One data row extracted from a raw file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub id: String,
    pub raw_file_id: String,
    /// 1-based position of the row after the header line in the source.
    pub row_number: u64,
    /// Original column name to original value, in column order.
    pub data: IndexMap<String, String>,
    /// Normalized column name to typed value.
    pub normalized_data: IndexMap<String, Value>,
    pub text_content: String,
    pub created_at: DateTime<Utc>,
}

// ── Lineage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Upload,
    Download,
    Parse,
    Embed,
    Index,
    Retrieval,
    Transform,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
            Operation::Parse => "parse",
            Operation::Embed => "embed",
            Operation::Index => "index",
            Operation::Retrieval => "retrieval",
            Operation::Transform => "transform",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "upload" => Operation::Upload,
            "download" => Operation::Download,
            "parse" => Operation::Parse,
            "embed" => Operation::Embed,
            "index" => Operation::Index,
            "retrieval" => Operation::Retrieval,
            "transform" => Operation::Transform,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    Started,
    Completed,
    Failed,
}

impl LineageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LineageStatus::Started => "started",
            LineageStatus::Completed => "completed",
            LineageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "started" => LineageStatus::Started,
            "completed" => LineageStatus::Completed,
            "failed" => LineageStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        self != LineageStatus::Started
    }
}

/// What an operation was asked to do, recorded when it starts.
///
/// Known shapes get their own variant; `Other` carries an explicit map for
/// operations whose inputs are open-ended (downloads, embeddings, transforms
/// driven by external collaborators).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationDetails {
    Upload {
        source_type: String,
        source_identifier: Option<String>,
        filename: String,
        file_format: FileFormat,
        file_size_bytes: u64,
        stored_inline: bool,
    },
    Parse {
        filename: String,
        file_format: FileFormat,
    },
    Index {
        rediscovery: bool,
    },
    Retrieval {
        session_id: Option<String>,
        message_id: Option<String>,
        rank: usize,
    },
    Other {
        operation: Operation,
        #[serde(default)]
        extra: Map<String, Value>,
    },
}

impl OperationDetails {
    pub fn operation(&self) -> Operation {
        match self {
            OperationDetails::Upload { .. } => Operation::Upload,
            OperationDetails::Parse { .. } => Operation::Parse,
            OperationDetails::Index { .. } => Operation::Index,
            OperationDetails::Retrieval { .. } => Operation::Retrieval,
            OperationDetails::Other { operation, .. } => *operation,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            OperationDetails::Retrieval { message_id, .. } => message_id.as_deref(),
            _ => None,
        }
    }
}

/// What a completed operation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResult {
    Upload {
        sha256: String,
        md5: String,
        deduplicated: bool,
    },
    Parse {
        records: u64,
        skipped_rows: u64,
        physical_rows: u64,
        delimiter: String,
        encoding: String,
    },
    Index {
        file_schema_id: String,
        columns: usize,
        aliases: usize,
        superseded: Option<String>,
    },
    Retrieval {
        score: Option<f64>,
    },
    Other {
        #[serde(default)]
        extra: Map<String, Value>,
    },
}

/// One journal entry in the lineage ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub id: String,
    pub raw_file_id: String,
    pub parsed_record_id: Option<String>,
    pub operation: Operation,
    pub status: LineageStatus,
    pub details: OperationDetails,
    pub result: Option<OperationResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

impl LineageEntry {
    /// A new entry in the `started` state.
    pub fn started(
        raw_file_id: &str,
        parsed_record_id: Option<&str>,
        details: OperationDetails,
    ) -> Self {
        Self {
            id: new_id(),
            raw_file_id: raw_file_id.to_string(),
            parsed_record_id: parsed_record_id.map(str::to_string),
            operation: details.operation(),
            status: LineageStatus::Started,
            details,
            result: None,
            started_at: timestamp_now(),
            completed_at: None,
            error_message: None,
            error_trace: None,
        }
    }

    /// A new entry that is already `completed`, for atomic operations.
    pub fn completed(
        raw_file_id: &str,
        parsed_record_id: Option<&str>,
        details: OperationDetails,
        result: OperationResult,
    ) -> Self {
        let mut entry = Self::started(raw_file_id, parsed_record_id, details);
        entry.status = LineageStatus::Completed;
        entry.result = Some(result);
        entry.completed_at = Some(entry.started_at);
        entry
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }
}

// ── Schemas ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Date,
    Category,
    Text,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Date => "date",
            DataType::Category => "category",
            DataType::Text => "text",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

/// Heuristic meaning of a column, inferred from sampled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSignature {
    NumericSequential,
    Numeric,
    OrganizationName,
    BiddingModality,
    Money,
    Date,
    Text,
    Unknown,
}

impl ContentSignature {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentSignature::NumericSequential => "numeric_sequential",
            ContentSignature::Numeric => "numeric",
            ContentSignature::OrganizationName => "organization_name",
            ContentSignature::BiddingModality => "bidding_modality",
            ContentSignature::Money => "money",
            ContentSignature::Date => "date",
            ContentSignature::Text => "text",
            ContentSignature::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    Active,
    Outdated,
    Deprecated,
}

impl SchemaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaStatus::Active => "active",
            SchemaStatus::Outdated => "outdated",
            SchemaStatus::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => SchemaStatus::Active,
            "outdated" => SchemaStatus::Outdated,
            "deprecated" => SchemaStatus::Deprecated,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub original_name: String,
    pub normalized_name: String,
    pub display_name: String,
    /// Generated aliases in priority order.
    pub semantic_aliases: Vec<String>,
    pub data_type: DataType,
    pub content_signature: ContentSignature,
    pub sample_values: Vec<String>,
    /// Distinct non-empty values in first-seen order, when few enough.
    pub unique_values: Option<Vec<String>>,
    pub null_count: u64,
    pub unique_count: u64,
}

/// How a schema was discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub delimiter: String,
    pub encoding: String,
    pub physical_rows: u64,
    pub skipped_rows: u64,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSchema {
    pub id: String,
    pub raw_file_id: String,
    pub filename: String,
    pub columns: Vec<ColumnInfo>,
    pub total_rows: u64,
    pub total_columns: usize,
    pub status: SchemaStatus,
    pub discovery: DiscoveryInfo,
    pub discovered_at: DateTime<Utc>,
}

impl FileSchema {
    pub fn column(&self, original_name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.original_name == original_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Normalized,
    Semantic,
    Fuzzy,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Normalized => "normalized",
            MatchType::Semantic => "semantic",
            MatchType::Fuzzy => "fuzzy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "exact" => MatchType::Exact,
            "normalized" => MatchType::Normalized,
            "semantic" => MatchType::Semantic,
            "fuzzy" => MatchType::Fuzzy,
            _ => return None,
        })
    }
}

/// An alias resolving to one column of one schema. `alias` is lowercase
/// and trimmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub file_schema_id: String,
    pub alias: String,
    pub original_column_name: String,
    pub match_type: MatchType,
    pub confidence: f64,
}

// ── Field mappings ──────────────────────────────────────────────────

/// The kind of entity a mapping was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    FieldName,
    Number,
    Organization,
    Category,
}

/// How a mapping matched its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMatch {
    Exact,
    Normalized,
    Semantic,
    Fuzzy,
    /// A numeric value proposed against a numeric column.
    NumericValue,
    /// A known categorical value found in the column's values.
    CategoricalValue,
}

impl From<MatchType> for MappingMatch {
    fn from(m: MatchType) -> Self {
        match m {
            MatchType::Exact => MappingMatch::Exact,
            MatchType::Normalized => MappingMatch::Normalized,
            MatchType::Semantic => MappingMatch::Semantic,
            MatchType::Fuzzy => MappingMatch::Fuzzy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingValue {
    Integer(i64),
    Text(String),
}

impl std::fmt::Display for MappingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingValue::Integer(n) => write!(f, "{}", n),
            MappingValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
}

/// A structured filter proposed for a piece of free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub query_text: String,
    pub entity: EntityKind,
    pub file_schema_id: String,
    pub filename: String,
    pub column_name: String,
    pub column_type: DataType,
    pub match_type: MappingMatch,
    pub confidence: f64,
    pub value: Option<MappingValue>,
    pub operator: Option<Operator>,
}
