//! The lineage ledger: an append-mostly journal of every operation applied
//! to a raw file, with verifiable signatures for auditors.
//!
//! # State machine
//!
//! ```text
//! start() ──▶ started ──complete()──▶ completed
//!                    └────fail()────▶ failed
//! ```
//!
//! [`LineageLedger::start`] hands out a [`PendingOperation`], a one-shot
//! token that [`complete`](LineageLedger::complete) and
//! [`fail`](LineageLedger::fail) consume, so a second terminal call does not
//! compile. The store applies the transition conditionally as well; if it
//! ever finds the entry already terminal (for example after
//! [`resume`](LineageLedger::resume) on a stale id) the call is rejected with
//! [`CustodyError::LedgerStateViolation`].
//!
//! Retrieval entries skip the `started` phase: they are logged already
//! completed by [`log_retrieval`](LineageLedger::log_retrieval).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::content::ContentStore;
use crate::error::{CustodyError, Result};
use crate::models::{
    timestamp_now, LineageEntry, LineageStatus, Operation, OperationDetails, OperationResult,
    ParsedRecord, RawFile,
};
use crate::store::{LineageTransition, Store};

/// A started operation awaiting exactly one terminal call.
#[must_use = "a started operation must be completed or failed"]
#[derive(Debug)]
pub struct PendingOperation {
    entry: LineageEntry,
}

impl PendingOperation {
    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn entry(&self) -> &LineageEntry {
        &self.entry
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityCheck {
    pub passed: bool,
    pub sha256_hash: String,
    pub verified_at: DateTime<Utc>,
}

/// Everything an auditor needs to check one lineage entry.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub entry: LineageEntry,
    pub raw_file: RawFile,
    pub parsed_record: Option<ParsedRecord>,
    pub integrity: IntegrityCheck,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileLineage {
    pub raw_file: RawFile,
    pub entries: Vec<LineageEntry>,
    pub parsed_records: u64,
    /// Counts keyed by `"{operation}_{status}"`.
    pub operation_status: BTreeMap<String, u64>,
    pub retrieval_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitedFile {
    pub id: String,
    pub filename: String,
    pub source_type: String,
    pub source_identifier: Option<String>,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CitedRecord {
    pub id: String,
    pub row_number: u64,
    pub data: IndexMap<String, String>,
    pub text_content: String,
}

/// One source used to answer a chat message.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub lineage_id: String,
    pub raw_file: CitedFile,
    pub record: Option<CitedRecord>,
    pub score: Option<f64>,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerStatistics {
    pub total_entries: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_operation: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Clone)]
pub struct LineageLedger {
    store: Arc<dyn Store>,
    content: ContentStore,
}

impl LineageLedger {
    pub fn new(store: Arc<dyn Store>, content: ContentStore) -> Self {
        Self { store, content }
    }

    /// Record the start of an operation on `raw_file_id`.
    pub async fn start(
        &self,
        raw_file_id: &str,
        details: OperationDetails,
        parsed_record_id: Option<&str>,
    ) -> Result<PendingOperation> {
        if self.store.get_raw_file(raw_file_id).await?.is_none() {
            return Err(CustodyError::not_found("raw file", raw_file_id));
        }
        let entry = LineageEntry::started(raw_file_id, parsed_record_id, details);
        self.store.insert_lineage(std::slice::from_ref(&entry)).await?;
        tracing::debug!(lineage_id = %entry.id, operation = entry.operation.as_str(), raw_file_id, "operation started");
        Ok(PendingOperation { entry })
    }

    pub async fn complete(
        &self,
        op: PendingOperation,
        result: OperationResult,
    ) -> Result<LineageEntry> {
        self.finish(
            op,
            LineageTransition {
                status: LineageStatus::Completed,
                result: Some(result),
                completed_at: timestamp_now(),
                error_message: None,
                error_trace: None,
            },
        )
        .await
    }

    pub async fn fail(
        &self,
        op: PendingOperation,
        message: impl Into<String>,
        trace: Option<String>,
    ) -> Result<LineageEntry> {
        self.finish(
            op,
            LineageTransition {
                status: LineageStatus::Failed,
                result: None,
                completed_at: timestamp_now(),
                error_message: Some(message.into()),
                error_trace: trace,
            },
        )
        .await
    }

    /// Reclaim the token for an entry still in `started`, e.g. after a
    /// crash. `None` if the entry is missing or already terminal.
    pub async fn resume(&self, lineage_id: &str) -> Result<Option<PendingOperation>> {
        Ok(self
            .store
            .get_lineage(lineage_id)
            .await?
            .filter(|e| e.status == LineageStatus::Started)
            .map(|entry| PendingOperation { entry }))
    }

    async fn finish(
        &self,
        op: PendingOperation,
        transition: LineageTransition,
    ) -> Result<LineageEntry> {
        let PendingOperation { mut entry } = op;
        if !self.store.finish_lineage(&entry.id, &transition).await? {
            let status = self
                .store
                .get_lineage(&entry.id)
                .await?
                .map(|e| e.status.as_str().to_string())
                .unwrap_or_else(|| "missing".to_string());
            tracing::error!(lineage_id = %entry.id, %status, "rejected second terminal transition");
            return Err(CustodyError::LedgerStateViolation {
                entry_id: entry.id,
                status,
            });
        }
        entry.status = transition.status;
        entry.result = transition.result;
        entry.completed_at = Some(transition.completed_at);
        entry.error_message = transition.error_message;
        entry.error_trace = transition.error_trace;
        tracing::debug!(lineage_id = %entry.id, status = entry.status.as_str(), "operation finished");
        Ok(entry)
    }

    /// Log that `record_ids` were retrieved to answer a message.
    ///
    /// Unknown record ids are skipped. `scores`, when given, is matched to
    /// `record_ids` by position.
    pub async fn log_retrieval(
        &self,
        record_ids: &[String],
        session_id: Option<&str>,
        message_id: Option<&str>,
        scores: Option<&[f64]>,
    ) -> Result<Vec<LineageEntry>> {
        let mut entries = Vec::with_capacity(record_ids.len());
        for (rank, record_id) in record_ids.iter().enumerate() {
            let Some(record) = self.store.get_record(record_id).await? else {
                tracing::warn!(record_id = %record_id, "skipping retrieval of unknown record");
                continue;
            };
            entries.push(LineageEntry::completed(
                &record.raw_file_id,
                Some(&record.id),
                OperationDetails::Retrieval {
                    session_id: session_id.map(str::to_string),
                    message_id: message_id.map(str::to_string),
                    rank,
                },
                OperationResult::Retrieval {
                    score: scores.and_then(|s| s.get(rank).copied()),
                },
            ));
        }
        if !entries.is_empty() {
            self.store.insert_lineage(&entries).await?;
        }
        tracing::info!(logged = entries.len(), requested = record_ids.len(), message_id, "logged retrievals");
        Ok(entries)
    }

    /// Gather an entry with its file, record, a fresh integrity check, and
    /// the verification signature. `None` if the entry does not exist.
    ///
    /// Integrity problems are reported in `integrity.passed`, never raised.
    pub async fn verify(&self, lineage_id: &str) -> Result<Option<Verification>> {
        let Some(entry) = self.store.get_lineage(lineage_id).await? else {
            return Ok(None);
        };
        let raw_file = self
            .store
            .get_raw_file(&entry.raw_file_id)
            .await?
            .ok_or_else(|| CustodyError::not_found("raw file", entry.raw_file_id.clone()))?;
        let parsed_record = match &entry.parsed_record_id {
            Some(id) => self.store.get_record(id).await?,
            None => None,
        };

        let passed = match self.content.verify(&raw_file).await {
            Ok(passed) => passed,
            Err(e) => {
                tracing::warn!(raw_file_id = %raw_file.id, error = %e, "could not read bytes for verification");
                false
            }
        };
        let signature = signature(&raw_file, &entry, parsed_record.as_ref());

        Ok(Some(Verification {
            integrity: IntegrityCheck {
                passed,
                sha256_hash: raw_file.sha256.clone(),
                verified_at: timestamp_now(),
            },
            entry,
            raw_file,
            parsed_record,
            signature,
        }))
    }

    /// Full operation history of a file. `None` if the file does not exist.
    pub async fn get_file_lineage(
        &self,
        raw_file_id: &str,
        include_retrievals: bool,
    ) -> Result<Option<FileLineage>> {
        let Some(raw_file) = self.store.get_raw_file(raw_file_id).await? else {
            return Ok(None);
        };
        let all = self.store.lineage_for_file(raw_file_id).await?;
        let parsed_records = self.store.count_records(raw_file_id).await?;

        let mut operation_status = BTreeMap::new();
        let mut retrieval_count = 0;
        for entry in &all {
            *operation_status
                .entry(format!(
                    "{}_{}",
                    entry.operation.as_str(),
                    entry.status.as_str()
                ))
                .or_insert(0) += 1;
            if entry.operation == Operation::Retrieval {
                retrieval_count += 1;
            }
        }
        let entries = all
            .into_iter()
            .filter(|e| include_retrievals || e.operation != Operation::Retrieval)
            .collect();

        Ok(Some(FileLineage {
            raw_file,
            entries,
            parsed_records,
            operation_status,
            retrieval_count,
        }))
    }

    /// Sources retrieved for a chat message, in retrieval order.
    pub async fn citations_for_message(&self, message_id: &str) -> Result<Vec<Citation>> {
        let entries = self.store.lineage_for_message(message_id).await?;
        let mut citations = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(raw_file) = self.store.get_raw_file(&entry.raw_file_id).await? else {
                continue;
            };
            let record = match &entry.parsed_record_id {
                Some(id) => self.store.get_record(id).await?,
                None => None,
            };
            let score = match &entry.result {
                Some(OperationResult::Retrieval { score }) => *score,
                _ => None,
            };
            citations.push(Citation {
                lineage_id: entry.id,
                raw_file: CitedFile {
                    id: raw_file.id,
                    filename: raw_file.filename,
                    source_type: raw_file.source_type,
                    source_identifier: raw_file.source_identifier,
                    sha256: raw_file.sha256,
                },
                record: record.map(|r| CitedRecord {
                    id: r.id,
                    row_number: r.row_number,
                    data: r.data,
                    text_content: r.text_content,
                }),
                score,
                retrieved_at: entry.started_at,
            });
        }
        Ok(citations)
    }

    pub async fn statistics(&self) -> Result<LedgerStatistics> {
        let mut stats = LedgerStatistics::default();
        for count in self.store.lineage_counts().await? {
            stats.total_entries += count.count;
            *stats
                .by_status
                .entry(count.status.as_str().to_string())
                .or_insert(0) += count.count;
            *stats
                .by_operation
                .entry(count.operation.as_str().to_string())
                .or_default()
                .entry(count.status.as_str().to_string())
                .or_insert(0) += count.count;
        }
        Ok(stats)
    }
}

/// Deterministic tamper-evidence binding for a lineage entry:
/// SHA-256 of `"{sha256}:{entry_id}:{started_at}"`, followed by
/// `":{record_id}:{row_number}"` when a record is involved. `started_at` is
/// RFC 3339 UTC with microseconds.
pub fn signature(raw_file: &RawFile, entry: &LineageEntry, record: Option<&ParsedRecord>) -> String {
    let mut material = format!(
        "{}:{}:{}",
        raw_file.sha256,
        entry.id,
        entry
            .started_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    );
    if let Some(record) = record {
        material.push_str(&format!(":{}:{}", record.id, record.row_number));
    }
    hex::encode(Sha256::digest(material.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Upload, DEFAULT_INLINE_THRESHOLD};
    use crate::store::memory::{InMemoryStore, MemoryBlobStore};

    async fn ledger_with_file() -> (Arc<InMemoryStore>, LineageLedger, RawFile) {
        let store = Arc::new(InMemoryStore::new());
        let content = ContentStore::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            DEFAULT_INLINE_THRESHOLD,
        );
        let file = content
            .store(Upload::new(b"a;b\n1;2\n".to_vec(), "t.csv", "manual"))
            .await
            .unwrap()
            .raw_file;
        (store.clone(), LineageLedger::new(store, content), file)
    }

    #[tokio::test]
    async fn test_start_then_complete() {
        let (_, ledger, file) = ledger_with_file().await;
        let op = ledger
            .start(&file.id, OperationDetails::Index { rediscovery: false }, None)
            .await
            .unwrap();
        assert_eq!(op.entry().status, LineageStatus::Started);
        let done = ledger
            .complete(
                op,
                OperationResult::Other {
                    extra: Default::default(),
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, LineageStatus::Completed);
        assert!(done.duration().is_some());
    }

    #[tokio::test]
    async fn test_second_terminal_transition_is_rejected() {
        let (_, ledger, file) = ledger_with_file().await;
        let op = ledger
            .start(&file.id, OperationDetails::Index { rediscovery: false }, None)
            .await
            .unwrap();
        let id = op.id().to_string();
        let stale = ledger.resume(&id).await.unwrap().unwrap();
        ledger.fail(op, "boom", Some("trace".into())).await.unwrap();

        let err = ledger
            .complete(
                stale,
                OperationResult::Other {
                    extra: Default::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::LedgerStateViolation { ref status, .. } if status == "failed"));
        assert!(ledger.resume(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_requires_existing_file() {
        let (_, ledger, _) = ledger_with_file().await;
        let err = ledger
            .start("nope", OperationDetails::Index { rediscovery: false }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upload_entry_verifies_with_stable_signature() {
        let (store, ledger, file) = ledger_with_file().await;
        let upload = store.lineage_for_file(&file.id).await.unwrap().remove(0);
        let v1 = ledger.verify(&upload.id).await.unwrap().unwrap();
        let v2 = ledger.verify(&upload.id).await.unwrap().unwrap();
        assert!(v1.integrity.passed);
        assert_eq!(v1.signature, v2.signature);
        assert_eq!(v1.signature.len(), 64);
        assert!(ledger.verify("missing").await.unwrap().is_none());

        store.overwrite_content(&file.id, b"changed");
        let v3 = ledger.verify(&upload.id).await.unwrap().unwrap();
        assert!(!v3.integrity.passed);
        assert_eq!(v3.signature, v1.signature);
    }

    #[tokio::test]
    async fn test_file_lineage_summary() {
        let (_, ledger, file) = ledger_with_file().await;
        let op = ledger
            .start(&file.id, OperationDetails::Index { rediscovery: false }, None)
            .await
            .unwrap();
        ledger.fail(op, "no rows", None).await.unwrap();

        let lineage = ledger.get_file_lineage(&file.id, true).await.unwrap().unwrap();
        assert_eq!(lineage.entries.len(), 2);
        assert_eq!(lineage.operation_status["upload_completed"], 1);
        assert_eq!(lineage.operation_status["index_failed"], 1);
        assert_eq!(lineage.retrieval_count, 0);
        assert!(ledger.get_file_lineage("nope", true).await.unwrap().is_none());

        let stats = ledger.statistics().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.by_status["failed"], 1);
        assert_eq!(stats.by_operation["upload"]["completed"], 1);
    }

    #[test]
    fn test_signature_includes_record_binding() {
        let file = RawFile {
            id: "f".into(),
            source_type: "manual".into(),
            source_identifier: None,
            filename: "t.csv".into(),
            format: crate::models::FileFormat::Csv,
            size_bytes: 0,
            sha256: "aa".into(),
            md5: "bb".into(),
            metadata: Default::default(),
            storage: crate::models::StorageLocation::Inline,
            status: crate::models::FileStatus::Stored,
            error_message: None,
            created_at: timestamp_now(),
        };
        let mut entry = LineageEntry::started("f", None, OperationDetails::Index { rediscovery: false });
        entry.id = "e".into();
        entry.started_at = DateTime::parse_from_rfc3339("2024-01-02T03:04:05.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let expected = hex::encode(Sha256::digest(b"aa:e:2024-01-02T03:04:05.123456Z"));
        assert_eq!(signature(&file, &entry, None), expected);

        let record = ParsedRecord {
            id: "r".into(),
            raw_file_id: "f".into(),
            row_number: 42,
            data: Default::default(),
            normalized_data: Default::default(),
            text_content: String::new(),
            created_at: timestamp_now(),
        };
        let expected = hex::encode(Sha256::digest(b"aa:e:2024-01-02T03:04:05.123456Z:r:42"));
        assert_eq!(signature(&file, &entry, Some(&record)), expected);
    }
}
