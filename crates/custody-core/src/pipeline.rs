//! Per-file ingestion: store → extract → discover, with lineage.
//!
//! [`Custody`] wires the components over one [`Store`] and runs a file
//! end-to-end. Work is resumable at file granularity: persisted records and
//! an active schema are the checkpoints, so processing the same bytes again
//! only performs the steps that have not happened yet.
//!
//! Scheduling (worker pools, cancellation) belongs to the caller; this
//! module only guarantees that one raw file is never processed by two tasks
//! of the same process at once.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::alias::{AliasIndex, PublishedSchema};
use crate::content::{ContentStore, Upload};
use crate::discovery::SchemaDiscoverer;
use crate::error::{CustodyError, Result};
use crate::extract::{Extraction, RowExtractor, SkippedRow};
use crate::heuristics::Heuristics;
use crate::ledger::{LineageLedger, PendingOperation};
use crate::models::{FileStatus, OperationDetails, OperationResult, RawFile};
use crate::resolver::FieldResolver;
use crate::store::{BlobStore, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// At least one step ran.
    Processed,
    /// Records and an active schema already existed.
    AlreadyProcessed,
    /// Not a row-oriented format; bytes kept, nothing extracted.
    StoredOnly,
    /// Another task is processing the same raw file.
    Busy,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub raw_file: RawFile,
    pub deduplicated: bool,
    pub outcome: Outcome,
    /// Records inserted by this run.
    pub records: u64,
    pub skipped_rows: Vec<SkippedRow>,
    pub schema: Option<PublishedSchema>,
}

impl FileReport {
    fn new(raw_file: RawFile, deduplicated: bool, outcome: Outcome) -> Self {
        Self {
            raw_file,
            deduplicated,
            outcome,
            records: 0,
            skipped_rows: Vec::new(),
            schema: None,
        }
    }
}

/// Removes its raw file id from the in-flight set on drop.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlight {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string());
        inserted.then(|| Self {
            set: Arc::clone(set),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// The assembled custody services.
#[derive(Clone)]
pub struct Custody {
    store: Arc<dyn Store>,
    heuristics: Arc<Heuristics>,
    content: ContentStore,
    extractor: RowExtractor,
    discoverer: SchemaDiscoverer,
    aliases: AliasIndex,
    resolver: FieldResolver,
    ledger: LineageLedger,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Custody {
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        heuristics: Heuristics,
        inline_threshold: u64,
    ) -> Self {
        let heuristics = Arc::new(heuristics);
        let content = ContentStore::new(store.clone(), blobs, inline_threshold);
        Self {
            extractor: RowExtractor::new(),
            discoverer: SchemaDiscoverer::new(heuristics.clone()),
            aliases: AliasIndex::new(store.clone(), heuristics.clone()),
            resolver: FieldResolver::new(store.clone(), heuristics.clone()),
            ledger: LineageLedger::new(store.clone(), content.clone()),
            content,
            store,
            heuristics,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn heuristics(&self) -> &Heuristics {
        &self.heuristics
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn extractor(&self) -> &RowExtractor {
        &self.extractor
    }

    pub fn discoverer(&self) -> &SchemaDiscoverer {
        &self.discoverer
    }

    pub fn aliases(&self) -> &AliasIndex {
        &self.aliases
    }

    pub fn resolver(&self) -> &FieldResolver {
        &self.resolver
    }

    pub fn ledger(&self) -> &LineageLedger {
        &self.ledger
    }

    /// Store `upload` and run whatever extraction and discovery it still
    /// needs.
    ///
    /// A file whose rows cannot be parsed, or whose stored bytes no longer
    /// hash to the recorded SHA-256, is marked `failed` with a failed entry
    /// in the ledger, and the error is returned.
    pub async fn process(&self, upload: Upload) -> Result<FileReport> {
        let stored = self.content.store(upload).await?;
        let mut raw_file = stored.raw_file;

        if !raw_file.format.is_tabular() {
            tracing::info!(file = %raw_file.filename, format = raw_file.format.as_str(), "stored without extraction");
            return Ok(FileReport::new(raw_file, stored.deduplicated, Outcome::StoredOnly));
        }

        let Some(_guard) = InFlight::acquire(&self.in_flight, &raw_file.id) else {
            tracing::info!(file = %raw_file.filename, raw_file_id = %raw_file.id, "already being processed");
            return Ok(FileReport::new(raw_file, stored.deduplicated, Outcome::Busy));
        };
        // Another task may have finished with this file before the guard was taken
        if let Some(current) = self.content.get(&raw_file.id).await? {
            raw_file = current;
        }

        let has_records = raw_file.status == FileStatus::Parsed
            && self.store.count_records(&raw_file.id).await? > 0;
        let has_schema = self.store.active_schema(&raw_file.id).await?.is_some();
        if has_records && has_schema {
            tracing::info!(file = %raw_file.filename, raw_file_id = %raw_file.id, "already processed");
            return Ok(FileReport::new(
                raw_file,
                stored.deduplicated,
                Outcome::AlreadyProcessed,
            ));
        }

        let bytes = match self.content.read_verified(&raw_file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(file = %raw_file.filename, raw_file_id = %raw_file.id, error = %e, "stored bytes unreadable");
                let details = if has_records {
                    OperationDetails::Index { rediscovery: false }
                } else {
                    OperationDetails::Parse {
                        filename: raw_file.filename.clone(),
                        file_format: raw_file.format,
                    }
                };
                self.journal_failure(&raw_file, details, &e).await;
                self.mark_failed(&mut raw_file, &e).await;
                return Err(e);
            }
        };
        let mut report = FileReport::new(raw_file.clone(), stored.deduplicated, Outcome::Processed);

        let extraction = if has_records {
            tracing::info!(file = %raw_file.filename, "records present, resuming at discovery");
            self.extractor.extract(&raw_file, &bytes)?
        } else {
            let (extraction, inserted) = self.parse(&mut raw_file, &bytes).await?;
            report.records = inserted;
            report.skipped_rows = extraction.skipped.clone();
            extraction
        };
        report.raw_file = raw_file;

        if !has_schema {
            report.schema = Some(self.index(&report.raw_file, &extraction, false).await?);
        }
        Ok(report)
    }

    /// Re-run discovery over the stored bytes and supersede the active
    /// schema. On failure the prior schema stays active.
    pub async fn rediscover(&self, raw_file_id: &str) -> Result<PublishedSchema> {
        let raw_file = self
            .content
            .get(raw_file_id)
            .await?
            .ok_or_else(|| CustodyError::not_found("raw file", raw_file_id))?;
        let Some(_guard) = InFlight::acquire(&self.in_flight, &raw_file.id) else {
            return Err(CustodyError::InvalidInput(format!(
                "raw file {} is being processed",
                raw_file.id
            )));
        };
        let extracted = match self.content.read_verified(&raw_file).await {
            Ok(bytes) => self.extractor.extract(&raw_file, &bytes),
            Err(e) => Err(e),
        };
        let extraction = match extracted {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::error!(file = %raw_file.filename, error = %e, "rediscovery failed");
                self.journal_failure(&raw_file, OperationDetails::Index { rediscovery: true }, &e)
                    .await;
                return Err(e);
            }
        };
        self.index(&raw_file, &extraction, true).await
    }

    /// Extract and persist rows under a parse entry. The entry completes only
    /// after the records are written; any error after it opens fails both
    /// the entry and the file.
    async fn parse(&self, raw_file: &mut RawFile, bytes: &[u8]) -> Result<(Extraction, u64)> {
        self.content
            .set_status(&raw_file.id, FileStatus::Parsing, None)
            .await?;
        let details = OperationDetails::Parse {
            filename: raw_file.filename.clone(),
            file_format: raw_file.format,
        };
        let op = match self.ledger.start(&raw_file.id, details, None).await {
            Ok(op) => op,
            Err(e) => {
                self.mark_failed(raw_file, &e).await;
                return Err(e);
            }
        };
        let lineage_id = op.id().to_string();

        match self.parse_rows(op, raw_file, bytes).await {
            Ok(parsed) => {
                raw_file.status = FileStatus::Parsed;
                raw_file.error_message = None;
                Ok(parsed)
            }
            Err(e) => {
                tracing::error!(file = %raw_file.filename, error = %e, "parse failed");
                self.fail_open(&lineage_id, &e).await;
                self.mark_failed(raw_file, &e).await;
                Err(e)
            }
        }
    }

    async fn parse_rows(
        &self,
        op: PendingOperation,
        raw_file: &RawFile,
        bytes: &[u8],
    ) -> Result<(Extraction, u64)> {
        let extraction = self.extractor.extract(raw_file, bytes)?;
        for skipped in &extraction.skipped {
            tracing::warn!(file = %raw_file.filename, row = ?skipped.row_number, reason = %skipped.reason, "skipped row");
        }
        let inserted = self.store.insert_records(&extraction.records).await?;
        self.ledger
            .complete(
                op,
                OperationResult::Parse {
                    records: inserted,
                    skipped_rows: extraction.skipped.len() as u64,
                    physical_rows: extraction.physical_rows,
                    delimiter: extraction.delimiter.to_string(),
                    encoding: extraction.encoding.as_str().to_string(),
                },
            )
            .await?;
        self.content
            .set_status(&raw_file.id, FileStatus::Parsed, None)
            .await?;
        tracing::info!(
            file = %raw_file.filename,
            records = extraction.records.len(),
            skipped = extraction.skipped.len(),
            delimiter = %extraction.delimiter,
            encoding = extraction.encoding.as_str(),
            "parsed rows"
        );
        Ok((extraction, inserted))
    }

    async fn index(
        &self,
        raw_file: &RawFile,
        extraction: &Extraction,
        rediscovery: bool,
    ) -> Result<PublishedSchema> {
        let op = self
            .ledger
            .start(&raw_file.id, OperationDetails::Index { rediscovery }, None)
            .await?;
        let lineage_id = op.id().to_string();

        match self.publish_schema(op, raw_file, extraction).await {
            Ok(published) => Ok(published),
            Err(e) => {
                tracing::error!(file = %raw_file.filename, error = %e, "schema discovery failed");
                self.fail_open(&lineage_id, &e).await;
                Err(e)
            }
        }
    }

    async fn publish_schema(
        &self,
        op: PendingOperation,
        raw_file: &RawFile,
        extraction: &Extraction,
    ) -> Result<PublishedSchema> {
        let schema = self.discoverer.discover(raw_file, extraction);
        if schema.columns.is_empty() {
            return Err(CustodyError::SchemaDiscovery {
                raw_file_id: raw_file.id.clone(),
                reason: "no columns found".to_string(),
            });
        }
        let published = self.aliases.publish(schema).await?;
        self.ledger
            .complete(
                op,
                OperationResult::Index {
                    file_schema_id: published.schema.id.clone(),
                    columns: published.schema.total_columns,
                    aliases: published.aliases,
                    superseded: published.superseded.clone(),
                },
            )
            .await?;
        Ok(published)
    }

    /// Fail `lineage_id` if it is still `started`. The store may be the
    /// thing that broke, so errors here are logged, not returned.
    async fn fail_open(&self, lineage_id: &str, error: &CustodyError) {
        let recorded = match self.ledger.resume(lineage_id).await {
            Ok(Some(op)) => self
                .ledger
                .fail(op, error.to_string(), Some(format!("{:?}", error)))
                .await
                .map(|_| ()),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            tracing::error!(lineage_id, error = %e, "could not fail lineage entry");
        }
    }

    /// Open and fail an entry for an error hit before the operation began.
    async fn journal_failure(&self, raw_file: &RawFile, details: OperationDetails, error: &CustodyError) {
        let recorded = match self.ledger.start(&raw_file.id, details, None).await {
            Ok(op) => self
                .ledger
                .fail(op, error.to_string(), Some(format!("{:?}", error)))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            tracing::error!(raw_file_id = %raw_file.id, error = %e, "could not journal failure");
        }
    }

    async fn mark_failed(&self, raw_file: &mut RawFile, error: &CustodyError) {
        let message = error.to_string();
        match self
            .content
            .set_status(&raw_file.id, FileStatus::Failed, Some(&message))
            .await
        {
            Ok(()) => {
                raw_file.status = FileStatus::Failed;
                raw_file.error_message = Some(message);
            }
            Err(e) => {
                tracing::error!(raw_file_id = %raw_file.id, error = %e, "could not mark file failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::DEFAULT_INLINE_THRESHOLD;
    use crate::models::{LineageStatus, Operation, SchemaStatus};
    use crate::store::memory::{InMemoryStore, MemoryBlobStore};

    const LICITACOES: &[u8] = "EDITAL N°;ORIGEM;VALOR\n10367;SEINF;1.234,56\n".as_bytes();

    fn custody() -> (Arc<InMemoryStore>, Custody) {
        let store = Arc::new(InMemoryStore::new());
        let custody = Custody::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            Heuristics::default(),
            DEFAULT_INLINE_THRESHOLD,
        );
        (store, custody)
    }

    #[tokio::test]
    async fn test_process_runs_every_step() {
        let (store, custody) = custody();
        let report = custody
            .process(Upload::new(LICITACOES.to_vec(), "licitacoes.csv", "manual"))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Processed);
        assert_eq!(report.records, 1);
        assert_eq!(report.raw_file.status, FileStatus::Parsed);
        let schema = report.schema.unwrap().schema;
        assert_eq!(schema.total_columns, 3);

        let ops: Vec<_> = store
            .lineage_for_file(&report.raw_file.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.operation, e.status))
            .collect();
        assert_eq!(
            ops,
            vec![
                (Operation::Upload, LineageStatus::Completed),
                (Operation::Parse, LineageStatus::Completed),
                (Operation::Index, LineageStatus::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_reupload_is_a_no_op() {
        let (store, custody) = custody();
        let first = custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap();
        let second = custody
            .process(Upload::new(LICITACOES.to_vec(), "b.csv", "manual"))
            .await
            .unwrap();
        assert_eq!(second.outcome, Outcome::AlreadyProcessed);
        assert!(second.deduplicated);
        assert_eq!(first.raw_file.id, second.raw_file.id);
        assert_eq!(store.active_schemas().await.unwrap().len(), 1);
        assert_eq!(store.count_records(&first.raw_file.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rediscover_demotes_prior_schema() {
        let (store, custody) = custody();
        let report = custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap();
        let first_id = report.schema.unwrap().schema.id;

        let again = custody.rediscover(&report.raw_file.id).await.unwrap();
        assert_eq!(again.superseded.as_deref(), Some(first_id.as_str()));

        let history = store.schema_history(&report.raw_file.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, SchemaStatus::Active);
        assert_eq!(history[1].status, SchemaStatus::Outdated);
    }

    #[tokio::test]
    async fn test_unparseable_file_is_marked_failed() {
        let (store, custody) = custody();
        let err = custody
            .process(Upload::new(b"only;a;header\n".to_vec(), "empty.csv", "manual"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::ParseFailure { .. }));

        let file = store.list_raw_files().await.unwrap().remove(0);
        assert_eq!(file.status, FileStatus::Failed);
        assert!(file.error_message.is_some());
        let parse = store
            .lineage_for_file(&file.id)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.operation == Operation::Parse)
            .unwrap();
        assert_eq!(parse.status, LineageStatus::Failed);
        assert!(parse.completed_at.is_some());
    }

    fn parse_entries(entries: &[crate::models::LineageEntry]) -> Vec<&crate::models::LineageEntry> {
        entries
            .iter()
            .filter(|e| e.operation == Operation::Parse)
            .collect()
    }

    #[tokio::test]
    async fn test_record_write_failure_closes_parse_entry() {
        let (store, custody) = custody();
        store.fail_next_record_insert("disk full");
        let err = custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk full");

        let file = store.list_raw_files().await.unwrap().remove(0);
        assert_eq!(file.status, FileStatus::Failed);
        assert_eq!(file.error_message.as_deref(), Some("disk full"));
        let entries = store.lineage_for_file(&file.id).await.unwrap();
        assert!(entries.iter().all(|e| e.status != LineageStatus::Started));
        let parses = parse_entries(&entries);
        assert_eq!(parses.len(), 1);
        assert_eq!(parses[0].status, LineageStatus::Failed);
        assert!(parses[0].completed_at.is_some());
        assert_eq!(parses[0].error_message.as_deref(), Some("disk full"));

        // The next run parses again from the start
        let retry = custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap();
        assert_eq!(retry.outcome, Outcome::Processed);
        assert_eq!(retry.records, 1);
        assert_eq!(retry.raw_file.status, FileStatus::Parsed);
        let entries = store.lineage_for_file(&file.id).await.unwrap();
        let statuses: Vec<LineageStatus> = parse_entries(&entries).iter().map(|e| e.status).collect();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.contains(&LineageStatus::Failed));
        assert!(statuses.contains(&LineageStatus::Completed));
    }

    #[tokio::test]
    async fn test_tampered_bytes_on_rerun_are_journaled() {
        let (store, custody) = custody();
        store.fail_next_record_insert("disk full");
        custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap_err();
        let file = store.list_raw_files().await.unwrap().remove(0);
        store.overwrite_content(&file.id, b"EDITAL;ORIGEM\n1;X\n");

        let err = custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap_err();
        assert!(err.is_integrity_failure());

        let file = store.get_raw_file(&file.id).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert!(file
            .error_message
            .as_deref()
            .unwrap()
            .contains("integrity failure"));
        assert_eq!(store.count_records(&file.id).await.unwrap(), 0);

        let entries = store.lineage_for_file(&file.id).await.unwrap();
        assert!(entries.iter().all(|e| e.status != LineageStatus::Started));
        let parses = parse_entries(&entries);
        assert_eq!(parses.len(), 2);
        assert!(parses.iter().all(|e| e.status == LineageStatus::Failed));
        assert!(parses
            .iter()
            .any(|e| e.error_message.as_deref().unwrap_or("").contains("expected sha256")));
    }

    #[tokio::test]
    async fn test_rediscover_on_tampered_bytes_keeps_schema() {
        let (store, custody) = custody();
        let report = custody
            .process(Upload::new(LICITACOES.to_vec(), "a.csv", "manual"))
            .await
            .unwrap();
        let schema_id = report.schema.unwrap().schema.id;
        store.overwrite_content(&report.raw_file.id, b"x,y\n1,2\n");

        let err = custody.rediscover(&report.raw_file.id).await.unwrap_err();
        assert!(err.is_integrity_failure());
        let active = store.active_schema(&report.raw_file.id).await.unwrap().unwrap();
        assert_eq!(active.id, schema_id);
        let failed_index = store
            .lineage_for_file(&report.raw_file.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == Operation::Index && e.status == LineageStatus::Failed)
            .count();
        assert_eq!(failed_index, 1);
    }

    #[tokio::test]
    async fn test_non_tabular_is_stored_only() {
        let (store, custody) = custody();
        let report = custody
            .process(Upload::new(b"%PDF-1.4".to_vec(), "edital.pdf", "portal"))
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::StoredOnly);
        assert_eq!(report.raw_file.status, FileStatus::Stored);
        assert!(store.active_schemas().await.unwrap().is_empty());
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let guard = InFlight::acquire(&set, "f").unwrap();
        assert!(InFlight::acquire(&set, "f").is_none());
        drop(guard);
        assert!(InFlight::acquire(&set, "f").is_some());
    }
}
