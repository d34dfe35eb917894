//! In-memory [`Store`] and [`BlobStore`] implementations for testing.
//!
//! All tables live in one struct behind a single `std::sync::RwLock`, so
//! every trait method is trivially atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{
    AliasEntry, FileSchema, FileStatus, LineageEntry, LineageStatus, ParsedRecord, RawFile,
    SchemaStatus,
};

use super::{BlobStore, InsertOutcome, LineageCount, LineageTransition, Store};

#[derive(Default)]
struct State {
    files: Vec<RawFile>,
    content: HashMap<String, Vec<u8>>,
    records: Vec<ParsedRecord>,
    lineage: Vec<LineageEntry>,
    schemas: Vec<FileSchema>,
    aliases: Vec<AliasEntry>,
    insert_records_error: Option<String>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the inline bytes of a file, bypassing immutability.
    /// Only useful for simulating tampering.
    pub fn overwrite_content(&self, raw_file_id: &str, bytes: &[u8]) {
        let mut state = self.state.write().unwrap();
        state.content.insert(raw_file_id.to_string(), bytes.to_vec());
    }

    /// Make the next `insert_records` call fail with `message`.
    pub fn fail_next_record_insert(&self, message: &str) {
        let mut state = self.state.write().unwrap();
        state.insert_records_error = Some(message.to_string());
    }
}

fn newest_first(mut files: Vec<RawFile>) -> Vec<RawFile> {
    files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    files
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_raw_file(
        &self,
        file: &RawFile,
        content: Option<&[u8]>,
        upload: &LineageEntry,
    ) -> Result<InsertOutcome> {
        let mut state = self.state.write().unwrap();
        if let Some(existing) = state.files.iter().find(|f| f.sha256 == file.sha256) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        state.files.push(file.clone());
        if let Some(bytes) = content {
            state.content.insert(file.id.clone(), bytes.to_vec());
        }
        state.lineage.push(upload.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_raw_file(&self, id: &str) -> Result<Option<RawFile>> {
        let state = self.state.read().unwrap();
        Ok(state.files.iter().find(|f| f.id == id).cloned())
    }

    async fn get_raw_file_by_hash(&self, sha256: &str) -> Result<Option<RawFile>> {
        let state = self.state.read().unwrap();
        Ok(state.files.iter().find(|f| f.sha256 == sha256).cloned())
    }

    async fn find_raw_files(
        &self,
        source_type: &str,
        source_identifier: Option<&str>,
    ) -> Result<Vec<RawFile>> {
        let state = self.state.read().unwrap();
        let files = state
            .files
            .iter()
            .filter(|f| f.source_type == source_type)
            .filter(|f| {
                source_identifier.map_or(true, |id| f.source_identifier.as_deref() == Some(id))
            })
            .cloned()
            .collect();
        Ok(newest_first(files))
    }

    async fn list_raw_files(&self) -> Result<Vec<RawFile>> {
        let state = self.state.read().unwrap();
        Ok(newest_first(state.files.clone()))
    }

    async fn raw_file_content(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.read().unwrap();
        Ok(state.content.get(id).cloned())
    }

    async fn update_raw_file_status(
        &self,
        id: &str,
        status: FileStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let file = state
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| anyhow!("raw file not found: {}", id))?;
        file.status = status;
        file.error_message = error_message.map(str::to_string);
        Ok(())
    }

    async fn insert_records(&self, records: &[ParsedRecord]) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        if let Some(message) = state.insert_records_error.take() {
            return Err(anyhow!(message));
        }
        let mut inserted = 0;
        for record in records {
            let exists = state.records.iter().any(|r| {
                r.raw_file_id == record.raw_file_id && r.row_number == record.row_number
            });
            if !exists {
                state.records.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_record(&self, id: &str) -> Result<Option<ParsedRecord>> {
        let state = self.state.read().unwrap();
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    async fn records_for_file(
        &self,
        raw_file_id: &str,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<ParsedRecord>> {
        let state = self.state.read().unwrap();
        let mut records: Vec<ParsedRecord> = state
            .records
            .iter()
            .filter(|r| r.raw_file_id == raw_file_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.row_number);
        Ok(records
            .into_iter()
            .skip(offset as usize)
            .take(limit.map_or(usize::MAX, |l| l as usize))
            .collect())
    }

    async fn count_records(&self, raw_file_id: &str) -> Result<u64> {
        let state = self.state.read().unwrap();
        Ok(state
            .records
            .iter()
            .filter(|r| r.raw_file_id == raw_file_id)
            .count() as u64)
    }

    async fn insert_lineage(&self, entries: &[LineageEntry]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.lineage.extend(entries.iter().cloned());
        Ok(())
    }

    async fn finish_lineage(&self, id: &str, transition: &LineageTransition) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let Some(entry) = state
            .lineage
            .iter_mut()
            .find(|e| e.id == id && e.status == LineageStatus::Started)
        else {
            return Ok(false);
        };
        entry.status = transition.status;
        entry.result = transition.result.clone();
        entry.completed_at = Some(transition.completed_at);
        entry.error_message = transition.error_message.clone();
        entry.error_trace = transition.error_trace.clone();
        Ok(true)
    }

    async fn get_lineage(&self, id: &str) -> Result<Option<LineageEntry>> {
        let state = self.state.read().unwrap();
        Ok(state.lineage.iter().find(|e| e.id == id).cloned())
    }

    async fn lineage_for_file(&self, raw_file_id: &str) -> Result<Vec<LineageEntry>> {
        let state = self.state.read().unwrap();
        let mut entries: Vec<LineageEntry> = state
            .lineage
            .iter()
            .filter(|e| e.raw_file_id == raw_file_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.started_at);
        Ok(entries)
    }

    async fn lineage_for_message(&self, message_id: &str) -> Result<Vec<LineageEntry>> {
        let state = self.state.read().unwrap();
        let mut entries: Vec<LineageEntry> = state
            .lineage
            .iter()
            .filter(|e| e.details.message_id() == Some(message_id))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.started_at);
        Ok(entries)
    }

    async fn lineage_counts(&self) -> Result<Vec<LineageCount>> {
        let state = self.state.read().unwrap();
        let mut counts: Vec<LineageCount> = Vec::new();
        for entry in &state.lineage {
            match counts
                .iter_mut()
                .find(|c| c.operation == entry.operation && c.status == entry.status)
            {
                Some(c) => c.count += 1,
                None => counts.push(LineageCount {
                    operation: entry.operation,
                    status: entry.status,
                    count: 1,
                }),
            }
        }
        counts.sort_by_key(|c| (c.operation, c.status));
        Ok(counts)
    }

    async fn activate_schema(
        &self,
        schema: &FileSchema,
        aliases: &[AliasEntry],
    ) -> Result<Option<String>> {
        let mut state = self.state.write().unwrap();
        let mut demoted = None;
        for existing in state.schemas.iter_mut() {
            if existing.raw_file_id == schema.raw_file_id && existing.status == SchemaStatus::Active
            {
                existing.status = SchemaStatus::Outdated;
                demoted = Some(existing.id.clone());
            }
        }
        let mut active = schema.clone();
        active.status = SchemaStatus::Active;
        state.schemas.push(active);
        state.aliases.extend(aliases.iter().cloned());
        Ok(demoted)
    }

    async fn get_schema(&self, id: &str) -> Result<Option<FileSchema>> {
        let state = self.state.read().unwrap();
        Ok(state.schemas.iter().find(|s| s.id == id).cloned())
    }

    async fn active_schema(&self, raw_file_id: &str) -> Result<Option<FileSchema>> {
        let state = self.state.read().unwrap();
        Ok(state
            .schemas
            .iter()
            .find(|s| s.raw_file_id == raw_file_id && s.status == SchemaStatus::Active)
            .cloned())
    }

    async fn active_schemas(&self) -> Result<Vec<FileSchema>> {
        let state = self.state.read().unwrap();
        let mut schemas: Vec<FileSchema> = state
            .schemas
            .iter()
            .filter(|s| s.status == SchemaStatus::Active)
            .cloned()
            .collect();
        schemas.sort_by_key(|s| s.discovered_at);
        Ok(schemas)
    }

    async fn schema_history(&self, raw_file_id: &str) -> Result<Vec<FileSchema>> {
        let state = self.state.read().unwrap();
        let mut schemas: Vec<FileSchema> = state
            .schemas
            .iter()
            .filter(|s| s.raw_file_id == raw_file_id)
            .cloned()
            .collect();
        schemas.reverse();
        Ok(schemas)
    }

    async fn lookup_alias(
        &self,
        alias: &str,
        file_schema_id: Option<&str>,
    ) -> Result<Vec<AliasEntry>> {
        let state = self.state.read().unwrap();
        let active = |id: &str| {
            state
                .schemas
                .iter()
                .any(|s| s.id == id && s.status == SchemaStatus::Active)
        };
        Ok(state
            .aliases
            .iter()
            .filter(|a| a.alias == alias)
            .filter(|a| match file_schema_id {
                Some(id) => a.file_schema_id == id,
                None => active(&a.file_schema_id),
            })
            .cloned()
            .collect())
    }

    async fn aliases_for_schema(&self, file_schema_id: &str) -> Result<Vec<AliasEntry>> {
        let state = self.state.read().unwrap();
        Ok(state
            .aliases
            .iter()
            .filter(|a| a.file_schema_id == file_schema_id)
            .cloned()
            .collect())
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace stored bytes, bypassing content addressing. For tamper tests.
    pub fn overwrite(&self, locator: &str, bytes: &[u8]) {
        self.blobs
            .write()
            .unwrap()
            .insert(locator.to_string(), bytes.to_vec());
    }

    pub fn remove(&self, locator: &str) {
        self.blobs.write().unwrap().remove(locator);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<String> {
        let locator = format!("mem://{}", sha256);
        self.blobs
            .write()
            .unwrap()
            .entry(locator.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().unwrap().get(locator).cloned())
    }
}
