//! Immutable, hash-deduplicated file storage.
//!
//! [`ContentStore::store`] is idempotent on content: storing the same bytes
//! twice returns the original [`RawFile`] and writes nothing. Small files are
//! kept inline by the [`Store`]; larger ones go to a [`BlobStore`] and the
//! raw file records the locator.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{CustodyError, Result};
use crate::models::{
    new_id, timestamp_now, FileFormat, FileStatus, LineageEntry, OperationDetails,
    OperationResult, RawFile, StorageLocation,
};
use crate::store::{BlobStore, InsertOutcome, Store};

/// Files strictly smaller than this are stored inline.
pub const DEFAULT_INLINE_THRESHOLD: u64 = 10 * 1024 * 1024;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Bytes plus source metadata handed over by the upload layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Derived from the filename when absent.
    pub format: Option<FileFormat>,
    pub source_type: String,
    pub source_identifier: Option<String>,
    pub metadata: Map<String, Value>,
}

impl Upload {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            format: None,
            source_type: source_type.into(),
            source_identifier: None,
            metadata: Map::new(),
        }
    }

    pub fn with_source_identifier(mut self, id: impl Into<String>) -> Self {
        self.source_identifier = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub raw_file: RawFile,
    /// The bytes were already stored; `raw_file` is the original.
    pub deduplicated: bool,
}

#[derive(Clone)]
pub struct ContentStore {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    inline_threshold: u64,
}

impl ContentStore {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, inline_threshold: u64) -> Self {
        Self {
            store,
            blobs,
            inline_threshold,
        }
    }

    pub async fn store(&self, upload: Upload) -> Result<StoreOutcome> {
        let sha256 = sha256_hex(&upload.bytes);

        if let Some(existing) = self.store.get_raw_file_by_hash(&sha256).await? {
            tracing::info!(file = %upload.filename, raw_file_id = %existing.id, "duplicate content, returning existing raw file");
            return Ok(StoreOutcome {
                raw_file: existing,
                deduplicated: true,
            });
        }

        let md5 = md5_hex(&upload.bytes);
        let size_bytes = upload.bytes.len() as u64;
        let format = upload
            .format
            .unwrap_or_else(|| FileFormat::from_filename(&upload.filename));
        let inline = size_bytes < self.inline_threshold;
        let storage = if inline {
            StorageLocation::Inline
        } else {
            let locator = self.blobs.put(&sha256, &upload.bytes).await?;
            StorageLocation::Blob { locator }
        };

        let raw_file = RawFile {
            id: new_id(),
            source_type: upload.source_type.clone(),
            source_identifier: upload.source_identifier.clone(),
            filename: upload.filename.clone(),
            format,
            size_bytes,
            sha256: sha256.clone(),
            md5: md5.clone(),
            metadata: upload.metadata,
            storage,
            status: FileStatus::Stored,
            error_message: None,
            created_at: timestamp_now(),
        };
        let entry = LineageEntry::completed(
            &raw_file.id,
            None,
            OperationDetails::Upload {
                source_type: upload.source_type,
                source_identifier: upload.source_identifier,
                filename: upload.filename,
                file_format: format,
                file_size_bytes: size_bytes,
                stored_inline: inline,
            },
            OperationResult::Upload {
                sha256,
                md5,
                deduplicated: false,
            },
        );

        let content = inline.then_some(upload.bytes.as_slice());
        match self.store.insert_raw_file(&raw_file, content, &entry).await? {
            InsertOutcome::Inserted => {
                tracing::info!(
                    file = %raw_file.filename,
                    raw_file_id = %raw_file.id,
                    size = size_bytes,
                    inline,
                    "stored raw file"
                );
                Ok(StoreOutcome {
                    raw_file,
                    deduplicated: false,
                })
            }
            InsertOutcome::Existing(existing) => {
                tracing::info!(file = %raw_file.filename, raw_file_id = %existing.id, "lost insert race to identical content");
                Ok(StoreOutcome {
                    raw_file: existing,
                    deduplicated: true,
                })
            }
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<RawFile>> {
        Ok(self.store.get_raw_file(id).await?)
    }

    pub async fn get_by_hash(&self, sha256: &str) -> Result<Option<RawFile>> {
        Ok(self.store.get_raw_file_by_hash(&sha256.to_ascii_lowercase()).await?)
    }

    /// Files from a source, newest first.
    pub async fn find_by_source(
        &self,
        source_type: &str,
        source_identifier: Option<&str>,
    ) -> Result<Vec<RawFile>> {
        Ok(self.store.find_raw_files(source_type, source_identifier).await?)
    }

    pub async fn list(&self) -> Result<Vec<RawFile>> {
        Ok(self.store.list_raw_files().await?)
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: FileStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        Ok(self
            .store
            .update_raw_file_status(id, status, error_message)
            .await?)
    }

    /// Read the persisted bytes, wherever they live. `None` if they are gone.
    pub async fn read_bytes(&self, raw_file: &RawFile) -> Result<Option<Vec<u8>>> {
        Ok(match &raw_file.storage {
            StorageLocation::Inline => self.store.raw_file_content(&raw_file.id).await?,
            StorageLocation::Blob { locator } => self.blobs.get(locator).await?,
        })
    }

    /// Re-read the bytes and compare their SHA-256 with the recorded hash.
    ///
    /// Missing bytes count as a mismatch. Nothing is ever repaired.
    pub async fn verify(&self, raw_file: &RawFile) -> Result<bool> {
        let passed = match self.read_bytes(raw_file).await? {
            Some(bytes) => sha256_hex(&bytes) == raw_file.sha256,
            None => false,
        };
        if !passed {
            tracing::warn!(raw_file_id = %raw_file.id, file = %raw_file.filename, "integrity check failed");
        }
        Ok(passed)
    }

    /// The persisted bytes, guaranteed to hash to `raw_file.sha256`.
    pub async fn read_verified(&self, raw_file: &RawFile) -> Result<Vec<u8>> {
        let bytes = self.read_bytes(raw_file).await?;
        let actual = bytes
            .as_deref()
            .map(sha256_hex)
            .unwrap_or_else(|| "<missing>".to_string());
        match bytes {
            Some(bytes) if actual == raw_file.sha256 => Ok(bytes),
            _ => Err(CustodyError::IntegrityFailure {
                raw_file_id: raw_file.id.clone(),
                expected: raw_file.sha256.clone(),
                actual,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryStore, MemoryBlobStore};

    fn content_store(threshold: u64) -> (Arc<InMemoryStore>, Arc<MemoryBlobStore>, ContentStore) {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let cs = ContentStore::new(store.clone(), blobs.clone(), threshold);
        (store, blobs, cs)
    }

    #[test]
    fn test_hashes() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let (store, _, cs) = content_store(DEFAULT_INLINE_THRESHOLD);
        let first = cs
            .store(Upload::new(b"a;b\n1;2\n".to_vec(), "x.csv", "manual"))
            .await
            .unwrap();
        let second = cs
            .store(Upload::new(b"a;b\n1;2\n".to_vec(), "renamed.csv", "portal"))
            .await
            .unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.raw_file.id, second.raw_file.id);
        assert_eq!(second.raw_file.filename, "x.csv");
        assert_eq!(store.list_raw_files().await.unwrap().len(), 1);

        let lineage = store.lineage_for_file(&first.raw_file.id).await.unwrap();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].operation, crate::models::Operation::Upload);
    }

    #[tokio::test]
    async fn test_large_files_go_to_blob_store() {
        let (_, blobs, cs) = content_store(4);
        let out = cs
            .store(Upload::new(b"0123456789".to_vec(), "big.csv", "manual"))
            .await
            .unwrap();
        let StorageLocation::Blob { locator } = &out.raw_file.storage else {
            panic!("expected blob storage");
        };
        assert!(cs.verify(&out.raw_file).await.unwrap());

        blobs.overwrite(locator, b"tampered!!");
        assert!(!cs.verify(&out.raw_file).await.unwrap());
        let err = cs.read_verified(&out.raw_file).await.unwrap_err();
        assert!(err.is_integrity_failure());

        blobs.remove(locator);
        assert!(!cs.verify(&out.raw_file).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_detects_inline_tampering() {
        let (store, _, cs) = content_store(DEFAULT_INLINE_THRESHOLD);
        let out = cs
            .store(Upload::new(b"a,b\n1,2\n".to_vec(), "t.csv", "manual"))
            .await
            .unwrap();
        assert!(cs.verify(&out.raw_file).await.unwrap());
        assert_eq!(cs.read_verified(&out.raw_file).await.unwrap(), b"a,b\n1,2\n");

        store.overwrite_content(&out.raw_file.id, b"a,b\n1,3\n");
        assert!(!cs.verify(&out.raw_file).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_by_source() {
        let (_, _, cs) = content_store(DEFAULT_INLINE_THRESHOLD);
        cs.store(Upload::new(b"1".to_vec(), "a.csv", "portal").with_source_identifier("lic-1"))
            .await
            .unwrap();
        cs.store(Upload::new(b"2".to_vec(), "b.csv", "portal").with_source_identifier("lic-2"))
            .await
            .unwrap();
        cs.store(Upload::new(b"3".to_vec(), "c.csv", "manual"))
            .await
            .unwrap();

        assert_eq!(cs.find_by_source("portal", None).await.unwrap().len(), 2);
        let one = cs.find_by_source("portal", Some("lic-2")).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].filename, "b.csv");
        assert!(cs.find_by_source("ftp", None).await.unwrap().is_empty());
    }
}
