//! Filesystem [`BlobStore`] for files kept by reference.
//!
//! Bytes live at `<root>/<sha256[0..2]>/<sha256>`. The locator recorded on
//! the raw file is the path relative to the root, so a blob directory can be
//! moved without rewriting the database.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use custody_core::store::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, locator: &str) -> Result<PathBuf> {
        if locator.is_empty() || locator.contains("..") || locator.starts_with('/') {
            bail!("invalid blob locator: {}", locator);
        }
        Ok(self.root.join(locator))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, sha256: &str, bytes: &[u8]) -> Result<String> {
        if sha256.len() < 3 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid sha256 for blob: {}", sha256);
        }
        let locator = format!("{}/{}", &sha256[..2], sha256);
        let path = self.path_for(&locator)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(locator);
        }

        let dir = self.root.join(&sha256[..2]);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create blob directory: {}", dir.display()))?;

        // Write to a unique temp name, then rename into place
        let tmp = dir.join(format!(".{}.{}.tmp", sha256, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write blob: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move blob into place: {}", path.display()))?;

        tracing::debug!(locator = %locator, size = bytes.len(), "wrote blob");
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob: {}", path.display())),
        }
    }
}
