//! Wiring from configuration to the custody services.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use custody_core::Custody;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Open the database (migrating it if needed) and build a [`Custody`]
/// handle backed by SQLite and the configured blob directory.
pub async fn open(config: &Config) -> Result<(SqlitePool, Custody)> {
    let pool = db::connect(config)
        .await
        .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
    migrate::migrate(&pool).await?;

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let blobs = Arc::new(FsBlobStore::new(config.blob_dir()));
    let custody = Custody::new(
        store,
        blobs,
        config.heuristics.clone(),
        config.storage.inline_threshold_bytes,
    );
    Ok((pool, custody))
}
