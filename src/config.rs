//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/custody.sqlite"
//!
//! [storage]
//! blob_dir = "./data/blobs"
//! inline_threshold_bytes = 10485760
//!
//! [ingest]
//! workers = 4
//! include_globs = ["**/*.csv"]
//! source_type = "portal"
//!
//! [logging]
//! filter = "custody=debug"
//!
//! [heuristics]
//! fuzzy_threshold = 0.7
//! ```
//!
//! Only `[db]` is required; every other section falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use custody_core::content::DEFAULT_INLINE_THRESHOLD;
use custody_core::Heuristics;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub heuristics: Heuristics,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for files kept by reference. Defaults to `blobs/`
    /// next to the database.
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: None,
            inline_threshold_bytes: default_inline_threshold(),
        }
    }
}

fn default_inline_threshold() -> u64 {
    DEFAULT_INLINE_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            source_type: default_source_type(),
            follow_symlinks: false,
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.csv".to_string(),
        "**/*.tsv".to_string(),
        "**/*.txt".to_string(),
    ]
}

fn default_source_type() -> String {
    "manual".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "custody=info,custody_core=info".to_string()
}

impl Config {
    pub fn blob_dir(&self) -> PathBuf {
        self.storage.blob_dir.clone().unwrap_or_else(|| {
            self.db
                .path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("blobs")
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }

    if config.ingest.source_type.trim().is_empty() {
        anyhow::bail!("ingest.source_type must not be empty");
    }

    if config.storage.inline_threshold_bytes == 0 {
        anyhow::bail!("storage.inline_threshold_bytes must be > 0");
    }

    config
        .heuristics
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid [heuristics]: {}", e))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custody.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_dir, path) = write("[db]\npath = \"./data/custody.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.ingest.workers, 4);
        assert_eq!(config.ingest.source_type, "manual");
        assert_eq!(config.storage.inline_threshold_bytes, 10 * 1024 * 1024);
        assert_eq!(config.blob_dir(), PathBuf::from("./data/blobs"));
        assert_eq!(config.heuristics.fuzzy_threshold, 0.6);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let (_dir, path) = write("[db]\npath = \"x.sqlite\"\n[ingest]\nworkers = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("ingest.workers"));
    }

    #[test]
    fn test_heuristics_override_and_validation() {
        let (_dir, path) =
            write("[db]\npath = \"x.sqlite\"\n[heuristics]\nfuzzy_threshold = 0.75\n");
        assert_eq!(load_config(&path).unwrap().heuristics.fuzzy_threshold, 0.75);

        let (_dir, path) =
            write("[db]\npath = \"x.sqlite\"\n[heuristics]\nfuzzy_alias_weight = 0.99\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/custody.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
