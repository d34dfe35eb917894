//! Input discovery for `custody ingest`.
//!
//! Explicit file paths are taken as-is; directories are walked and filtered
//! with the configured include/exclude globs. Results are sorted and
//! de-duplicated so a batch always runs in the same order.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputFile {
    pub path: PathBuf,
    /// Path relative to the walked root, or the file name for explicit files.
    pub relative: String,
}

pub fn scan_inputs(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<InputFile>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for root in paths {
        if !root.exists() {
            bail!("Input path does not exist: {}", root.display());
        }
        if root.is_file() {
            files.push(InputFile {
                path: root.clone(),
                relative: file_name(root),
            });
            continue;
        }

        let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            files.push(InputFile {
                path: path.to_path_buf(),
                relative: rel_str,
            });
        }
    }

    // Sort for deterministic ordering
    files.sort();
    files.dedup_by(|a, b| a.path == b.path);

    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
