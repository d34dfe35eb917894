//! Batch ingestion.
//!
//! Scans the given paths, then runs every file through
//! [`Custody::process`] on a bounded pool of tokio tasks. Ctrl-C stops
//! scheduling new files; files already in flight finish normally, so a
//! file is never left half-written by the runner.
//!
//! A failure on one file is reported and counted but never aborts the
//! batch.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use custody_core::{Custody, FileReport, Outcome, Upload};

use crate::config::Config;
use crate::connector_fs::{scan_inputs, InputFile};
use crate::services;

/// Totals for one `custody ingest` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: u64,
    pub processed: u64,
    pub deduplicated: u64,
    pub stored_only: u64,
    pub busy: u64,
    pub records: u64,
    pub skipped_rows: u64,
    pub schemas: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl IngestSummary {
    fn record(&mut self, report: &FileReport) {
        if report.deduplicated {
            self.deduplicated += 1;
        }
        match report.outcome {
            Outcome::Processed => self.processed += 1,
            Outcome::StoredOnly => self.stored_only += 1,
            Outcome::Busy => self.busy += 1,
            Outcome::AlreadyProcessed => {}
        }
        self.records += report.records;
        self.skipped_rows += report.skipped_rows.len() as u64;
        if report.schema.is_some() {
            self.schemas += 1;
        }
    }
}

pub async fn run_ingest(config: &Config, paths: &[PathBuf], source_type: Option<&str>) -> Result<()> {
    let inputs = scan_inputs(paths, &config.ingest)?;
    if inputs.is_empty() {
        println!("ingest: no matching files");
        return Ok(());
    }

    let (pool, custody) = services::open(config).await?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing in-flight files");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let source_type = source_type.unwrap_or(&config.ingest.source_type);
    let summary = ingest_files(
        &custody,
        inputs,
        source_type,
        config.ingest.workers,
        stop,
    )
    .await;

    println!("ingest");
    println!("  files: {}", summary.files);
    println!("  processed: {}", summary.processed);
    println!("  deduplicated: {}", summary.deduplicated);
    if summary.stored_only > 0 {
        println!("  stored only: {}", summary.stored_only);
    }
    if summary.busy > 0 {
        println!("  busy: {}", summary.busy);
    }
    println!("  records written: {}", summary.records);
    println!("  rows skipped: {}", summary.skipped_rows);
    println!("  schemas published: {}", summary.schemas);
    println!("  failed: {}", summary.failed);
    if summary.cancelled > 0 {
        println!("  cancelled: {}", summary.cancelled);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Process `inputs` with at most `workers` files in flight.
///
/// Output lines follow completion order; the summary does not depend on it.
pub async fn ingest_files(
    custody: &Custody,
    inputs: Vec<InputFile>,
    source_type: &str,
    workers: usize,
    stop: Arc<AtomicBool>,
) -> IngestSummary {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut summary = IngestSummary {
        files: inputs.len() as u64,
        ..Default::default()
    };

    for input in inputs {
        if stop.load(Ordering::SeqCst) {
            summary.cancelled += 1;
            continue;
        }
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        // Checked again: the interrupt may have arrived while waiting
        if stop.load(Ordering::SeqCst) {
            summary.cancelled += 1;
            continue;
        }

        let custody = custody.clone();
        let source_type = source_type.to_string();
        tasks.spawn(async move {
            let _permit = permit;
            let result = ingest_one(&custody, &input, &source_type).await;
            (input, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((input, Ok(report))) => {
                print_report(&input, &report);
                summary.record(&report);
            }
            Ok((input, Err(e))) => {
                tracing::error!(path = %input.path.display(), error = %e, "ingest failed");
                println!("  FAILED {}: {:#}", input.relative, e);
                summary.failed += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "ingest task panicked");
                summary.failed += 1;
            }
        }
    }

    summary
}

async fn ingest_one(custody: &Custody, input: &InputFile, source_type: &str) -> Result<FileReport> {
    let bytes = tokio::fs::read(&input.path)
        .await
        .with_context(|| format!("Failed to read {}", input.path.display()))?;
    let filename = input
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input.relative.clone());

    let upload = Upload::new(bytes, filename, source_type)
        .with_source_identifier(input.relative.clone())
        .with_metadata(
            "path",
            serde_json::Value::String(input.path.display().to_string()),
        );

    Ok(custody.process(upload).await?)
}

fn print_report(input: &InputFile, report: &FileReport) {
    let label = match report.outcome {
        Outcome::Processed => "processed",
        Outcome::AlreadyProcessed => "unchanged",
        Outcome::StoredOnly => "stored",
        Outcome::Busy => "busy",
    };
    let mut line = format!("  {:<9} {} [{}]", label, input.relative, report.raw_file.id);
    if report.deduplicated {
        line.push_str(" (duplicate)");
    }
    if report.outcome == Outcome::Processed {
        line.push_str(&format!(
            " rows={} skipped={}",
            report.records,
            report.skipped_rows.len()
        ));
    }
    println!("{}", line);
}
