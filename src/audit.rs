//! Audit and lookup commands: integrity checks, lineage, verification,
//! retrieval logging, citations, alias resolution, and query mapping.

use anyhow::{bail, Result};

use custody_core::resolver::render_mappings;
use custody_core::LineageEntry;

use crate::config::Config;
use crate::get::format_ts;
use crate::services;

/// Re-hash stored bytes. Exits non-zero when any file fails.
pub async fn run_integrity(config: &Config, raw_file_id: Option<&str>) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let files = match raw_file_id {
        Some(id) => match custody.content().get(id).await? {
            Some(file) => vec![file],
            None => {
                pool.close().await;
                bail!("raw file not found: {}", id);
            }
        },
        None => custody.content().list().await?,
    };

    let mut failed = 0u64;
    for file in &files {
        let passed = custody.content().verify(file).await?;
        if !passed {
            failed += 1;
        }
        println!(
            "  {} {} {}",
            if passed { "ok  " } else { "FAIL" },
            file.id,
            file.filename
        );
    }
    println!("integrity: {} checked, {} failed", files.len(), failed);

    pool.close().await;
    if failed > 0 {
        bail!("{} file(s) failed the integrity check", failed);
    }
    Ok(())
}

pub async fn run_lineage(config: &Config, raw_file_id: &str, include_retrievals: bool, json: bool) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let Some(lineage) = custody
        .ledger()
        .get_file_lineage(raw_file_id, include_retrievals)
        .await?
    else {
        pool.close().await;
        bail!("raw file not found: {}", raw_file_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&lineage)?);
    } else {
        println!("--- Lineage: {} ---", lineage.raw_file.filename);
        println!("raw_file_id:    {}", lineage.raw_file.id);
        println!("status:         {}", lineage.raw_file.status.as_str());
        println!("records:        {}", lineage.parsed_records);
        println!("retrievals:     {}", lineage.retrieval_count);
        println!();
        for entry in &lineage.entries {
            print_entry(entry);
        }
        println!();
        for (key, count) in &lineage.operation_status {
            println!("  {:<22} {}", key, count);
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_verify(config: &Config, lineage_id: &str) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let Some(verification) = custody.ledger().verify(lineage_id).await? else {
        pool.close().await;
        bail!("lineage entry not found: {}", lineage_id);
    };

    println!("--- Verification ---");
    print_entry(&verification.entry);
    println!("file:         {} ({})", verification.raw_file.filename, verification.raw_file.id);
    if let Some(ref record) = verification.parsed_record {
        println!("record:       {} (row {})", record.id, record.row_number);
    }
    println!(
        "integrity:    {} (sha256 {}, checked {})",
        if verification.integrity.passed { "passed" } else { "FAILED" },
        verification.integrity.sha256_hash,
        format_ts(verification.integrity.verified_at)
    );
    println!("signature:    {}", verification.signature);

    pool.close().await;
    Ok(())
}

/// Record that records were retrieved to answer a message.
pub async fn run_retrieval(
    config: &Config,
    record_ids: &[String],
    session_id: Option<&str>,
    message_id: Option<&str>,
    scores: &[f64],
) -> Result<()> {
    if !scores.is_empty() && scores.len() != record_ids.len() {
        bail!(
            "--score given {} times for {} records",
            scores.len(),
            record_ids.len()
        );
    }
    let (pool, custody) = services::open(config).await?;
    let scores = if scores.is_empty() { None } else { Some(scores) };
    let entries = custody
        .ledger()
        .log_retrieval(record_ids, session_id, message_id, scores)
        .await?;

    for entry in &entries {
        println!(
            "{} {}",
            entry.id,
            entry.parsed_record_id.as_deref().unwrap_or("-")
        );
    }
    println!("logged {} of {} retrievals", entries.len(), record_ids.len());

    pool.close().await;
    Ok(())
}

pub async fn run_citations(config: &Config, message_id: &str, json: bool) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let citations = custody.ledger().citations_for_message(message_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&citations)?);
    } else if citations.is_empty() {
        println!("No citations for message {}.", message_id);
    } else {
        for (i, citation) in citations.iter().enumerate() {
            let location = match &citation.record {
                Some(record) => format!("row {}", record.row_number),
                None => "whole file".to_string(),
            };
            let score = citation
                .score
                .map(|s| format!(" score={:.3}", s))
                .unwrap_or_default();
            println!(
                "{}. {} ({}) sha256={}{}",
                i + 1,
                citation.raw_file.filename,
                location,
                citation.raw_file.sha256,
                score
            );
            if let Some(ref record) = citation.record {
                println!("   {}", record.text_content);
            }
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_resolve(config: &Config, alias: &str, schema_id: Option<&str>) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let entries = custody.aliases().resolve_alias(alias, schema_id).await?;

    if entries.is_empty() {
        println!("No columns for alias \"{}\".", alias);
    }
    for entry in &entries {
        println!(
            "{}  {:<30} {:<10} {:.2}",
            entry.file_schema_id,
            entry.original_column_name,
            entry.match_type.as_str(),
            entry.confidence
        );
    }

    pool.close().await;
    Ok(())
}

/// Map a natural-language query onto the columns of every active schema.
pub async fn run_map(config: &Config, query: &str, top: usize, json: bool) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let mappings = custody.resolver().map_query_active(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&mappings)?);
    } else {
        print!("{}", render_mappings(&mappings, top));
    }

    pool.close().await;
    Ok(())
}

fn print_entry(entry: &LineageEntry) {
    let duration = entry
        .duration()
        .map(|d| format!(" {}ms", d.num_milliseconds()))
        .unwrap_or_default();
    println!(
        "  {} {:<9} {:<9} {}{}",
        entry.id,
        entry.operation.as_str(),
        entry.status.as_str(),
        format_ts(entry.started_at),
        duration
    );
    if let Some(ref err) = entry.error_message {
        println!("      error: {}", err);
    }
}
