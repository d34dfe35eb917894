//! Raw file and record retrieval by ID.
//!
//! Used by `custody files`, `custody get file|record|rows`.

use anyhow::{bail, Result};

use custody_core::{Custody, ParsedRecord, RawFile, StorageLocation};

use crate::config::Config;
use crate::services;

pub async fn run_files(config: &Config, source_type: Option<&str>, source_id: Option<&str>) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let files = match source_type {
        Some(st) => custody.content().find_by_source(st, source_id).await?,
        None => custody.content().list().await?,
    };

    if files.is_empty() {
        println!("No files.");
    } else {
        println!(
            "{:<36}  {:<8} {:>10}  {:<24} {}",
            "ID", "STATUS", "SIZE", "CREATED", "FILENAME"
        );
        for file in &files {
            println!(
                "{:<36}  {:<8} {:>10}  {:<24} {}",
                file.id,
                file.status.as_str(),
                file.size_bytes,
                format_ts(file.created_at),
                file.filename
            );
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_get_file(config: &Config, id: &str) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let file = require_file(&custody, id).await?;
    let records = custody.store().count_records(&file.id).await?;
    print_file(&file, records);
    pool.close().await;
    Ok(())
}

pub async fn run_get_record(config: &Config, id: &str) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let Some(record) = custody.store().get_record(id).await? else {
        pool.close().await;
        bail!("record not found: {}", id);
    };

    println!("--- Record ---");
    println!("id:           {}", record.id);
    println!("raw_file_id:  {}", record.raw_file_id);
    println!("row_number:   {}", record.row_number);
    println!("created_at:   {}", format_ts(record.created_at));
    println!();
    print_record_data(&record);
    println!();
    println!("--- Normalized ---");
    println!("{}", serde_json::to_string_pretty(&record.normalized_data)?);

    pool.close().await;
    Ok(())
}

pub async fn run_get_rows(config: &Config, raw_file_id: &str, offset: u64, limit: Option<u64>) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let file = require_file(&custody, raw_file_id).await?;
    let rows = custody
        .store()
        .records_for_file(&file.id, offset, limit)
        .await?;

    println!("--- {} ({} rows shown) ---", file.filename, rows.len());
    for record in &rows {
        println!("[row {}] {}", record.row_number, record.id);
        print_record_data(record);
        println!();
    }

    pool.close().await;
    Ok(())
}

async fn require_file(custody: &Custody, id: &str) -> Result<RawFile> {
    match custody.content().get(id).await? {
        Some(file) => Ok(file),
        None => bail!("raw file not found: {}", id),
    }
}

fn print_file(file: &RawFile, records: u64) {
    println!("--- Raw File ---");
    println!("id:                {}", file.id);
    println!("filename:          {}", file.filename);
    println!("format:            {}", file.format.as_str());
    println!("source_type:       {}", file.source_type);
    if let Some(ref ident) = file.source_identifier {
        println!("source_identifier: {}", ident);
    }
    println!("size_bytes:        {}", file.size_bytes);
    println!("sha256:            {}", file.sha256);
    println!("md5:               {}", file.md5);
    match &file.storage {
        StorageLocation::Inline => println!("storage:           inline"),
        StorageLocation::Blob { locator } => println!("storage:           blob ({})", locator),
    }
    println!("status:            {}", file.status.as_str());
    if let Some(ref err) = file.error_message {
        println!("error:             {}", err);
    }
    println!("created_at:        {}", format_ts(file.created_at));
    println!("records:           {}", records);
    if !file.metadata.is_empty() {
        println!("metadata:          {}", serde_json::Value::Object(file.metadata.clone()));
    }
}

fn print_record_data(record: &ParsedRecord) {
    let width = record.data.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    for (column, value) in &record.data {
        println!("  {:<width$}  {}", column, value, width = width);
    }
}

pub(crate) fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
