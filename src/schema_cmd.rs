//! `custody schema` subcommands.

use anyhow::{bail, Result};

use custody_core::discovery::render_schema;

use crate::config::Config;
use crate::get::format_ts;
use crate::services;

/// Print the active schema of a file in the readable listing form.
pub async fn run_show(config: &Config, raw_file_id: &str, json: bool) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let Some(schema) = custody.store().active_schema(raw_file_id).await? else {
        pool.close().await;
        bail!("no active schema for raw file: {}", raw_file_id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&schema)?);
    } else {
        print!("{}", render_schema(&schema, custody.heuristics().top_aliases));
    }

    pool.close().await;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let schemas = custody.store().active_schemas().await?;

    if schemas.is_empty() {
        println!("No active schemas.");
    } else {
        println!(
            "{:<36}  {:<36} {:>7} {:>5}  {}",
            "SCHEMA", "RAW FILE", "ROWS", "COLS", "FILENAME"
        );
        for schema in &schemas {
            println!(
                "{:<36}  {:<36} {:>7} {:>5}  {}",
                schema.id, schema.raw_file_id, schema.total_rows, schema.total_columns, schema.filename
            );
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_history(config: &Config, raw_file_id: &str) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let history = custody.store().schema_history(raw_file_id).await?;

    if history.is_empty() {
        println!("No schemas for raw file {}.", raw_file_id);
    }
    for schema in &history {
        println!(
            "{}  {:<10} v{}  {} columns  discovered {}",
            schema.id,
            schema.status.as_str(),
            schema.discovery.version,
            schema.total_columns,
            format_ts(schema.discovered_at)
        );
    }

    pool.close().await;
    Ok(())
}

/// Re-run discovery over the stored bytes and supersede the active schema.
pub async fn run_rediscover(config: &Config, raw_file_id: &str) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let published = custody.rediscover(raw_file_id).await?;

    println!("rediscover {}", raw_file_id);
    println!("  schema: {}", published.schema.id);
    println!("  columns: {}", published.schema.total_columns);
    println!("  aliases: {}", published.aliases);
    if let Some(ref old) = published.superseded {
        println!("  superseded: {}", old);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn run_aliases(config: &Config, file_schema_id: &str) -> Result<()> {
    let (pool, custody) = services::open(config).await?;
    let entries = custody.aliases().aliases_for_schema(file_schema_id).await?;

    for entry in &entries {
        println!(
            "{:<40} -> {:<30} {:<10} {:.2}",
            entry.alias,
            entry.original_column_name,
            entry.match_type.as_str(),
            entry.confidence
        );
    }
    println!("{} aliases", entries.len());

    pool.close().await;
    Ok(())
}
