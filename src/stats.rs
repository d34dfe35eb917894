//! Database statistics and health overview.
//!
//! Summarises what is in custody: raw files by status and source, parsed
//! records, active schemas and aliases, and the lineage ledger broken down
//! by operation and status. Used by `custody stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::services;

struct SourceStats {
    source_type: String,
    file_count: i64,
    total_bytes: i64,
    record_count: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let (pool, custody) = services::open(config).await?;

    let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_files")
        .fetch_one(&pool)
        .await?;

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parsed_records")
        .fetch_one(&pool)
        .await?;

    let active_schemas: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM file_schemas WHERE status = 'active'")
            .fetch_one(&pool)
            .await?;

    let total_aliases: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM alias_entries a JOIN file_schemas s ON s.id = a.file_schema_id WHERE s.status = 'active'",
    )
    .fetch_one(&pool)
    .await?;

    let inline_bytes: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM raw_files WHERE storage_kind = 'inline'",
    )
    .fetch_one(&pool)
    .await?;

    let blob_bytes: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(size_bytes), 0) FROM raw_files WHERE storage_kind = 'blob'",
    )
    .fetch_one(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Custody: Database Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Blobs:       {}", config.blob_dir().display());
    println!();
    println!("  Raw files:   {}", total_files);
    println!("    inline:    {}", format_bytes(inline_bytes as u64));
    println!("    blob:      {}", format_bytes(blob_bytes as u64));
    println!("  Records:     {}", total_records);
    println!("  Schemas:     {} active", active_schemas);
    println!("  Aliases:     {}", total_aliases);

    let status_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM raw_files GROUP BY status ORDER BY status")
        .fetch_all(&pool)
        .await?;
    if !status_rows.is_empty() {
        println!();
        println!("  By status:");
        for row in &status_rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            println!("    {:<10} {}", status, n);
        }
    }

    let source_rows = sqlx::query(
        r#"
        SELECT
            f.source_type,
            COUNT(DISTINCT f.id) AS file_count,
            (SELECT COALESCE(SUM(size_bytes), 0) FROM raw_files g WHERE g.source_type = f.source_type) AS total_bytes,
            COUNT(r.id) AS record_count
        FROM raw_files f
        LEFT JOIN parsed_records r ON r.raw_file_id = f.id
        GROUP BY f.source_type
        ORDER BY file_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let source_stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source_type: row.get("source_type"),
            file_count: row.get("file_count"),
            total_bytes: row.get("total_bytes"),
            record_count: row.get("record_count"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>6} {:>10} {:>9}",
            "SOURCE", "FILES", "SIZE", "RECORDS"
        );
        println!("  {}", "-".repeat(52));
        for s in &source_stats {
            println!(
                "  {:<24} {:>6} {:>10} {:>9}",
                s.source_type,
                s.file_count,
                format_bytes(s.total_bytes as u64),
                s.record_count
            );
        }
    }

    let ledger = custody.ledger().statistics().await?;
    println!();
    println!("  Lineage:     {} entries", ledger.total_entries);
    for (status, n) in &ledger.by_status {
        println!("    {:<10} {}", status, n);
    }
    if !ledger.by_operation.is_empty() {
        println!();
        println!("  {:<12} {:>9} {:>9} {:>7}", "OPERATION", "STARTED", "COMPLETED", "FAILED");
        for (operation, counts) in &ledger.by_operation {
            let get = |s: &str| counts.get(s).copied().unwrap_or(0);
            println!(
                "  {:<12} {:>9} {:>9} {:>7}",
                operation,
                get("started"),
                get("completed"),
                get("failed")
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
