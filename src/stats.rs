//! Database statistics and health overview.
//!
//! Provides a quick summary of what's stored: file counts by lifecycle
//! state, part and embedding coverage, and a per-group breakdown. Used by
//! `embstore stats` to confirm that ingests and embedding runs are landing.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Whole-database counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Totals {
    pub files: i64,
    pub disabled_files: i64,
    pub parts: i64,
    pub embedded_parts: i64,
    /// `(state, count)` for enabled files, in lifecycle order.
    pub by_state: Vec<(String, i64)>,
}

/// Per-group breakdown of enabled files and parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    pub group: String,
    pub flag_name: String,
    pub file_count: i64,
    pub part_count: i64,
    pub embedded_count: i64,
}

pub async fn collect_totals(pool: &SqlitePool) -> Result<Totals> {
    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_file WHERE is_enabled = 1")
        .fetch_one(pool)
        .await?;
    let disabled_files: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_file WHERE is_enabled = 0")
            .fetch_one(pool)
            .await?;
    let parts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_file_part WHERE is_enabled = 1")
            .fetch_one(pool)
            .await?;
    let embedded_parts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM embedding_file_part WHERE is_enabled = 1 AND embedding IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    let state_rows = sqlx::query(
        "SELECT state, COUNT(*) AS n FROM embedding_file WHERE is_enabled = 1 GROUP BY state",
    )
    .fetch_all(pool)
    .await?;

    let by_state = ["New", "Chunking", "Embedding", "Embedded", "Failed"]
        .iter()
        .map(|state| {
            let n = state_rows
                .iter()
                .find(|row| row.get::<String, _>("state") == *state)
                .map(|row| row.get::<i64, _>("n"))
                .unwrap_or(0);
            (state.to_string(), n)
        })
        .collect();

    Ok(Totals {
        files,
        disabled_files,
        parts,
        embedded_parts,
        by_state,
    })
}

pub async fn collect_group_stats(pool: &SqlitePool) -> Result<Vec<GroupStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            g.name,
            g.flag_name,
            COUNT(DISTINCT f.id) AS file_count,
            COUNT(DISTINCT p.id) AS part_count,
            COUNT(DISTINCT CASE WHEN p.embedding IS NOT NULL THEN p.id END) AS embedded_count
        FROM embedding_group g
        LEFT JOIN embedding_file f ON f.group_name = g.name AND f.is_enabled = 1
        LEFT JOIN embedding_file_part p ON p.file_id = f.id AND p.is_enabled = 1
        GROUP BY g.name, g.flag_name, g.flag
        ORDER BY g.flag ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| GroupStats {
            group: row.get("name"),
            flag_name: row.get("flag_name"),
            file_count: row.get("file_count"),
            part_count: row.get("part_count"),
            embedded_count: row.get("embedded_count"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let totals = collect_totals(&pool).await?;
    let groups = collect_group_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("embedstore database stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Files:       {} ({} disabled)", totals.files, totals.disabled_files);
    for (state, n) in &totals.by_state {
        println!("    {:<10} {}", state, n);
    }
    println!("  Parts:       {}", totals.parts);
    println!(
        "  Embedded:    {} / {} ({}%)",
        totals.embedded_parts,
        totals.parts,
        if totals.parts > 0 {
            (totals.embedded_parts * 100) / totals.parts
        } else {
            0
        }
    );

    if !groups.is_empty() {
        println!();
        println!("  By group:");
        println!(
            "  {:<24} {:<8} {:>6} {:>8} {:>10}",
            "GROUP", "FLAG", "FILES", "PARTS", "EMBEDDED"
        );
        println!("  {}", "-".repeat(60));
        for g in &groups {
            println!(
                "  {:<24} {:<8} {:>6} {:>8} {:>10}",
                g.group, g.flag_name, g.file_count, g.part_count, g.embedded_count
            );
        }
    }

    println!();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
