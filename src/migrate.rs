use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    info!(path = %config.db.path.display(), "database ready");
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Groups and their flag bits
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_group (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            flag INTEGER NOT NULL UNIQUE,
            flag_name TEXT NOT NULL,
            created INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Store-wide counters (next_group_position)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_file (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            size INTEGER NOT NULL,
            hash_type TEXT NOT NULL,
            hash BLOB NOT NULL,
            group_name TEXT NOT NULL,
            group_flag INTEGER NOT NULL,
            state TEXT NOT NULL,
            text_size INTEGER NOT NULL,
            body TEXT NOT NULL,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            created INTEGER NOT NULL,
            modified INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_file_part (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id TEXT NOT NULL,
            group_name TEXT NOT NULL,
            group_flag INTEGER NOT NULL,
            idx INTEGER NOT NULL,
            count INTEGER NOT NULL,
            hash_type TEXT NOT NULL,
            hash BLOB NOT NULL,
            text TEXT NOT NULL,
            text_tokens INTEGER NOT NULL,
            embedding_model TEXT,
            embedding_size INTEGER NOT NULL DEFAULT 0,
            embedding BLOB,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            created INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES embedding_file(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_file_hash_group ON embedding_file(hash, group_name)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_url_group ON embedding_file(url, group_name)")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_part_file_idx
        ON embedding_file_part(file_id, idx) WHERE is_enabled = 1
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_part_hash_model
        ON embedding_file_part(hash_type, hash, embedding_model)
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_part_model_flag ON embedding_file_part(embedding_model, group_flag)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
