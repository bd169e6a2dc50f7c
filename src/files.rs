//! File and part inspection and soft deletion.
//!
//! Backs `embstore file list | show | disable | fail`, `embstore part show |
//! disable`, and `embstore purge`.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use embedstore_core::models::{File, FilePart};
use embedstore_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// File metadata plus its parts, as printed by `embstore file show --json`.
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub size: u64,
    pub hash_type: String,
    pub hash: String,
    pub group: String,
    pub state: String,
    pub text_size: u64,
    pub is_enabled: bool,
    pub created: String,
    pub modified: String,
    pub parts: Vec<PartResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartResponse {
    pub id: i64,
    pub index: u32,
    pub count: u32,
    pub hash: String,
    pub text_tokens: u64,
    pub embedding_model: Option<String>,
    pub embedding_size: u32,
    pub is_enabled: bool,
    pub text: String,
}

impl From<&FilePart> for PartResponse {
    fn from(part: &FilePart) -> Self {
        Self {
            id: part.id,
            index: part.index,
            count: part.count,
            hash: hex::encode(&part.hash),
            text_tokens: part.text_tokens,
            embedding_model: part.embedding_model.clone(),
            embedding_size: part.embedding_size,
            is_enabled: part.is_enabled,
            text: part.text.clone(),
        }
    }
}

fn file_response(file: &File, parts: &[FilePart]) -> FileResponse {
    FileResponse {
        id: file.id,
        name: file.name.clone(),
        url: file.url.clone(),
        size: file.size,
        hash_type: file.hash_type.name().to_string(),
        hash: hex::encode(&file.hash),
        group: file.group_name.clone(),
        state: file.state.to_string(),
        text_size: file.text_size,
        is_enabled: file.is_enabled,
        created: format_ts_iso(&file.created),
        modified: format_ts_iso(&file.modified),
        parts: parts.iter().map(PartResponse::from).collect(),
    }
}

pub fn parse_file_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid file id: {}", id))
}

/// Fetch a file and its parts.
pub async fn get_file<S: Store + ?Sized>(store: &S, id: Uuid) -> Result<FileResponse> {
    let Some(file) = store.get_file(id).await? else {
        bail!("file not found: {}", id);
    };
    let parts = store.list_parts(id).await?;
    Ok(file_response(&file, &parts))
}

pub async fn run_file_list(config: &Config, group: Option<&str>) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let files = store.list_files(group).await?;
    store.pool().close().await;

    if files.is_empty() {
        println!("No files.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16} {:<10} {:>8}  NAME",
        "ID", "GROUP", "STATE", "SIZE"
    );
    println!("{}", "-".repeat(90));
    for file in &files {
        let state = if file.is_enabled {
            file.state.to_string()
        } else {
            format!("{}*", file.state)
        };
        println!(
            "{:<36}  {:<16} {:<10} {:>8}  {}",
            file.id, file.group_name, state, file.size, file.name
        );
    }
    if files.iter().any(|f| !f.is_enabled) {
        println!();
        println!("* disabled");
    }
    Ok(())
}

pub async fn run_file_show(config: &Config, id: &str, json: bool) -> Result<()> {
    let id = parse_file_id(id)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let file = get_file(&store, id).await;
    store.pool().close().await;
    let file = file?;

    if json {
        println!("{}", serde_json::to_string_pretty(&file)?);
        return Ok(());
    }

    println!("--- File ---");
    println!("id:         {}", file.id);
    println!("name:       {}", file.name);
    println!("url:        {}", file.url);
    println!("group:      {}", file.group);
    println!("state:      {}", file.state);
    println!("enabled:    {}", file.is_enabled);
    println!("size:       {} bytes ({} bytes of text)", file.size, file.text_size);
    println!("hash:       {} {}", file.hash_type, file.hash);
    println!("created:    {}", file.created);
    println!("modified:   {}", file.modified);
    println!();

    println!("--- Parts ({}) ---", file.parts.len());
    for part in &file.parts {
        let embedding = match &part.embedding_model {
            Some(model) => format!("{} x{}", model, part.embedding_size),
            None => "pending".to_string(),
        };
        let enabled = if part.is_enabled { "" } else { " (disabled)" };
        println!(
            "[part {}/{} id={} tokens={} embedding={}]{}",
            part.index + 1,
            part.count,
            part.id,
            part.text_tokens,
            embedding,
            enabled
        );
        println!("{}", part.text);
        println!();
    }

    Ok(())
}

pub async fn run_file_disable(config: &Config, id: &str) -> Result<()> {
    let id = parse_file_id(id)?;
    let store = SqliteStore::new(db::connect(config).await?);
    store.disable_file(id).await?;
    store.pool().close().await;
    println!("file {} disabled", id);
    Ok(())
}

pub async fn run_file_fail(config: &Config, id: &str) -> Result<()> {
    let id = parse_file_id(id)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let file = store.mark_failed(id).await?;
    store.pool().close().await;
    println!("file {} marked {}", file.id, file.state);
    Ok(())
}

pub async fn run_part_show(config: &Config, part_id: i64) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let part = store.get_part(part_id).await;
    store.pool().close().await;
    let Some(part) = part? else {
        bail!("part not found: {}", part_id);
    };

    println!("--- Part ---");
    println!("id:         {}", part.id);
    println!("file:       {}", part.file_id);
    println!("group:      {}", part.group_name);
    println!("position:   {}/{}", part.index + 1, part.count);
    println!("hash:       {} {}", part.hash_type, hex::encode(&part.hash));
    println!("tokens:     {}", part.text_tokens);
    println!("enabled:    {}", part.is_enabled);
    match &part.embedding_model {
        Some(model) => println!("embedding:  {} x{}", model, part.embedding_size),
        None => println!("embedding:  pending"),
    }
    println!();
    println!("{}", part.text);
    Ok(())
}

pub async fn run_part_disable(config: &Config, part_id: i64) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    store.disable_part(part_id).await?;
    store.pool().close().await;
    println!("part {} disabled", part_id);
    Ok(())
}

pub async fn run_purge(config: &Config) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let removed = store.purge_disabled().await?;
    store.pool().close().await;
    println!("purge");
    println!("  rows removed: {}", removed);
    Ok(())
}

fn format_ts_iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
