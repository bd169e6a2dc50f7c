//! Export stored parts as JSON Lines, one file per group.
//!
//! Each `<group>.jsonl` holds one record per enabled part of an enabled
//! file. Part text is never exported; vectors are included as base64 of the
//! stored little-endian blob only with `--with-embeddings`.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use embedstore_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Serialize)]
struct ExportPart<'a> {
    part_id: i64,
    file_id: Uuid,
    file_name: &'a str,
    url: &'a str,
    group: &'a str,
    index: u32,
    count: u32,
    hash_type: &'static str,
    hash: String,
    text_tokens: u64,
    embedding_model: Option<&'a str>,
    embedding_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<String>,
}

/// One written export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedGroup {
    pub group: String,
    pub path: PathBuf,
    pub parts: usize,
}

pub async fn run_export(
    config: &Config,
    out_dir: &Path,
    group: Option<&str>,
    with_embeddings: bool,
) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let exported = export_groups(&store, out_dir, group, with_embeddings).await;
    store.pool().close().await;
    let exported = exported?;

    println!("export {}", out_dir.display());
    for e in &exported {
        println!("  {}: {} parts -> {}", e.group, e.parts, e.path.display());
    }
    Ok(())
}

/// Write `<group>.jsonl` under `out_dir` for every group (or just `group`).
pub async fn export_groups<S: Store + ?Sized>(
    store: &S,
    out_dir: &Path,
    group: Option<&str>,
    with_embeddings: bool,
) -> Result<Vec<ExportedGroup>> {
    let groups = store.list_groups().await?;
    let selected: Vec<_> = match group {
        Some(name) => {
            let Some(g) = groups.into_iter().find(|g| g.name == name) else {
                bail!("unknown group: {}", name);
            };
            vec![g]
        }
        None => groups,
    };

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut exported = Vec::with_capacity(selected.len());
    for g in &selected {
        let path = out_dir.join(format!("{}.jsonl", file_stem(&g.name)));
        let mut out = BufWriter::new(
            std::fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        );

        let mut count = 0usize;
        for file in store.list_files(Some(&g.name)).await? {
            if !file.is_enabled {
                continue;
            }
            for part in store.list_parts(file.id).await? {
                if !part.is_enabled {
                    continue;
                }
                let record = ExportPart {
                    part_id: part.id,
                    file_id: file.id,
                    file_name: &file.name,
                    url: &file.url,
                    group: &g.name,
                    index: part.index,
                    count: part.count,
                    hash_type: part.hash_type.name(),
                    hash: hex::encode(&part.hash),
                    text_tokens: part.text_tokens,
                    embedding_model: part.embedding_model.as_deref(),
                    embedding_size: part.embedding_size,
                    embedding: if with_embeddings {
                        part.embedding.as_ref().map(|blob| STANDARD.encode(blob))
                    } else {
                        None
                    },
                };
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                count += 1;
            }
        }
        out.flush()?;

        info!(group = %g.name, parts = count, path = %path.display(), "group exported");
        exported.push(ExportedGroup {
            group: g.name.clone(),
            path,
            parts: count,
        });
    }

    Ok(exported)
}

/// Group names are free text; keep file names portable.
fn file_stem(group: &str) -> String {
    group
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedstore_core::chunk::ChunkPolicy;
    use embedstore_core::embedding::blob_to_vec;
    use embedstore_core::store::memory::InMemoryStore;
    use embedstore_core::store::IngestRequest;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Manuals"), "Manuals");
        assert_eq!(file_stem("team docs/v2"), "team_docs_v2");
    }

    #[tokio::test]
    async fn test_export_groups_writes_jsonl_without_text() {
        let store = InMemoryStore::new();
        store.create_group("Manuals").await.unwrap();
        store.create_group("empty group").await.unwrap();
        let words: Vec<String> = (0..9).map(|i| format!("secret{}", i)).collect();
        let request = IngestRequest::new("m.txt", "", words.join(" ").into_bytes(), "Manuals");
        let file = store.ingest_file(request).await.unwrap().file;
        let parts = store
            .chunk_file(file.id, &ChunkPolicy::new(3))
            .await
            .unwrap();
        store
            .attach_embedding(parts[0].id, &[0.5, -0.5], "m")
            .await
            .unwrap();
        store.disable_part(parts[2].id).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let exported = export_groups(&store, dir.path(), None, true).await.unwrap();
        assert_eq!(exported.len(), 2);

        let manuals = exported.iter().find(|e| e.group == "Manuals").unwrap();
        assert_eq!(manuals.parts, 2);
        let content = std::fs::read_to_string(&manuals.path).unwrap();
        assert!(!content.contains("secret"));

        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let encoded = lines[0]["embedding"].as_str().unwrap();
        let blob = STANDARD.decode(encoded).unwrap();
        assert_eq!(blob_to_vec(&blob).unwrap(), vec![0.5, -0.5]);
        assert!(lines[1].get("embedding").is_none());

        let empty = exported.iter().find(|e| e.group == "empty group").unwrap();
        assert_eq!(empty.parts, 0);
        assert!(empty.path.ends_with("empty_group.jsonl"));
    }

    #[tokio::test]
    async fn test_export_unknown_group() {
        let store = InMemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(export_groups(&store, dir.path(), Some("nope"), false)
            .await
            .is_err());
    }
}
