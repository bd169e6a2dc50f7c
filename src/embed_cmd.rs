//! Embedding backfill and manual attachment.
//!
//! `embstore embed pending` walks parts that have no vector yet, reuses any
//! vector already stored for identical text under the same model, and sends
//! the rest to the configured provider in batches. `embstore attach` stores a
//! caller-supplied vector on a single part.

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use embedstore_core::embedding::blob_to_vec;
use embedstore_core::models::FilePart;
use embedstore_core::store::Store;
use embedstore_core::ErrorKind;

use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedSummary {
    /// Vectors copied from a part with the same text hash and model.
    pub reused: u64,
    /// Vectors produced by the provider.
    pub embedded: u64,
    pub failed: u64,
}

/// Find and embed parts that have no vector yet.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    if batch_size == 0 {
        bail!("--batch-size must be > 0");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let pending = store.pending_parts(limit.unwrap_or(usize::MAX)).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  parts needing embeddings: {}", pending.len());
        store.pool().close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all parts up to date");
        store.pool().close().await;
        return Ok(());
    }

    let summary = embed_parts(
        &config.embedding,
        &store,
        &model_name,
        &pending,
        batch_size,
    )
    .await?;

    println!("embed pending");
    println!("  model: {}", model_name);
    println!("  total pending: {}", pending.len());
    println!("  reused: {}", summary.reused);
    println!("  embedded: {}", summary.embedded);
    println!("  failed: {}", summary.failed);

    store.pool().close().await;
    Ok(())
}

/// Embed `parts` under `model`, `batch_size` texts per provider call.
///
/// Provider failures and per-part rejections (disabled part, size
/// mismatch) are counted and skipped; only backend errors abort.
pub async fn embed_parts<S: Store + ?Sized>(
    config: &EmbeddingConfig,
    store: &S,
    model: &str,
    parts: &[FilePart],
    batch_size: usize,
) -> Result<EmbedSummary> {
    let mut summary = EmbedSummary::default();

    for batch in parts.chunks(batch_size.max(1)) {
        let mut need_embedding = Vec::new();
        for part in batch {
            if let Some(blob) = store.find_embedding(part.hash_type, &part.hash, model).await? {
                match blob_to_vec(&blob) {
                    Ok(vector) => {
                        if attach(store, part, &vector, model, &mut summary).await? {
                            summary.reused += 1;
                        }
                        continue;
                    }
                    Err(e) => warn!(part_id = part.id, error = %e, "stored vector unreadable"),
                }
            }
            need_embedding.push(part);
        }

        if need_embedding.is_empty() {
            continue;
        }

        let texts: Vec<String> = need_embedding.iter().map(|p| p.text.clone()).collect();
        match embedding::embed_texts(config, &texts).await {
            Ok(vectors) => {
                for (part, vector) in need_embedding.iter().zip(vectors.iter()) {
                    if attach(store, part, vector, model, &mut summary).await? {
                        summary.embedded += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, parts = need_embedding.len(), "embedding batch failed");
                summary.failed += need_embedding.len() as u64;
            }
        }
    }

    Ok(summary)
}

async fn attach<S: Store + ?Sized>(
    store: &S,
    part: &FilePart,
    vector: &[f32],
    model: &str,
    summary: &mut EmbedSummary,
) -> Result<bool> {
    match store.attach_embedding(part.id, vector, model).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() != ErrorKind::Backend => {
            warn!(part_id = part.id, error = %e, "embedding not attached");
            summary.failed += 1;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Embed freshly chunked parts during ingest. Non-fatal on failure.
///
/// Returns `(written, pending)`.
pub async fn embed_parts_inline<S: Store + ?Sized>(
    config: &Config,
    store: &S,
    parts: &[FilePart],
) -> (u64, u64) {
    if !config.embedding.is_enabled() || parts.is_empty() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "could not create embedding provider");
            return (0, parts.len() as u64);
        }
    };

    match embed_parts(
        &config.embedding,
        store,
        provider.model_name(),
        parts,
        config.embedding.batch_size,
    )
    .await
    {
        Ok(summary) => {
            let written = summary.reused + summary.embedded;
            (written, parts.len() as u64 - written)
        }
        Err(e) => {
            warn!(error = %e, "inline embedding failed");
            (0, parts.len() as u64)
        }
    }
}

/// Store a caller-supplied vector on one part.
pub async fn run_attach(
    config: &Config,
    part_id: i64,
    vector: &str,
    model: Option<String>,
) -> Result<()> {
    let vector = parse_vector(vector)?;
    let model = model
        .or_else(|| config.embedding.model.clone())
        .context("--model is required when embedding.model is not configured")?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let part = store.attach_embedding(part_id, &vector, &model).await?;
    debug!(part_id, model = %model, "embedding attached");

    println!("attached");
    println!("  part: {}", part.id);
    println!("  file: {}", part.file_id);
    println!("  model: {}", model);
    println!("  components: {}", part.embedding_size);

    store.pool().close().await;
    Ok(())
}

/// Parse a vector given on the command line, either as a JSON array
/// (`[0.1, 0.2]`) or comma-separated (`0.1,0.2`).
pub fn parse_vector(input: &str) -> Result<Vec<f32>> {
    let trimmed = input.trim();
    let vector: Vec<f32> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).context("Invalid JSON vector")?
    } else {
        trimmed
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<f32>()
                    .with_context(|| format!("Invalid vector component: '{}'", s.trim()))
            })
            .collect::<Result<_>>()?
    };
    if vector.is_empty() {
        bail!("Vector must have at least one component");
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedstore_core::chunk::ChunkPolicy;
    use embedstore_core::store::memory::InMemoryStore;
    use embedstore_core::store::IngestRequest;

    #[test]
    fn test_parse_vector_forms() {
        assert_eq!(parse_vector("0.5, 1,-2").unwrap(), vec![0.5, 1.0, -2.0]);
        assert_eq!(parse_vector("[0.25, 0.75]").unwrap(), vec![0.25, 0.75]);
        assert!(parse_vector("").is_err());
        assert!(parse_vector("1.0,abc").is_err());
        assert!(parse_vector("[]").is_err());
    }

    async fn chunked(store: &InMemoryStore, group: &str, url: &str) -> Vec<FilePart> {
        let request = IngestRequest::new("notes.txt", url, b"same words everywhere".to_vec(), group);
        let file = store.ingest_file(request).await.unwrap().file;
        store
            .chunk_file(file.id, &ChunkPolicy::new(50))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_embed_parts_reuses_vector_for_identical_text() {
        let store = InMemoryStore::new();
        store.create_group("a").await.unwrap();
        store.create_group("b").await.unwrap();

        let first = chunked(&store, "a", "file:///a/notes.txt").await;
        store
            .attach_embedding(first[0].id, &[0.6, 0.8], "m")
            .await
            .unwrap();

        // The provider is disabled, so anything not reused would fail.
        let second = chunked(&store, "b", "file:///b/notes.txt").await;
        let summary = embed_parts(&EmbeddingConfig::default(), &store, "m", &second, 8)
            .await
            .unwrap();
        assert_eq!(
            summary,
            EmbedSummary {
                reused: 1,
                embedded: 0,
                failed: 0
            }
        );
        let part = store.get_part(second[0].id).await.unwrap().unwrap();
        assert_eq!(part.vector().unwrap(), Some(vec![0.6, 0.8]));
    }

    #[tokio::test]
    async fn test_embed_parts_counts_provider_failures() {
        let store = InMemoryStore::new();
        store.create_group("a").await.unwrap();
        let parts = chunked(&store, "a", "file:///a/notes.txt").await;

        let summary = embed_parts(&EmbeddingConfig::default(), &store, "m", &parts, 8)
            .await
            .unwrap();
        assert_eq!(summary.failed, parts.len() as u64);
        assert_eq!(store.pending_parts(10).await.unwrap().len(), parts.len());
    }
}
