//! Similarity search over stored part embeddings.
//!
//! The query is either embedded with the configured provider or given
//! directly with `--vector`. Group names are resolved to a flag mask before
//! scoring, and the whole search is cancelled once `search.timeout_ms`
//! elapses.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use embedstore_core::search::{self, CancelToken, SearchOutcome, SearchRequest};
use embedstore_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embed_cmd::parse_vector;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

const EXCERPT_CHARS: usize = 160;

/// Command-line inputs for `embstore search`.
#[derive(Debug, Default, Clone)]
pub struct SearchArgs {
    pub query: Option<String>,
    pub vector: Option<String>,
    pub groups: Vec<String>,
    pub model: Option<String>,
    pub top_k: Option<usize>,
    pub min_similarity: Option<f32>,
    pub json: bool,
}

/// One ranked part as printed by `embstore search --json`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub part_id: i64,
    pub file_id: Uuid,
    pub group: String,
    pub index: u32,
    pub count: u32,
    pub score: f32,
    pub text: String,
}

pub async fn run_search(config: &Config, args: SearchArgs) -> Result<()> {
    let (vector, model) = query_vector(config, &args).await?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);

    let mut request = SearchRequest::new(vector, model)
        .with_top_k(args.top_k.unwrap_or(config.search.top_k))
        .with_min_similarity(args.min_similarity.unwrap_or(config.search.min_similarity));
    if !args.groups.is_empty() {
        request = request.with_groups(store.resolve_groups(&args.groups).await?);
    }

    let timeout = Duration::from_millis(config.search.timeout_ms);
    let outcome = search_with_timeout(&store, &request, timeout).await?;
    store.pool().close().await;

    let Some(results) = outcome.completed() else {
        bail!(
            "Search cancelled after {} ms (search.timeout_ms)",
            config.search.timeout_ms
        );
    };
    for skipped in &results.skipped {
        warn!(part_id = skipped.part_id, reason = %skipped.reason, "part skipped");
    }

    let items: Vec<SearchResultItem> = results
        .hits
        .into_iter()
        .map(|hit| SearchResultItem {
            part_id: hit.part.id,
            file_id: hit.part.file_id,
            group: hit.part.group_name,
            index: hit.part.index,
            count: hit.part.count,
            score: hit.score,
            text: hit.part.text,
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, item) in items.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} part {}/{}",
            i + 1,
            item.score,
            item.file_id,
            item.index + 1,
            item.count
        );
        println!("    group: {}", item.group);
        println!("    excerpt: \"{}\"", excerpt(&item.text));
        println!("    part id: {}", item.part_id);
        println!();
    }
    println!("scanned {} parts", results.scanned);

    Ok(())
}

/// Run a search that is cancelled when `timeout` elapses.
pub async fn search_with_timeout<S: Store + ?Sized>(
    store: &S,
    request: &SearchRequest,
    timeout: Duration,
) -> Result<SearchOutcome> {
    let cancel = CancelToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(timeout_ms = timeout.as_millis() as u64, "search timed out");
            cancel.cancel();
        })
    };

    let outcome = search::search(store, request, &cancel).await;
    timer.abort();
    Ok(outcome?)
}

async fn query_vector(config: &Config, args: &SearchArgs) -> Result<(Vec<f32>, String)> {
    match (&args.vector, &args.query) {
        (Some(raw), _) => {
            let model = args
                .model
                .clone()
                .or_else(|| config.embedding.model.clone())
                .context("--model is required with --vector when embedding.model is not configured")?;
            Ok((parse_vector(raw)?, model))
        }
        (None, Some(query)) => {
            if !config.embedding.is_enabled() {
                bail!("Text queries need an embedding provider. Set [embedding] provider in config or pass --vector.");
            }
            let provider = embedding::create_provider(&config.embedding)?;
            let vector = embedding::embed_query(&config.embedding, query).await?;
            Ok((vector, provider.model_name().to_string()))
        }
        (None, None) => bail!("Provide a query or --vector"),
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &flat[..cut]),
        None => flat.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedstore_core::chunk::ChunkPolicy;
    use embedstore_core::store::memory::InMemoryStore;
    use embedstore_core::store::IngestRequest;

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("short\ntext"), "short text");
        let long = "é".repeat(EXCERPT_CHARS + 5);
        let cut = excerpt(&long);
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 1);
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn test_search_with_timeout_completes() {
        let store = InMemoryStore::new();
        store.create_group("docs").await.unwrap();
        let request = IngestRequest::new("a.txt", "", b"one two three".to_vec(), "docs");
        let file = store.ingest_file(request).await.unwrap().file;
        let parts = store
            .chunk_file(file.id, &ChunkPolicy::new(10))
            .await
            .unwrap();
        store
            .attach_embedding(parts[0].id, &[1.0, 0.0], "m")
            .await
            .unwrap();

        let request = SearchRequest::new(vec![1.0, 0.0], "m");
        let outcome = search_with_timeout(&store, &request, Duration::from_secs(30))
            .await
            .unwrap();
        let results = outcome.completed().unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].part.id, parts[0].id);
    }
}
