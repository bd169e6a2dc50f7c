//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for a file or directory tree: scan → hash and
//! deduplicate → chunk → inline embedding (non-fatal on failure). Files that
//! yield no text are marked `Failed` so they never sit in `New` forever.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use embedstore_core::chunk::split_text;
use embedstore_core::models::FileState;
use embedstore_core::store::{IngestRequest, Store};
use embedstore_core::ErrorKind;

use crate::config::Config;
use crate::db;
use crate::embed_cmd;
use crate::sqlite_store::SqliteStore;

/// Per-run counters printed at the end of `embstore ingest`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub scanned: u64,
    pub ingested: u64,
    pub deduplicated: u64,
    pub superseded: u64,
    pub parts_written: u64,
    pub failed: u64,
    pub embeddings_written: u64,
    pub embeddings_pending: u64,
}

/// Options for one `embstore ingest` run.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub group: String,
    /// Overrides the stored file name (single file only).
    pub name: Option<String>,
    /// Overrides the `file://` URL used for supersede detection (single file only).
    pub url: Option<String>,
    pub embed: bool,
    pub dry_run: bool,
}

pub async fn run_ingest(config: &Config, path: &Path, options: &IngestOptions) -> Result<()> {
    let paths = collect_paths(config, path)?;
    if paths.len() != 1 && (options.name.is_some() || options.url.is_some()) {
        bail!("--name and --url can only be used when ingesting a single file");
    }

    if options.dry_run {
        let policy = config.chunking.policy();
        let mut estimated = 0usize;
        for p in &paths {
            let text = String::from_utf8_lossy(&std::fs::read(p)?).into_owned();
            estimated += split_text(&text, &policy).map(|c| c.len()).unwrap_or(0);
        }
        println!("ingest {} (dry-run)", path.display());
        println!("  files found: {}", paths.len());
        println!("  estimated parts: {}", estimated);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let summary = ingest_paths(config, &store, &paths, options).await?;

    println!("ingest {}", path.display());
    println!("  group: {}", options.group);
    println!("  scanned: {} files", summary.scanned);
    println!("  ingested: {}", summary.ingested);
    println!("  deduplicated: {}", summary.deduplicated);
    println!("  superseded: {}", summary.superseded);
    println!("  parts written: {}", summary.parts_written);
    println!("  failed: {}", summary.failed);
    if options.embed && config.embedding.is_enabled() {
        println!("  embeddings written: {}", summary.embeddings_written);
        println!("  embeddings pending: {}", summary.embeddings_pending);
    }
    println!("ok");

    store.pool().close().await;
    Ok(())
}

/// Ingest and chunk every path into `options.group`, embedding inline when
/// requested and a provider is configured.
pub async fn ingest_paths<S: Store + ?Sized>(
    config: &Config,
    store: &S,
    paths: &[PathBuf],
    options: &IngestOptions,
) -> Result<IngestSummary> {
    let policy = config.chunking.policy();
    let mut summary = IngestSummary::default();

    for path in paths {
        summary.scanned += 1;
        let bytes = std::fs::read(path)?;
        let name = match &options.name {
            Some(name) => name.clone(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let url = match &options.url {
            Some(url) => url.clone(),
            None => {
                let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                format!("file://{}", absolute.display())
            }
        };

        let request = IngestRequest::new(name, url, bytes, options.group.as_str())
            .with_hash_type(config.hashing.algorithm);
        let ingested = match store.ingest_file(request).await {
            Ok(ingested) => ingested,
            Err(e) if e.kind() == ErrorKind::Validation => {
                warn!(path = %path.display(), error = %e, "file rejected");
                summary.failed += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        summary.superseded += ingested.superseded.len() as u64;

        let file = ingested.file;
        if ingested.deduplicated {
            summary.deduplicated += 1;
            if file.state != FileState::New {
                debug!(file_id = %file.id, path = %path.display(), "already ingested");
                continue;
            }
        } else {
            summary.ingested += 1;
        }

        let parts = match store.chunk_file(file.id, &policy).await {
            Ok(parts) => parts,
            Err(e) if e.kind() == ErrorKind::Validation => {
                warn!(file_id = %file.id, path = %path.display(), error = %e, "file produced no parts");
                store.mark_failed(file.id).await?;
                summary.failed += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        summary.parts_written += parts.len() as u64;
        info!(file_id = %file.id, parts = parts.len(), "file chunked");

        if options.embed {
            let (written, pending) = embed_cmd::embed_parts_inline(config, store, &parts).await;
            summary.embeddings_written += written;
            summary.embeddings_pending += pending;
        }
    }

    Ok(summary)
}

/// Resolve the ingest target to a sorted list of files.
///
/// A single file is taken as-is; a directory is walked and filtered by
/// `[ingest]` include/exclude globs (matched against the relative path).
pub fn collect_paths(config: &Config, root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        bail!("Ingest path does not exist: {}", root.display());
    }
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let include_set = build_globset(&config.ingest.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.ingest.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut paths = Vec::new();
    let walker = WalkDir::new(root).follow_links(config.ingest.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedstore_core::store::memory::InMemoryStore;

    fn test_config(max_part_tokens: usize) -> Config {
        let text = format!(
            "[db]\npath = \"unused.sqlite\"\n[chunking]\nmax_part_tokens = {}\n",
            max_part_tokens
        );
        toml::from_str(&text).unwrap()
    }

    #[test]
    fn test_collect_paths_applies_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        std::fs::write(dir.path().join("c.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("node_modules/d.md"), "skip").unwrap();

        let config = test_config(10);
        let paths = collect_paths(&config, dir.path()).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.txt", "a.md"]);
    }

    #[test]
    fn test_collect_paths_missing_root() {
        let config = test_config(10);
        assert!(collect_paths(&config, Path::new("/definitely/not/here")).is_err());
    }

    #[tokio::test]
    async fn test_ingest_paths_dedups_and_fails_empty() {
        let dir = tempfile::tempdir().unwrap();
        let body: Vec<String> = (0..30).map(|i| format!("w{}", i)).collect();
        std::fs::write(dir.path().join("one.md"), body.join(" ")).unwrap();
        std::fs::write(dir.path().join("empty.md"), "   \n").unwrap();

        let config = test_config(10);
        let store = InMemoryStore::new();
        store.create_group("docs").await.unwrap();

        let paths = collect_paths(&config, dir.path()).unwrap();
        let options = IngestOptions {
            group: "docs".to_string(),
            embed: true,
            ..IngestOptions::default()
        };
        let first = ingest_paths(&config, &store, &paths, &options).await.unwrap();
        assert_eq!(first.scanned, 2);
        assert_eq!(first.ingested, 2);
        assert_eq!(first.parts_written, 3);
        assert_eq!(first.failed, 1);

        let second = ingest_paths(&config, &store, &paths, &options).await.unwrap();
        assert_eq!(second.deduplicated, 2);
        assert_eq!(second.parts_written, 0);

        let failed: Vec<_> = store
            .list_files(Some("docs"))
            .await
            .unwrap()
            .into_iter()
            .filter(|f| f.state == FileState::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "empty.md");
    }
}
