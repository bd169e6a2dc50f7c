use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use embedstore::db;
use embedstore::migrate;
use embedstore::search::search_with_timeout;
use embedstore::sqlite_store::SqliteStore;
use embedstore_core::chunk::ChunkPolicy;
use embedstore_core::embedding::vec_to_blob;
use embedstore_core::hash::HashAlgorithm;
use embedstore_core::models::FileState;
use embedstore_core::search::{search, CancelToken, SearchRequest};
use embedstore_core::store::{IngestRequest, Store};
use embedstore_core::{ErrorKind, StoreError};

async fn open_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/store.sqlite"))
        .await
        .unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

fn words(n: usize, prefix: &str) -> Vec<u8> {
    (0..n)
        .map(|i| format!("{}{}", prefix, i))
        .collect::<Vec<_>>()
        .join(" ")
        .into_bytes()
}

fn unit(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[axis] = 1.0;
    v
}

#[tokio::test]
async fn test_end_to_end_ingest_embed_search() {
    let (_tmp, store) = open_store().await;
    store.create_group("Manuals").await.unwrap();
    store.create_group("Other").await.unwrap();

    let request = IngestRequest::new(
        "manual.txt",
        "file:///docs/manual.txt",
        words(200, "w"),
        "Manuals",
    );
    let ingested = store.ingest_file(request).await.unwrap();
    assert!(!ingested.deduplicated);
    let file = ingested.file;
    assert_eq!(file.state, FileState::New);
    assert_eq!(file.hash.len(), HashAlgorithm::Sha2_256.digest_size());

    let parts = store
        .chunk_file(file.id, &ChunkPolicy::new(50))
        .await
        .unwrap();
    assert_eq!(parts.len(), 4);
    assert!(parts.iter().all(|p| p.count == 4 && p.text_tokens == 50));
    let rebuilt: Vec<&str> = parts.iter().map(|p| p.text.trim_end()).collect();
    assert_eq!(rebuilt.join(" ").into_bytes(), words(200, "w"));
    assert_eq!(
        store.get_file(file.id).await.unwrap().unwrap().state,
        FileState::Embedding
    );

    for (i, part) in parts.iter().enumerate() {
        store
            .attach_embedding(part.id, &unit(8, i), "test-model")
            .await
            .unwrap();
    }
    assert_eq!(
        store.get_file(file.id).await.unwrap().unwrap().state,
        FileState::Embedded
    );

    // A perfect match in another group must not leak into a Manuals search.
    let other = store
        .ingest_file(IngestRequest::new("o.txt", "", words(10, "o"), "Other"))
        .await
        .unwrap()
        .file;
    let other_parts = store
        .chunk_file(other.id, &ChunkPolicy::new(50))
        .await
        .unwrap();
    let mut query = unit(8, 1);
    query[2] = 0.5;
    store
        .attach_embedding(other_parts[0].id, &query, "test-model")
        .await
        .unwrap();

    let mask = store.resolve_groups(&["Manuals".to_string()]).await.unwrap();
    let request = SearchRequest::new(query.clone(), "test-model")
        .with_groups(mask)
        .with_top_k(2);
    let results = search(&store, &request, &CancelToken::new())
        .await
        .unwrap()
        .completed()
        .unwrap();
    let hit_ids: Vec<i64> = results.hits.iter().map(|h| h.part.id).collect();
    assert_eq!(hit_ids, vec![parts[1].id, parts[2].id]);
    assert!(results.hits[0].score > results.hits[1].score);
    assert_eq!(results.scanned, 4);

    let everything = SearchRequest::new(query, "test-model").with_top_k(1);
    let results = search(&store, &everything, &CancelToken::new())
        .await
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(results.hits[0].part.id, other_parts[0].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_chunk_file_has_single_winner() {
    let (_tmp, store) = open_store().await;
    let store = Arc::new(store);
    store.create_group("g").await.unwrap();
    let file_id = store
        .ingest_file(IngestRequest::new("a.txt", "", words(120, "c"), "g"))
        .await
        .unwrap()
        .file
        .id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.chunk_file(file_id, &ChunkPolicy::new(25)).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(parts) => {
                winners += 1;
                assert_eq!(parts.len(), 5);
            }
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict, "{}", e),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.list_parts(file_id).await.unwrap().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attach_completes_file_once() {
    let (_tmp, store) = open_store().await;
    let store = Arc::new(store);
    store.create_group("g").await.unwrap();
    let file_id = store
        .ingest_file(IngestRequest::new("a.txt", "", words(160, "p"), "g"))
        .await
        .unwrap()
        .file
        .id;
    let parts = store
        .chunk_file(file_id, &ChunkPolicy::new(10))
        .await
        .unwrap();
    assert_eq!(parts.len(), 16);

    let mut handles = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let store = Arc::clone(&store);
        let part_id = part.id;
        handles.push(tokio::spawn(async move {
            store
                .attach_embedding(part_id, &unit(16, i), "m")
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let file = store.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(file.state, FileState::Embedded);
    assert!(store.pending_parts(100).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dedup_supersede_and_purge() {
    let (_tmp, store) = open_store().await;
    store.create_group("a").await.unwrap();
    store.create_group("b").await.unwrap();

    let first = store
        .ingest_file(IngestRequest::new("x.txt", "file:///x.txt", words(20, "v"), "a"))
        .await
        .unwrap();
    let again = store
        .ingest_file(IngestRequest::new("x.txt", "file:///x.txt", words(20, "v"), "a"))
        .await
        .unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.file.id, first.file.id);

    // Same bytes in another group is a separate file.
    let elsewhere = store
        .ingest_file(IngestRequest::new("x.txt", "file:///x.txt", words(20, "v"), "b"))
        .await
        .unwrap();
    assert!(!elsewhere.deduplicated);

    store
        .chunk_file(first.file.id, &ChunkPolicy::new(10))
        .await
        .unwrap();

    // New content at the same URL supersedes the old file in its group only.
    let updated = store
        .ingest_file(IngestRequest::new("x.txt", "file:///x.txt", words(21, "v"), "a"))
        .await
        .unwrap();
    assert_eq!(updated.superseded, vec![first.file.id]);
    let old = store.get_file(first.file.id).await.unwrap().unwrap();
    assert!(!old.is_enabled);
    assert!(store
        .list_parts(first.file.id)
        .await
        .unwrap()
        .iter()
        .all(|p| !p.is_enabled));
    assert!(store.get_file(elsewhere.file.id).await.unwrap().unwrap().is_enabled);

    // One disabled file plus its two disabled parts.
    assert_eq!(store.purge_disabled().await.unwrap(), 3);
    assert!(store.get_file(first.file.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_flags_survive_reopen_and_are_not_reused() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("groups.sqlite");

    {
        let pool = db::connect_path(&path).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        let store = SqliteStore::new(pool);
        let a = store.create_group("a").await.unwrap();
        let b = store.create_group("b").await.unwrap();
        assert_eq!(a.flag.bits(), 1);
        assert_eq!(b.flag.bits(), 2);
        store.remove_group("b").await.unwrap();
        store.pool().close().await;
    }

    let pool = db::connect_path(&path).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let store = SqliteStore::new(pool);
    let c = store.create_group("c").await.unwrap();
    assert_eq!(c.flag.bits(), 4);
    assert_eq!(c.flag_name, "Group03");

    let err = store.create_group("a").await.unwrap_err();
    assert!(matches!(err, StoreError::GroupExists(_)));
    let err = store
        .resolve_groups(&["missing".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_empty_text_reverts_then_fails() {
    let (_tmp, store) = open_store().await;
    store.create_group("g").await.unwrap();
    let file = store
        .ingest_file(IngestRequest::new("blank.txt", "", b" \n\t ".to_vec(), "g"))
        .await
        .unwrap()
        .file;

    let err = store
        .chunk_file(file.id, &ChunkPolicy::new(10))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::EmptyInput));
    assert_eq!(
        store.get_file(file.id).await.unwrap().unwrap().state,
        FileState::New
    );

    let failed = store.mark_failed(file.id).await.unwrap();
    assert_eq!(failed.state, FileState::Failed);
}

#[tokio::test]
async fn test_remove_group_in_use_is_refused() {
    let (_tmp, store) = open_store().await;
    store.create_group("a").await.unwrap();
    let file = store
        .ingest_file(IngestRequest::new("a.txt", "", words(10, "r"), "a"))
        .await
        .unwrap()
        .file;
    let parts = store
        .chunk_file(file.id, &ChunkPolicy::new(10))
        .await
        .unwrap();
    store
        .attach_embedding(parts[0].id, &unit(4, 0), "m")
        .await
        .unwrap();

    let err = store.remove_group("a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, StoreError::GroupInUse { files: 1, .. }));
    let mask = store.resolve_groups(&["a".to_string()]).await.unwrap();
    assert_eq!(mask, file.group_flag);

    store.disable_file(file.id).await.unwrap();
    let old = store.remove_group("a").await.unwrap();
    let new = store.create_group("a").await.unwrap();
    assert_ne!(old.flag, new.flag);

    let again = store
        .ingest_file(IngestRequest::new("a.txt", "", words(10, "r"), "a"))
        .await
        .unwrap();
    assert!(!again.deduplicated);
    assert_eq!(again.file.group_flag, new.flag);
}

#[tokio::test]
async fn test_search_timeout_fires_during_scan() {
    let (_tmp, store) = open_store().await;
    store.create_group("g").await.unwrap();
    let file = store
        .ingest_file(IngestRequest::new("big.txt", "", words(4096, "s"), "g"))
        .await
        .unwrap()
        .file;
    let parts = store
        .chunk_file(file.id, &ChunkPolicy::new(1))
        .await
        .unwrap();
    assert_eq!(parts.len(), 4096);
    sqlx::query(
        "UPDATE embedding_file_part SET embedding = ?, embedding_model = 'm', embedding_size = 2",
    )
    .bind(vec_to_blob(&[0.6, 0.8]))
    .execute(store.pool())
    .await
    .unwrap();

    let request = SearchRequest::new(vec![1.0, 0.0], "m").with_top_k(3);
    let outcome = search_with_timeout(&store, &request, Duration::ZERO)
        .await
        .unwrap();
    assert!(outcome.is_cancelled());
    assert!(outcome.completed().is_none());

    let outcome = search_with_timeout(&store, &request, Duration::from_secs(30))
        .await
        .unwrap();
    let results = outcome.completed().unwrap();
    assert_eq!(results.hits.len(), 3);
    assert_eq!(results.scanned, 4096);
}
