//! Storage abstraction for embedstore.
//!
//! The [`Store`] trait defines every operation the ingestion pipeline and
//! the search engine need, so the same logic runs against SQLite (in the
//! application crate) or the [`InMemoryStore`](memory::InMemoryStore).
//!
//! The free functions in this module build and validate records the same
//! way for every backend; backends only decide how to persist them.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::chunk::{split_text, ChunkPolicy};
use crate::embedding::vec_to_blob;
use crate::error::{Result, StoreError};
use crate::group::GroupMask;
use crate::hash::{compute_hash, hash_text, HashAlgorithm};
use crate::models::{check_required, File, FilePart, FileState, Group, MAX_MODEL_LEN};

/// Raw input for [`Store::ingest_file`].
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub name: String,
    pub url: String,
    pub bytes: Vec<u8>,
    pub group_name: String,
    pub hash_type: HashAlgorithm,
}

impl IngestRequest {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        bytes: Vec<u8>,
        group_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            bytes,
            group_name: group_name.into(),
            hash_type: HashAlgorithm::default(),
        }
    }

    pub fn with_hash_type(mut self, hash_type: HashAlgorithm) -> Self {
        self.hash_type = hash_type;
        self
    }
}

/// Result of [`Store::ingest_file`].
#[derive(Debug, Clone, Serialize)]
pub struct Ingested {
    pub file: File,
    /// `true` when an enabled file with the same content and group already
    /// existed and was returned unchanged.
    pub deduplicated: bool,
    /// Older files at the same URL in the same group that were disabled
    /// because their content changed.
    pub superseded: Vec<Uuid>,
}

/// Candidate selection for search.
#[derive(Debug, Clone)]
pub struct PartFilter {
    pub model: String,
    /// Only parts whose flag intersects the mask; `None` for every group.
    pub group_mask: Option<GroupMask>,
}

/// A searchable part: its id and still-encoded vector.
#[derive(Debug, Clone)]
pub struct EmbeddedPart {
    pub id: i64,
    pub embedding: Vec<u8>,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_group`](Store::create_group) | Register a group under the next flag bit |
/// | [`ingest_file`](Store::ingest_file) | Hash, deduplicate, and record a file |
/// | [`chunk_file`](Store::chunk_file) | Split a file into parts, atomically |
/// | [`attach_embedding`](Store::attach_embedding) | Store a part's vector |
/// | [`embedded_parts`](Store::embedded_parts) | Search candidates |
///
/// Mutations are atomic: a failed call leaves no partial rows behind, and
/// readers never observe half of a file's parts.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_group(&self, name: &str) -> Result<Group>;

    /// Remove a group. Its flag bit is never handed out again.
    ///
    /// Fails with [`StoreError::GroupInUse`] while enabled files belong to it.
    async fn remove_group(&self, name: &str) -> Result<Group>;

    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// OR together the flags of the named groups.
    async fn resolve_groups(&self, names: &[String]) -> Result<GroupMask>;

    /// Record a file, or return the enabled file with identical content in
    /// the same group.
    async fn ingest_file(&self, request: IngestRequest) -> Result<Ingested>;

    /// Split a `New` (or `Failed`) file into parts and move it to `Embedding`.
    async fn chunk_file(&self, file_id: Uuid, policy: &ChunkPolicy) -> Result<Vec<FilePart>>;

    /// Store `vector` on a part. Completes the file once no enabled part is
    /// left without an embedding.
    async fn attach_embedding(&self, part_id: i64, vector: &[f32], model: &str)
        -> Result<FilePart>;

    /// Soft-delete a file and all of its parts.
    async fn disable_file(&self, file_id: Uuid) -> Result<()>;

    async fn disable_part(&self, part_id: i64) -> Result<()>;

    /// Move a file to `Failed`. A completed file cannot fail.
    async fn mark_failed(&self, file_id: Uuid) -> Result<File>;

    async fn get_file(&self, file_id: Uuid) -> Result<Option<File>>;

    async fn get_part(&self, part_id: i64) -> Result<Option<FilePart>>;

    /// Parts of a file, enabled or not, ordered by id.
    async fn list_parts(&self, file_id: Uuid) -> Result<Vec<FilePart>>;

    /// Files ordered by creation time, optionally restricted to one group.
    async fn list_files(&self, group_name: Option<&str>) -> Result<Vec<File>>;

    /// Enabled parts of enabled files that still need an embedding.
    async fn pending_parts(&self, limit: usize) -> Result<Vec<FilePart>>;

    /// An existing vector for identical part text under the same model.
    async fn find_embedding(
        &self,
        hash_type: HashAlgorithm,
        hash: &[u8],
        model: &str,
    ) -> Result<Option<Vec<u8>>>;

    /// Search candidates, read from a single consistent snapshot.
    async fn embedded_parts(&self, filter: &PartFilter) -> Result<Vec<EmbeddedPart>>;

    /// Physically delete disabled parts and files. Returns rows removed.
    async fn purge_disabled(&self) -> Result<u64>;
}

/// Build a new `File` record and its extracted text from a request.
///
/// Text extraction is a lossy UTF-8 decode of the raw bytes.
pub fn prepare_file(request: &IngestRequest, group: &Group) -> Result<(File, String)> {
    let text = String::from_utf8_lossy(&request.bytes).into_owned();
    let now = Utc::now();
    let file = File {
        id: Uuid::new_v4(),
        name: request.name.clone(),
        url: request.url.clone(),
        size: request.bytes.len() as u64,
        hash_type: request.hash_type,
        hash: compute_hash(&request.bytes, request.hash_type),
        group_name: group.name.clone(),
        group_flag: group.flag,
        state: FileState::New,
        text_size: text.len() as u64,
        is_enabled: true,
        created: now,
        modified: now,
    };
    file.validate()?;
    Ok((file, text))
}

/// Split a file's text into unsaved parts (`id == 0`).
pub fn prepare_parts(file: &File, text: &str, policy: &ChunkPolicy) -> Result<Vec<FilePart>> {
    let now = Utc::now();
    let parts = split_text(text, policy)?
        .into_iter()
        .map(|chunk| FilePart {
            id: 0,
            file_id: file.id,
            group_name: file.group_name.clone(),
            group_flag: file.group_flag,
            index: chunk.index,
            count: chunk.count,
            hash_type: file.hash_type,
            hash: hash_text(&chunk.text, file.hash_type),
            text: chunk.text,
            text_tokens: chunk.tokens,
            embedding_model: None,
            embedding_size: 0,
            embedding: None,
            is_enabled: true,
            created: now,
            modified: now,
        })
        .collect();
    Ok(parts)
}

/// Check that a file may be claimed for chunking.
pub fn check_chunkable(file: &File, has_enabled_parts: bool) -> Result<()> {
    if !file.is_enabled {
        return Err(StoreError::FileDisabled(file.id));
    }
    if !file.state.is_chunkable() || has_enabled_parts {
        return Err(StoreError::AlreadyChunked(file.id));
    }
    Ok(())
}

/// Validate an incoming vector and model name.
pub fn check_vector(vector: &[f32], model: &str) -> Result<()> {
    if vector.is_empty() {
        return Err(StoreError::invalid("vector", "must not be empty"));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(StoreError::invalid(
            "vector",
            format!("component {} is not finite", pos),
        ));
    }
    check_required("embedding_model", model, MAX_MODEL_LEN)
}

/// Apply an embedding to a part in place.
///
/// The first write fixes the part's `embedding_size`; later writes must match it.
pub fn apply_embedding(part: &mut FilePart, vector: &[f32], model: &str) -> Result<()> {
    check_vector(vector, model)?;
    if !part.is_enabled {
        return Err(StoreError::PartDisabled(part.id));
    }
    if part.embedding_size != 0 && part.embedding_size as usize != vector.len() {
        return Err(StoreError::VectorSizeMismatch {
            part_id: part.id,
            expected: part.embedding_size as usize,
            actual: vector.len(),
        });
    }
    part.embedding_size = vector.len() as u32;
    part.embedding = Some(vec_to_blob(vector));
    part.embedding_model = Some(model.to_string());
    part.modified = Utc::now();
    Ok(())
}

/// Check a `mark_failed` transition.
pub fn check_fail_transition(file: &File) -> Result<()> {
    if file.state == FileState::Embedded {
        return Err(StoreError::InvalidTransition {
            file_id: file.id,
            from: file.state,
            to: FileState::Failed,
        });
    }
    Ok(())
}
