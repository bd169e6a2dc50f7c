//! In-memory [`Store`] implementation for tests and embedding in other hosts.
//!
//! All tables live behind one `std::sync::RwLock`, so every search reads a
//! consistent snapshot and every mutation is atomic. Chunking claims the
//! file under the write lock, splits the text with the lock released, then
//! publishes all parts in a single write section.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::chunk::ChunkPolicy;
use crate::error::{Result, StoreError};
use crate::group::{GroupMask, GroupRegistry};
use crate::hash::HashAlgorithm;
use crate::models::{File, FilePart, FileState, Group};

use super::{
    apply_embedding, check_chunkable, check_fail_transition, prepare_file, prepare_parts,
    EmbeddedPart, IngestRequest, Ingested, PartFilter, Store,
};

struct StoredFile {
    file: File,
    text: String,
}

type DedupKey = (HashAlgorithm, Vec<u8>, String);

fn dedup_key(file: &File) -> DedupKey {
    (file.hash_type, file.hash.clone(), file.group_name.clone())
}

#[derive(Default)]
struct Inner {
    files: HashMap<Uuid, StoredFile>,
    parts: BTreeMap<i64, FilePart>,
    parts_by_file: HashMap<Uuid, Vec<i64>>,
    /// Enabled files by content and group.
    dedup: HashMap<DedupKey, Uuid>,
    groups: GroupRegistry,
    last_part_id: i64,
}

impl Inner {
    fn file_parts(&self, file_id: Uuid) -> impl Iterator<Item = &FilePart> {
        self.parts_by_file
            .get(&file_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.parts.get(id))
    }

    fn has_enabled_parts(&self, file_id: Uuid) -> bool {
        self.file_parts(file_id).any(|p| p.is_enabled)
    }

    fn disable_file(&mut self, file_id: Uuid) -> Result<()> {
        let stored = self
            .files
            .get_mut(&file_id)
            .ok_or(StoreError::FileNotFound(file_id))?;
        if stored.file.is_enabled {
            stored.file.is_enabled = false;
            stored.file.modified = Utc::now();
            let key = dedup_key(&stored.file);
            if self.dedup.get(&key) == Some(&file_id) {
                self.dedup.remove(&key);
            }
        }
        let now = Utc::now();
        for id in self.parts_by_file.get(&file_id).into_iter().flatten() {
            if let Some(part) = self.parts.get_mut(id) {
                if part.is_enabled {
                    part.is_enabled = false;
                    part.modified = now;
                }
            }
        }
        Ok(())
    }

    /// Move a file to `Embedded` once every enabled part has a vector.
    fn complete_if_done(&mut self, file_id: Uuid) {
        let mut enabled = 0;
        let mut pending = 0;
        for part in self.file_parts(file_id).filter(|p| p.is_enabled) {
            enabled += 1;
            if !part.is_embedded() {
                pending += 1;
            }
        }
        if enabled == 0 || pending > 0 {
            return;
        }
        if let Some(stored) = self.files.get_mut(&file_id) {
            if stored.file.state == FileState::Embedding {
                stored.file.state = FileState::Embedded;
                stored.file.modified = Utc::now();
                debug!(file_id = %file_id, "file fully embedded");
            }
        }
    }
}

/// In-memory store.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_registry(GroupRegistry::new())
    }

    /// Store whose group registry has a custom flag width.
    pub fn with_registry(groups: GroupRegistry) -> Self {
        Self {
            inner: RwLock::new(Inner {
                groups,
                ..Inner::default()
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    /// Put a claimed file back to the state it had before the claim.
    fn release_claim(&self, file_id: Uuid, prior: FileState) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(stored) = inner.files.get_mut(&file_id) {
            if stored.file.state == FileState::Chunking {
                stored.file.state = prior;
                stored.file.modified = Utc::now();
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_group(&self, name: &str) -> Result<Group> {
        self.write()?.groups.create_group(name)
    }

    async fn remove_group(&self, name: &str) -> Result<Group> {
        let mut inner = self.write()?;
        let files = inner
            .files
            .values()
            .filter(|s| s.file.is_enabled && s.file.group_name == name)
            .count() as u64;
        if files > 0 && inner.groups.get(name).is_some() {
            return Err(StoreError::GroupInUse {
                name: name.to_string(),
                files,
            });
        }
        inner.groups.remove_group(name)
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.read()?.groups.groups())
    }

    async fn resolve_groups(&self, names: &[String]) -> Result<GroupMask> {
        self.read()?.groups.resolve(names)
    }

    async fn ingest_file(&self, request: IngestRequest) -> Result<Ingested> {
        let group = self
            .read()?
            .groups
            .get(&request.group_name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownGroup(request.group_name.clone()))?;
        let (file, text) = prepare_file(&request, &group)?;

        let mut inner = self.write()?;
        if inner.groups.get(&group.name).is_none() {
            return Err(StoreError::UnknownGroup(group.name));
        }

        let key = dedup_key(&file);
        if let Some(existing) = inner.dedup.get(&key).and_then(|id| inner.files.get(id)) {
            return Ok(Ingested {
                file: existing.file.clone(),
                deduplicated: true,
                superseded: Vec::new(),
            });
        }

        let superseded: Vec<Uuid> = if file.url.is_empty() {
            Vec::new()
        } else {
            inner
                .files
                .values()
                .filter(|s| {
                    s.file.is_enabled
                        && s.file.url == file.url
                        && s.file.group_name == file.group_name
                })
                .map(|s| s.file.id)
                .collect()
        };
        for id in &superseded {
            inner.disable_file(*id)?;
        }

        inner.dedup.insert(key, file.id);
        inner.files.insert(
            file.id,
            StoredFile {
                file: file.clone(),
                text,
            },
        );
        Ok(Ingested {
            file,
            deduplicated: false,
            superseded,
        })
    }

    async fn chunk_file(&self, file_id: Uuid, policy: &ChunkPolicy) -> Result<Vec<FilePart>> {
        let (file, text, prior) = {
            let mut inner = self.write()?;
            let has_parts = inner.has_enabled_parts(file_id);
            let stored = inner
                .files
                .get_mut(&file_id)
                .ok_or(StoreError::FileNotFound(file_id))?;
            check_chunkable(&stored.file, has_parts)?;
            let prior = stored.file.state;
            stored.file.state = FileState::Chunking;
            stored.file.modified = Utc::now();
            (stored.file.clone(), stored.text.clone(), prior)
        };

        let mut parts = match prepare_parts(&file, &text, policy) {
            Ok(parts) => parts,
            Err(e) => {
                self.release_claim(file_id, prior)?;
                return Err(e);
            }
        };

        let mut inner = self.write()?;
        let stored = inner
            .files
            .get_mut(&file_id)
            .ok_or(StoreError::FileNotFound(file_id))?;
        if !stored.file.is_enabled {
            stored.file.state = prior;
            return Err(StoreError::FileDisabled(file_id));
        }
        stored.file.state = FileState::Embedding;
        stored.file.modified = Utc::now();

        let mut ids = Vec::with_capacity(parts.len());
        for part in &mut parts {
            inner.last_part_id += 1;
            part.id = inner.last_part_id;
            ids.push(part.id);
            inner.parts.insert(part.id, part.clone());
        }
        inner.parts_by_file.entry(file_id).or_default().extend(ids);
        debug!(file_id = %file_id, parts = parts.len(), "file chunked");
        Ok(parts)
    }

    async fn attach_embedding(
        &self,
        part_id: i64,
        vector: &[f32],
        model: &str,
    ) -> Result<FilePart> {
        let mut inner = self.write()?;
        let part = inner
            .parts
            .get_mut(&part_id)
            .ok_or(StoreError::PartNotFound(part_id))?;
        apply_embedding(part, vector, model)?;
        let updated = part.clone();
        inner.complete_if_done(updated.file_id);
        Ok(updated)
    }

    async fn disable_file(&self, file_id: Uuid) -> Result<()> {
        self.write()?.disable_file(file_id)
    }

    async fn disable_part(&self, part_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        let part = inner
            .parts
            .get_mut(&part_id)
            .ok_or(StoreError::PartNotFound(part_id))?;
        if !part.is_enabled {
            return Ok(());
        }
        part.is_enabled = false;
        part.modified = Utc::now();
        let file_id = part.file_id;
        inner.complete_if_done(file_id);
        Ok(())
    }

    async fn mark_failed(&self, file_id: Uuid) -> Result<File> {
        let mut inner = self.write()?;
        let stored = inner
            .files
            .get_mut(&file_id)
            .ok_or(StoreError::FileNotFound(file_id))?;
        check_fail_transition(&stored.file)?;
        stored.file.state = FileState::Failed;
        stored.file.modified = Utc::now();
        Ok(stored.file.clone())
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<File>> {
        Ok(self.read()?.files.get(&file_id).map(|s| s.file.clone()))
    }

    async fn get_part(&self, part_id: i64) -> Result<Option<FilePart>> {
        Ok(self.read()?.parts.get(&part_id).cloned())
    }

    async fn list_parts(&self, file_id: Uuid) -> Result<Vec<FilePart>> {
        let inner = self.read()?;
        let mut parts: Vec<FilePart> = inner.file_parts(file_id).cloned().collect();
        parts.sort_by_key(|p| p.id);
        Ok(parts)
    }

    async fn list_files(&self, group_name: Option<&str>) -> Result<Vec<File>> {
        let inner = self.read()?;
        let mut files: Vec<File> = inner
            .files
            .values()
            .filter(|s| group_name.map_or(true, |g| s.file.group_name == g))
            .map(|s| s.file.clone())
            .collect();
        files.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn pending_parts(&self, limit: usize) -> Result<Vec<FilePart>> {
        let inner = self.read()?;
        Ok(inner
            .parts
            .values()
            .filter(|p| p.is_enabled && !p.is_embedded())
            .filter(|p| inner.files.get(&p.file_id).is_some_and(|s| s.file.is_enabled))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_embedding(
        &self,
        hash_type: HashAlgorithm,
        hash: &[u8],
        model: &str,
    ) -> Result<Option<Vec<u8>>> {
        let inner = self.read()?;
        Ok(inner
            .parts
            .values()
            .filter(|p| p.is_enabled && p.hash_type == hash_type && p.hash == hash)
            .filter(|p| p.embedding_model.as_deref() == Some(model))
            .find_map(|p| p.embedding.clone()))
    }

    async fn embedded_parts(&self, filter: &PartFilter) -> Result<Vec<EmbeddedPart>> {
        let inner = self.read()?;
        Ok(inner
            .parts
            .values()
            .filter(|p| p.is_enabled)
            .filter(|p| p.embedding_model.as_deref() == Some(filter.model.as_str()))
            .filter(|p| filter.group_mask.map_or(true, |m| p.group_flag.contains_any(m)))
            .filter(|p| inner.files.get(&p.file_id).is_some_and(|s| s.file.is_enabled))
            .filter_map(|p| {
                p.embedding.as_ref().map(|e| EmbeddedPart {
                    id: p.id,
                    embedding: e.clone(),
                })
            })
            .collect())
    }

    async fn purge_disabled(&self) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.parts.len() + inner.files.len();

        let dead_files: Vec<Uuid> = inner
            .files
            .values()
            .filter(|s| !s.file.is_enabled)
            .map(|s| s.file.id)
            .collect();
        inner
            .parts
            .retain(|_, p| p.is_enabled && !dead_files.contains(&p.file_id));
        for id in &dead_files {
            inner.files.remove(id);
            inner.parts_by_file.remove(id);
        }
        let Inner {
            parts,
            parts_by_file,
            ..
        } = &mut *inner;
        for ids in parts_by_file.values_mut() {
            ids.retain(|id| parts.contains_key(id));
        }

        let after = inner.parts.len() + inner.files.len();
        Ok((before - after) as u64)
    }
}
