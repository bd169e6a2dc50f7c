//! Core data models: files, file parts, and groups.
//!
//! These are plain records. Every invariant the store relies on is checked
//! by an explicit `validate` function rather than by a persistence layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, COMPONENT_SIZE};
use crate::error::{Result, StoreError};
use crate::group::GroupMask;
use crate::hash::{hash_text, HashAlgorithm};

pub const MAX_NAME_LEN: usize = 512;
pub const MAX_GROUP_NAME_LEN: usize = 128;
pub const MAX_URL_LEN: usize = 4096;
pub const MAX_MODEL_LEN: usize = 100;

/// Processing state of a [`File`].
///
/// ```text
/// New ──▶ Chunking ──▶ Embedding ──▶ Embedded
///  ▲         │
///  └─────────┘ (split failed)      any ──▶ Failed ──▶ Chunking
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    New,
    Chunking,
    Embedding,
    Embedded,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::New => "New",
            FileState::Chunking => "Chunking",
            FileState::Embedding => "Embedding",
            FileState::Embedded => "Embedded",
            FileState::Failed => "Failed",
        }
    }

    /// Whether `chunk_file` may claim a file in this state.
    pub fn is_chunkable(&self) -> bool {
        matches!(self, FileState::New | FileState::Failed)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "New" => Ok(FileState::New),
            "Chunking" => Ok(FileState::Chunking),
            "Embedding" => Ok(FileState::Embedding),
            "Embedded" => Ok(FileState::Embedded),
            "Failed" => Ok(FileState::Failed),
            other => Err(StoreError::invalid("state", format!("unknown file state '{}'", other))),
        }
    }
}

/// An ingested file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Size of the raw file in bytes.
    pub size: u64,
    pub hash_type: HashAlgorithm,
    pub hash: Vec<u8>,
    pub group_name: String,
    pub group_flag: GroupMask,
    pub state: FileState,
    /// Size of the extracted text in bytes.
    pub text_size: u64,
    pub is_enabled: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl File {
    pub fn validate(&self) -> Result<()> {
        check_required("name", &self.name, MAX_NAME_LEN)?;
        check_required("group_name", &self.group_name, MAX_GROUP_NAME_LEN)?;
        check_bounded("url", &self.url, MAX_URL_LEN)?;
        if self.hash.len() != self.hash_type.digest_size() {
            return Err(StoreError::invalid(
                "hash",
                format!(
                    "{} digest must be {} bytes, got {}",
                    self.hash_type,
                    self.hash_type.digest_size(),
                    self.hash.len()
                ),
            ));
        }
        Ok(())
    }
}

/// One chunk of a file's text and, once attached, its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePart {
    pub id: i64,
    pub file_id: Uuid,
    pub group_name: String,
    pub group_flag: GroupMask,
    /// 0-based position within the file.
    pub index: u32,
    /// Total number of parts of the file.
    pub count: u32,
    pub hash_type: HashAlgorithm,
    pub hash: Vec<u8>,
    pub text: String,
    pub text_tokens: u64,
    pub embedding_model: Option<String>,
    /// Number of `f32` components; 0 until the first embedding is attached.
    pub embedding_size: u32,
    pub embedding: Option<Vec<u8>>,
    pub is_enabled: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl FilePart {
    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Decoded embedding vector, if one is attached.
    pub fn vector(&self) -> Result<Option<Vec<f32>>> {
        self.embedding.as_deref().map(blob_to_vec).transpose()
    }

    pub fn validate(&self) -> Result<()> {
        check_required("group_name", &self.group_name, MAX_GROUP_NAME_LEN)?;
        if self.count == 0 || self.index >= self.count {
            return Err(StoreError::invalid(
                "index",
                format!("index {} outside 0..{}", self.index, self.count),
            ));
        }
        if self.hash != hash_text(&self.text, self.hash_type) {
            return Err(StoreError::invalid(
                "hash",
                format!("digest does not match {} of the part text", self.hash_type),
            ));
        }
        if let Some(model) = &self.embedding_model {
            check_required("embedding_model", model, MAX_MODEL_LEN)?;
        }
        if let Some(embedding) = &self.embedding {
            let expected = self.embedding_size as usize * COMPONENT_SIZE;
            if embedding.len() != expected {
                return Err(StoreError::invalid(
                    "embedding",
                    format!(
                        "{} bytes stored for embedding_size {} (expected {})",
                        embedding.len(),
                        self.embedding_size,
                        expected
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Check that a file's parts form one consistent set: equal `count`,
/// indices `0..count` each exactly once.
pub fn validate_part_set(parts: &[FilePart]) -> Result<()> {
    let Some(first) = parts.first() else {
        return Ok(());
    };
    let count = first.count;
    if parts.len() != count as usize {
        return Err(StoreError::invalid(
            "count",
            format!("{} parts present for count {}", parts.len(), count),
        ));
    }
    let mut seen = vec![false; count as usize];
    for part in parts {
        if part.count != count || part.file_id != first.file_id {
            return Err(StoreError::invalid(
                "count",
                format!("part {} disagrees with the set (count {})", part.id, part.count),
            ));
        }
        match seen.get_mut(part.index as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => {
                return Err(StoreError::invalid(
                    "index",
                    format!("duplicate or out-of-range index {}", part.index),
                ))
            }
        }
    }
    Ok(())
}

/// A named group owning one flag bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub flag: GroupMask,
    pub flag_name: String,
    pub created: DateTime<Utc>,
}

pub(crate) fn check_required(field: &'static str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::invalid(field, "must not be empty"));
    }
    check_bounded(field, value, max_len)
}

pub(crate) fn check_bounded(field: &'static str, value: &str, max_len: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max_len {
        return Err(StoreError::invalid(
            field,
            format!("{} characters exceeds the limit of {}", len, max_len),
        ));
    }
    Ok(())
}
