//! Error taxonomy shared by every store backend.
//!
//! Each [`StoreError`] variant belongs to one [`ErrorKind`], which tells the
//! caller whether retrying, fixing input, or reporting a missing entity is
//! the right response. Cancellation is not an error: searches report it as
//! [`SearchOutcome::Cancelled`](crate::search::SearchOutcome::Cancelled).

use thiserror::Error;
use uuid::Uuid;

use crate::models::FileState;

/// Coarse classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any state changes.
    Validation,
    /// The request collides with existing state (duplicate, already done, full).
    Conflict,
    /// A referenced file, part, or group does not exist.
    NotFound,
    /// Stored data disagrees with the request (vector sizes, dimensions).
    Consistency,
    /// The storage backend failed.
    Backend,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("input text is empty")]
    EmptyInput,

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("embedding buffer of {0} bytes is not a whole number of f32 components")]
    MalformedVector(usize),

    #[error("file {0} is already chunked")]
    AlreadyChunked(Uuid),

    #[error("file {0} is disabled")]
    FileDisabled(Uuid),

    #[error("file part {0} is disabled")]
    PartDisabled(i64),

    #[error("group already exists: {0}")]
    GroupExists(String),

    #[error("group {name} is still used by {files} enabled file(s)")]
    GroupInUse { name: String, files: u64 },

    #[error("all {0} group flag positions are allocated")]
    GroupCapacityExceeded(u32),

    #[error("file {file_id} cannot move from {from} to {to}")]
    InvalidTransition {
        file_id: Uuid,
        from: FileState,
        to: FileState,
    },

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("file not found: {0}")]
    FileNotFound(Uuid),

    #[error("file part not found: {0}")]
    PartNotFound(i64),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector size mismatch on part {part_id}: expected {expected}, got {actual}")]
    VectorSizeMismatch {
        part_id: i64,
        expected: usize,
        actual: usize,
    },

    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UnsupportedAlgorithm(_)
            | StoreError::EmptyInput
            | StoreError::Invalid { .. }
            | StoreError::MalformedVector(_) => ErrorKind::Validation,
            StoreError::AlreadyChunked(_)
            | StoreError::FileDisabled(_)
            | StoreError::PartDisabled(_)
            | StoreError::GroupExists(_)
            | StoreError::GroupInUse { .. }
            | StoreError::GroupCapacityExceeded(_)
            | StoreError::InvalidTransition { .. } => ErrorKind::Conflict,
            StoreError::UnknownGroup(_)
            | StoreError::FileNotFound(_)
            | StoreError::PartNotFound(_) => ErrorKind::NotFound,
            StoreError::DimensionMismatch { .. } | StoreError::VectorSizeMismatch { .. } => {
                ErrorKind::Consistency
            }
            StoreError::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Wrap any backend failure (driver error, poisoned lock, …).
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StoreError::Backend(err.into())
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
