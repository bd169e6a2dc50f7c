//! # embedstore core
//!
//! Storage-agnostic logic for embedstore: data models, content hashing,
//! the embedding vector codec, text chunking, group bit flags, the store
//! abstraction, and cosine-similarity search.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! The application crate supplies the SQLite backend, the embedding
//! provider, and the CLI.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──▶ hash ──▶ File ──▶ chunk ──▶ FilePart* ──▶ (provider) ──▶ vector
//!                                                                   │
//!                          search(query) ◀── rank top-K ◀── decode ◀┘
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod group;
pub mod hash;
pub mod models;
pub mod search;
pub mod store;

pub use error::{ErrorKind, Result, StoreError};
