//! # embedstore
//!
//! A local-first embedding store: files are hashed, deduplicated within a
//! group, split into token-bounded parts, embedded, and searched by cosine
//! similarity with group-flag filtering.
//!
//! The storage-independent pieces (hashing, vector codec, chunker, group
//! registry, the `Store` trait and the search engine) live in
//! [`embedstore_core`]. This crate adds the SQLite backend, configuration,
//! the HTTP embedding provider, and the `embstore` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  ingest    │──▶│ chunk + hash │──▶│   SQLite    │
//! │ file / dir │   │ embed (HTTP) │   │ SqliteStore │
//! └────────────┘   └──────────────┘   └──────┬──────┘
//!                                            │
//!                                            ▼
//!                                  ┌───────────────────┐
//!                                  │ similarity search │
//!                                  │  (group masks)    │
//!                                  └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! embstore init                          # create database
//! embstore group add Manuals             # register a group
//! embstore ingest ./docs --group Manuals # hash, dedup, chunk
//! embstore embed pending                 # generate embeddings
//! embstore search "reset the device" --group Manuals
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`ingest`] | File/directory ingestion pipeline |
//! | [`embed_cmd`] | Embedding backfill and manual attachment |
//! | [`search`] | Similarity search command |
//! | [`groups`] | Group administration |
//! | [`files`] | File and part inspection, disable, purge |
//! | [`export`] | JSON Lines export per group |
//! | [`stats`] | Database statistics |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod files;
pub mod groups;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod sqlite_store;
pub mod stats;
