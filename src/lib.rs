//! # Custody
//!
//! An auditable ingestion engine for tabular data.
//!
//! Source files are stored once per SHA-256, their rows are extracted into
//! parsed records, column schemas and aliases are discovered, and every
//! operation is journaled in a lineage ledger that can later prove which
//! bytes an answer came from. The services live in `custody-core`; this
//! crate provides the SQLite store, filesystem blob storage, configuration,
//! and the `custody` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │   ingest    │──▶│  custody-core (Custody)   │──▶│  SQLite  │
//! │ scan + pool │   │ store/parse/discover/log │   │ + blobs  │
//! └─────────────┘   └─────────────┬────────────┘   └──────────┘
//!                                 │
//!                                 ▼
//!                  ┌──────────────────────────────┐
//!                  │ CLI: schema, map, lineage,   │
//!                  │ verify, citations, stats     │
//!                  └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`blob`] | Filesystem blob storage |
//! | [`services`] | Builds a `Custody` handle from config |
//! | [`connector_fs`] | Input file discovery |
//! | [`ingest`] | Concurrent batch ingestion |
//! | [`get`], [`schema_cmd`], [`audit`], [`stats`] | CLI commands |

pub mod audit;
pub mod blob;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod schema_cmd;
pub mod services;
pub mod sqlite_store;
pub mod stats;
