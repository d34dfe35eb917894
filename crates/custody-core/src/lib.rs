//! # Custody Core
//!
//! Core library for **Custody**, an auditable ingestion engine for
//! tabular public-procurement data.
//!
//! Every byte that enters the system is kept immutably and addressed by its
//! SHA-256; every row extracted from it remembers its physical position;
//! every column gets a discovered type, a content signature and a set of
//! aliases; and every operation on a file is journaled so an auditor can
//! walk from an answer back to the original bytes.
//!
//! This crate has no runtime, database or filesystem dependencies. Storage
//! is abstracted behind the [`store::Store`] and [`store::BlobStore`]
//! traits; the `custody` application crate provides SQLite and filesystem
//! implementations, and [`store::memory`] provides in-memory ones.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Raw files, records, lineage entries, schemas, aliases, mappings |
//! | [`content`] | Hash-deduplicated immutable storage and integrity checks |
//! | [`extract`] | Encoding/delimiter sniffing and row extraction |
//! | [`discovery`] | Column type and content-signature inference |
//! | [`alias`] | Alias generation and the persisted alias index |
//! | [`resolver`] | Free text → structured field mappings |
//! | [`ledger`] | Lineage state machine, verification and citations |
//! | [`pipeline`] | Store → extract → discover for one file |
//! | [`heuristics`] | Locale-specific constants and keyword tables |
//! | [`number`] | Brazilian/international number and date parsing |
//! | [`normalize`] | Name folding and tokenization |
//! | [`similarity`] | Sequence similarity for fuzzy matching |
//! | [`store`] | Storage traits and in-memory backends |
//! | [`error`] | [`CustodyError`] and [`Result`] |

pub mod alias;
pub mod content;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod heuristics;
pub mod ledger;
pub mod models;
pub mod normalize;
pub mod number;
pub mod pipeline;
pub mod resolver;
pub mod similarity;
pub mod store;

pub use alias::{AliasIndex, PublishedSchema};
pub use content::{ContentStore, StoreOutcome, Upload};
pub use discovery::SchemaDiscoverer;
pub use error::{CustodyError, Result};
pub use extract::RowExtractor;
pub use heuristics::Heuristics;
pub use ledger::{LineageLedger, PendingOperation, Verification};
pub use models::*;
pub use pipeline::{Custody, FileReport, Outcome};
pub use resolver::FieldResolver;
pub use store::{BlobStore, Store};
