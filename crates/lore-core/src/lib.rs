//! Retrieval core for `lore`, a local personal knowledge retrieval engine.
//!
//! This crate indexes a hierarchical corpus of markdown notes, work plans,
//! and conversational thread entries into a single SQLite FTS5 database and
//! answers ranked queries that combine lexical (BM25) scoring, TF-IDF
//! concordance, recency, and category priority. It additionally produces
//! resolved cross-references, see-also recommendations, related-source-file
//! suggestions, link-integrity reports, and staleness scores.
//!
//! Every invocation is short-lived: there is no daemon, no async runtime, and
//! no in-process connection pool. See [`config`] for the fixed corpus layout
//! this crate expects on disk.

#![forbid(unsafe_code)]

pub mod concordance;
pub mod config;
pub mod error;
pub mod indexer;
pub mod layout;
pub mod link_checker;
pub mod markdown;
pub mod models;
pub mod resolver;
pub mod retrieval_log;
pub mod schema;
pub mod scorer;
pub mod sectioning;
pub mod staleness;

pub use error::{Error, Result};
