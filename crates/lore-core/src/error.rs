//! Error types for the `lore` retrieval core.
//!
//! Per `spec.md` §7, the only condition allowed to propagate to the outer
//! boundary as a hard error is an impossible corpus configuration (a missing
//! knowledge directory, or a database that cannot be opened/rebuilt at all).
//! Everything else — parse failures, unresolved references, unavailable
//! staleness signals, log-append failures — has a defined structured
//! fallback and never raises.

use thiserror::Error;

/// Result type alias for `lore-core` operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("knowledge directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid reference syntax: {0}")]
    InvalidReference(String),
}
