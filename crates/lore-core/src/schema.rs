//! SQLite schema and connection bootstrap for the FTS5 index.
//!
//! The `entries` virtual table and its `fts5vocab` side tables are the
//! foundation both the lexical [`crate::scorer`] and the TF-IDF
//! [`crate::concordance`] build on.

use std::path::Path;

use rusqlite::Connection;

use crate::config::SCHEMA_VERSION;
use crate::error::Result;

pub const CREATE_TABLES_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS entries USING fts5(
    file_path,
    heading,
    content,
    source_type,
    category UNINDEXED,
    confidence UNINDEXED,
    learned_date UNINDEXED,
    tokenize='porter unicode61'
);

CREATE TABLE IF NOT EXISTS file_meta (
    file_path TEXT PRIMARY KEY,
    mtime REAL,
    content_hash TEXT,
    source_type TEXT DEFAULT 'knowledge'
);

CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE IF NOT EXISTS tfidf_vectors (
    file_path TEXT,
    heading TEXT,
    vector BLOB,
    source_type TEXT,
    updated_at REAL,
    PRIMARY KEY (file_path, heading)
);

CREATE TABLE IF NOT EXISTS concordance_results (
    file_path TEXT,
    heading TEXT,
    similar_entry_path TEXT,
    similar_entry_heading TEXT,
    similarity_score REAL,
    result_type TEXT,
    PRIMARY KEY (file_path, heading, similar_entry_path, similar_entry_heading, result_type)
);

CREATE VIRTUAL TABLE IF NOT EXISTS entry_terms USING fts5vocab('entries', 'row');
CREATE VIRTUAL TABLE IF NOT EXISTS entry_terms_instance USING fts5vocab('entries', 'instance');
";

/// Open a connection to the knowledge directory's index database, enabling
/// WAL mode for concurrent readers.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Create the schema if it doesn't already exist and stamp the current
/// schema version.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    conn.execute(
        "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Check that the schema version matches and `entries` is queryable.
#[must_use]
pub fn is_valid(conn: &Connection) -> bool {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();
    let Some(version) = version else {
        return false;
    };
    if version.parse::<i64>() != Ok(SCHEMA_VERSION) {
        return false;
    }
    conn.query_row("SELECT count(*) FROM entries", [], |row| row.get::<_, i64>(0))
        .is_ok()
}

/// Delete the on-disk database file, if present, then open and initialize a
/// fresh one.
pub fn rebuild(db_path: &Path) -> Result<Connection> {
    if db_path.exists() {
        std::fs::remove_file(db_path)?;
    }
    let conn = connect(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Open the database, rebuilding it if missing, corrupt, or at the wrong
/// schema version.
pub fn open_or_rebuild(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return rebuild(db_path);
    }
    match connect(db_path) {
        Ok(conn) if is_valid(&conn) => Ok(conn),
        _ => rebuild(db_path),
    }
}
