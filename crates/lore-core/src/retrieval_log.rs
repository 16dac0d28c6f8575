//! Best-effort JSONL append log of search activity
//! (`<knowledge_dir>/_meta/retrieval-log.jsonl`).
//!
//! Ported from `pk_search.py::Searcher._log_search`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

/// One JSONL record appended per search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchLogRecord {
    pub timestamp: String,
    pub event: &'static str,
    pub query: String,
    pub source_type: Option<String>,
    pub result_count: usize,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

/// Append one search record to `<knowledge_dir>/_meta/retrieval-log.jsonl`.
/// Logging is best-effort: I/O failures are swallowed, matching the
/// original's "never let logging break a search" behavior.
pub fn log_search(
    knowledge_dir: &Path,
    query: &str,
    source_type: Option<&str>,
    result_count: usize,
    elapsed_ms: f64,
    caller: Option<&str>,
) {
    let record = SearchLogRecord {
        timestamp: Utc::now().to_rfc3339(),
        event: "search",
        query: query.to_string(),
        source_type: source_type.map(str::to_string),
        result_count,
        elapsed_ms,
        caller: caller.map(str::to_string),
    };

    let meta_dir = knowledge_dir.join("_meta");
    if std::fs::create_dir_all(&meta_dir).is_err() {
        return;
    }
    let Ok(line) = serde_json::to_string(&record) else {
        return;
    };
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(meta_dir.join("retrieval-log.jsonl"))
    {
        let _ = writeln!(file, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn log_search_appends_jsonl() {
        let dir = tempdir().unwrap();
        log_search(
            dir.path(),
            "caching strategy",
            Some("knowledge"),
            3,
            12.5,
            Some("lead"),
        );
        let contents =
            std::fs::read_to_string(dir.path().join("_meta/retrieval-log.jsonl")).unwrap();
        assert!(contents.contains("caching strategy"));
        assert!(contents.contains("\"caller\":\"lead\""));
    }
}
