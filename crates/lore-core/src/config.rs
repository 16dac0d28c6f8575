//! Corpus layout constants and default tuning knobs.
//!
//! These mirror the fixed constants in the original Python implementation
//! (`pk_search.py`, `pk_concordance.py`, `staleness-scan.py`) rather than
//! being user-configurable, since the on-disk layout they describe is the
//! system's primary compatibility surface (see `spec.md` §6).

/// Filename of the embedded FTS5 database inside the knowledge directory.
pub const DB_FILENAME: &str = ".pk_search.db";

/// Current schema version. Bumping this forces a full database rebuild on
/// next open, per the schema-version-guarded rebuild invariant.
pub const SCHEMA_VERSION: i64 = 1;

/// Fixed set of category directory names.
pub const CATEGORY_DIRS: &[&str] = &[
    "abstractions",
    "architecture",
    "conventions",
    "gotchas",
    "principles",
    "workflows",
    "domains",
];

/// Category priority order for the composite-search tiebreak, most to least
/// important. Earlier entries rank higher.
pub const CATEGORY_PRIORITY: &[&str] = &[
    "principles",
    "workflows",
    "conventions",
    "gotchas",
    "abstractions",
    "architecture",
    "domains",
];

/// Directory names pruned during enumeration regardless of where they occur.
pub const SKIP_DIRS: &[&str] = &["_archive", "_meta", "_meta_bak", "_inbox", "__pycache__", ".git"];

/// Directory names pruned when walking a `--repo-root` for source files, on
/// top of [`SKIP_DIRS`].
pub const REPO_SKIP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    ".next",
    "vendor",
    ".venv",
    "venv",
];

/// Source files larger than this are skipped during repo-root indexing.
pub const SOURCE_FILE_MAX_BYTES: u64 = 300_000;

/// Filenames skipped outright (manifests, indexes, per-item metadata).
pub const SKIP_FILES: &[&str] = &[
    "_inbox.md",
    "_index.md",
    "_meta.md",
    "_meta.json",
    "_index.json",
    "_self_test_results.md",
    "_manifest.json",
];

/// Maximum snippet length in characters before an ellipsis is appended.
pub const SNIPPET_MAX_CHARS: usize = 500;

/// Default result limit for lexical search.
pub const DEFAULT_LIMIT: usize = 10;

/// Default relevance threshold (0.0 = no filtering; FTS5 rank is negative,
/// so only negative thresholds drop weak matches).
pub const DEFAULT_THRESHOLD: f64 = 0.0;

/// BM25 rank multiplier applied to knowledge-type entries in `ORDER BY`.
/// FTS5 rank is negative, so a larger multiplier pushes knowledge matches
/// further to the front.
pub const KNOWLEDGE_BOOST: f64 = 2.0;

/// Default composite-score weights (`spec.md` §4.4).
pub const DEFAULT_BM25_WEIGHT: f64 = 0.5;
pub const DEFAULT_RECENCY_WEIGHT: f64 = 0.3;
pub const DEFAULT_TFIDF_WEIGHT: f64 = 0.2;

/// Upper bound on the category-priority tiebreak bonus added during
/// composite re-rank, so it only reorders near-ties.
pub const CATEGORY_TIEBREAK_MAX: f64 = 0.05;

/// Recency half-life-ish window: a learned/mtime date this many days old
/// scores 0 recency.
pub const RECENCY_WINDOW_DAYS: f64 = 365.0;

/// Default `suggest_related_files` similarity threshold.
pub const RELATED_FILES_THRESHOLD: f64 = 0.05;

/// Default `suggest_related_files` / `find_similar` result cap.
pub const RELATED_FILES_LIMIT: usize = 10;

/// Default `run_full_analysis` see-also count per knowledge entry.
pub const SEE_ALSO_LIMIT: usize = 3;

/// Default `find_merge_candidates` similarity threshold.
pub const MERGE_CANDIDATES_THRESHOLD: f64 = 0.5;

/// Default top-K terms examined by vocabulary drift.
pub const VOCAB_DRIFT_TOP_K: usize = 10;

/// Staleness engine base weights (`spec.md` §4.7).
pub const WEIGHT_FILE_DRIFT: f64 = 0.55;
pub const WEIGHT_BACKLINK_DRIFT: f64 = 0.25;
pub const WEIGHT_NEIGHBOR_DRIFT: f64 = 0.10;
pub const WEIGHT_VOCABULARY_DRIFT: f64 = 0.10;
pub const WEIGHT_CONFIDENCE: f64 = 0.0;

/// Staleness status thresholds.
pub const STALE_THRESHOLD: f64 = 0.6;
pub const AGING_THRESHOLD: f64 = 0.3;

/// Number of knowledge neighbors considered for `neighbor_drift`.
pub const NEIGHBOR_DRIFT_COUNT: usize = 5;

/// Timeout, in seconds, budgeted for the VCS-backed `file_drift` signal.
pub const FILE_DRIFT_TIMEOUT_SECS: u64 = 30;

#[must_use]
pub fn is_category(name: &str) -> bool {
    CATEGORY_DIRS.contains(&name)
}

#[must_use]
pub fn category_priority(category: &str) -> usize {
    CATEGORY_PRIORITY
        .iter()
        .position(|c| *c == category)
        .unwrap_or(CATEGORY_PRIORITY.len())
}
