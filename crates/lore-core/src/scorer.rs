//! FTS5 lexical search, composite (BM25 + recency + TF-IDF) re-ranking with
//! a category-priority tiebreak, and budget-aware two-tier result
//! partitioning. Ported from `pk_search.py::Searcher` and extended per the
//! TF-IDF-based composite redesign (superseding the original's
//! access-frequency third term).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::concordance::Concordance;
use crate::config::{
    CATEGORY_TIEBREAK_MAX, DEFAULT_BM25_WEIGHT, DEFAULT_LIMIT, DEFAULT_RECENCY_WEIGHT,
    DEFAULT_TFIDF_WEIGHT, DEFAULT_THRESHOLD, KNOWLEDGE_BOOST, RECENCY_WINDOW_DAYS,
    SNIPPET_MAX_CHARS,
};
use crate::error::Result;
use crate::indexer::Indexer;
use crate::models::Category;
use crate::retrieval_log;
use crate::schema;

static FTS5_OPERATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["*:]|\bAND\b|\bOR\b|\bNOT\b|\bNEAR\b"#).unwrap());

/// Filters applied to a lexical or composite search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub source_type: Option<String>,
    pub category: Vec<String>,
    pub exclude_category: Vec<String>,
    pub caller: Option<String>,
    pub include_archived: bool,
}

/// One lexical search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub heading: String,
    pub file_path: String,
    pub source_type: String,
    pub category: Option<String>,
    pub confidence: Option<String>,
    pub learned_date: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// A lexical result re-ranked with the composite signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeResult {
    #[serde(flatten)]
    pub base: SearchResult,
    pub composite_score: f64,
    pub content: String,
}

/// A result demoted to the titles-only tier by [`Searcher::budget_search`]:
/// identity and score only, no content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleOnlyResult {
    pub heading: String,
    pub file_path: String,
    pub composite_score: f64,
}

/// Output of [`Searcher::budget_search`].
#[derive(Debug, Clone, Serialize)]
pub struct BudgetPartition {
    pub full: Vec<CompositeResult>,
    pub titles_only: Vec<TitleOnlyResult>,
    pub budget_used: usize,
    pub budget_total: usize,
}

/// Weights for the composite re-rank; defaults match `spec.md` §4.4.
#[derive(Debug, Clone, Copy)]
pub struct CompositeWeights {
    pub bm25: f64,
    pub recency: f64,
    pub tfidf: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        CompositeWeights {
            bm25: DEFAULT_BM25_WEIGHT,
            recency: DEFAULT_RECENCY_WEIGHT,
            tfidf: DEFAULT_TFIDF_WEIGHT,
        }
    }
}

/// Prepare a user query for FTS5: quote bare-word tokens individually
/// (splitting on hyphens, since the porter+unicode61 tokenizer treats them
/// as separators) so column names in plain text can't be misread as column
/// filters. Queries already containing FTS operators pass through unchanged.
#[must_use]
pub fn prepare_query(query: &str) -> String {
    let query = query.trim();
    if query.is_empty() || FTS5_OPERATORS_RE.is_match(query) {
        return query.to_string();
    }
    let mut parts = Vec::new();
    for token in query.split_whitespace() {
        for sub in token.split('-') {
            if !sub.is_empty() {
                parts.push(format!("\"{}\"", sub.replace('"', "\"\"")));
            }
        }
    }
    parts.join(" ")
}

/// FTS5 lexical search plus composite re-ranking, over one knowledge
/// directory's index.
pub struct Searcher {
    knowledge_dir: PathBuf,
    db_path: PathBuf,
    indexer: Indexer,
}

impl Searcher {
    #[must_use]
    pub fn new(knowledge_dir: impl Into<PathBuf>) -> Self {
        let knowledge_dir = knowledge_dir.into();
        let indexer = Indexer::new(&knowledge_dir);
        let db_path = indexer.db_path().to_path_buf();
        Searcher {
            knowledge_dir,
            db_path,
            indexer,
        }
    }

    /// Index from scratch if the database is missing, or incrementally
    /// reindex any stale files.
    fn ensure_index(&self) -> Result<()> {
        if !self.db_path.exists() {
            self.indexer.index_all(false)?;
            return Ok(());
        }
        if !self.indexer.get_stale_files()?.is_empty() {
            self.indexer.incremental_index()?;
        }
        Ok(())
    }

    fn relative_path(&self, abs_path: &str) -> String {
        Path::new(abs_path)
            .strip_prefix(&self.knowledge_dir)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| abs_path.to_string())
    }

    fn snippet(content: &str) -> String {
        if content.len() <= SNIPPET_MAX_CHARS {
            return content.to_string();
        }
        let mut end = SNIPPET_MAX_CHARS;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &content[..end])
    }

    /// Lexical BM25 search, auto-indexing first.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let search_start = Instant::now();
        self.ensure_index()?;

        let prepared = prepare_query(query);
        let conn = schema::connect(&self.db_path)?;

        let mut where_extra = String::new();
        let mut params: Vec<rusqlite::types::Value> = vec![prepared.clone().into()];
        if let Some(st) = &filter.source_type {
            where_extra.push_str(" AND source_type = ?");
            params.push(st.clone().into());
        }
        if !filter.category.is_empty() {
            let placeholders = vec!["?"; filter.category.len()].join(", ");
            where_extra.push_str(&format!(" AND category IN ({placeholders})"));
            for c in &filter.category {
                params.push(c.clone().into());
            }
        }
        if !filter.exclude_category.is_empty() {
            let placeholders = vec!["?"; filter.exclude_category.len()].join(", ");
            where_extra.push_str(&format!(" AND category NOT IN ({placeholders})"));
            for c in &filter.exclude_category {
                params.push(c.clone().into());
            }
        }
        if !filter.include_archived {
            where_extra.push_str(" AND file_path NOT LIKE '%\\_archive/%' ESCAPE '\\'");
        }
        let fetch_limit = (limit * 3).max(limit) as i64;
        params.push(fetch_limit.into());

        let sql = format!(
            "SELECT file_path, heading, content, source_type, category, confidence, learned_date, rank \
             FROM entries WHERE entries MATCH ?{where_extra} \
             ORDER BY rank * CASE WHEN source_type = 'knowledge' THEN {KNOWLEDGE_BOOST} ELSE 1.0 END \
             LIMIT ?"
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, f64>(7)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (file_path, heading, content, source_type, category, confidence, learned_date, score) =
                row?;
            if threshold < 0.0 && score > threshold {
                continue;
            }
            results.push(SearchResult {
                heading,
                file_path: self.relative_path(&file_path),
                source_type,
                category,
                confidence,
                learned_date,
                score,
                snippet: Self::snippet(&content),
            });
            if results.len() >= limit {
                break;
            }
        }

        let elapsed_ms = search_start.elapsed().as_secs_f64() * 1000.0;
        retrieval_log::log_search(
            &self.knowledge_dir,
            query,
            filter.source_type.as_deref(),
            results.len(),
            elapsed_ms,
            filter.caller.as_deref(),
        );

        Ok(results)
    }

    fn recency_score(learned_date: Option<&str>, abs_path: &Path) -> f64 {
        let now = chrono::Utc::now().date_naive();
        if let Some(learned) = learned_date {
            if let Ok(d) = NaiveDate::parse_from_str(learned, "%Y-%m-%d") {
                let days_ago = (now - d).num_days() as f64;
                return (1.0 - days_ago / RECENCY_WINDOW_DAYS).max(0.0);
            }
        }
        if let Ok(meta) = std::fs::metadata(abs_path) {
            if let Ok(modified) = meta.modified() {
                if let Ok(elapsed) = modified.elapsed() {
                    let days_ago = elapsed.as_secs_f64() / 86400.0;
                    return (1.0 - days_ago / RECENCY_WINDOW_DAYS).max(0.0);
                }
            }
        }
        0.0
    }

    fn category_tiebreak(category: Option<&str>) -> f64 {
        let Some(category) = category else {
            return 0.0;
        };
        let Ok(cat) = category.parse::<Category>() else {
            return 0.0;
        };
        let priority = cat.priority();
        let max_priority = (Category::all().len() - 1) as f64;
        if max_priority <= 0.0 {
            return CATEGORY_TIEBREAK_MAX;
        }
        CATEGORY_TIEBREAK_MAX * (1.0 - (priority as f64 / max_priority))
    }

    /// Composite re-rank: BM25 + recency + TF-IDF cosine, plus a bounded
    /// category-priority tiebreak. Fetches `3 * limit` lexical results first.
    pub fn composite_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
        filter: &SearchFilter,
        weights: CompositeWeights,
    ) -> Result<Vec<CompositeResult>> {
        let raw = self.search(query, limit * 3, threshold, filter)?;
        let concordance = Concordance::new(&self.db_path);
        let query_vec = concordance.build_query_vector(query)?;

        let mut scored = Vec::with_capacity(raw.len());
        for r in raw {
            let abs_path = self.knowledge_dir.join(&r.file_path);
            let Ok(content) = std::fs::read_to_string(&abs_path) else {
                continue;
            };
            let content = content.trim_end_matches('\n').to_string();

            let bm25_norm = (r.score.abs() / 10.0).min(1.0);
            let recency = Self::recency_score(r.learned_date.as_deref(), &abs_path);

            let entry_vec = concordance
                .get_vector(&abs_path.to_string_lossy(), &r.heading)?
                .unwrap_or_default();
            let tfidf = crate::concordance::sparse_cosine_similarity(&query_vec, &entry_vec);

            let base_score =
                weights.bm25 * bm25_norm + weights.recency * recency + weights.tfidf * tfidf;
            let composite = (base_score + Self::category_tiebreak(r.category.as_deref())).clamp(0.0, 1.0);

            scored.push(CompositeResult {
                base: r,
                composite_score: composite,
                content,
            });
        }

        scored.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Run `composite_search` then greedily assign results, in
    /// composite-descending order, to a `full` tier (content included,
    /// while it fits the remaining character budget) or a `titles_only`
    /// tier (identity and score only).
    pub fn budget_search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
        filter: &SearchFilter,
        weights: CompositeWeights,
        budget_chars: usize,
    ) -> Result<BudgetPartition> {
        let composite = self.composite_search(query, limit, threshold, filter, weights)?;

        let mut remaining = budget_chars;
        let mut full = Vec::new();
        let mut titles_only = Vec::new();
        for result in composite {
            if result.content.len() <= remaining {
                remaining -= result.content.len();
                full.push(result);
            } else {
                titles_only.push(TitleOnlyResult {
                    heading: result.base.heading,
                    file_path: result.base.file_path,
                    composite_score: result.composite_score,
                });
            }
        }

        Ok(BudgetPartition {
            budget_used: budget_chars - remaining,
            budget_total: budget_chars,
            full,
            titles_only,
        })
    }

    #[must_use]
    pub fn knowledge_dir(&self) -> &Path {
        &self.knowledge_dir
    }
}

#[must_use]
pub fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[must_use]
pub fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_query_quotes_plain_words() {
        assert_eq!(prepare_query("hello world"), "\"hello\" \"world\"");
    }

    #[test]
    fn prepare_query_splits_hyphens() {
        assert_eq!(prepare_query("file-mutation"), "\"file\" \"mutation\"");
    }

    #[test]
    fn prepare_query_passes_through_operators() {
        assert_eq!(prepare_query("content:foo OR bar"), "content:foo OR bar");
    }

    #[test]
    fn category_tiebreak_favors_principles_over_domains() {
        let principles = Searcher::category_tiebreak(Some("principles"));
        let domains = Searcher::category_tiebreak(Some("domains"));
        assert!(principles > domains);
        assert!(principles <= CATEGORY_TIEBREAK_MAX + 1e-9);
    }

    #[test]
    fn budget_partition_greedy_walk_matches_scenario() {
        let composite = vec![
            CompositeResult {
                base: SearchResult {
                    heading: "a".into(),
                    file_path: "a.md".into(),
                    source_type: "knowledge".into(),
                    category: None,
                    confidence: None,
                    learned_date: None,
                    score: -5.0,
                    snippet: String::new(),
                },
                composite_score: 0.9,
                content: "x".repeat(60),
            },
            CompositeResult {
                base: SearchResult {
                    heading: "b".into(),
                    file_path: "b.md".into(),
                    source_type: "knowledge".into(),
                    category: None,
                    confidence: None,
                    learned_date: None,
                    score: -3.0,
                    snippet: String::new(),
                },
                composite_score: 0.7,
                content: "x".repeat(40),
            },
            CompositeResult {
                base: SearchResult {
                    heading: "c".into(),
                    file_path: "c.md".into(),
                    source_type: "knowledge".into(),
                    category: None,
                    confidence: None,
                    learned_date: None,
                    score: -1.0,
                    snippet: String::new(),
                },
                composite_score: 0.5,
                content: "x".repeat(120),
            },
        ];

        let budget_chars = 120usize;
        let mut remaining = budget_chars;
        let mut full = Vec::new();
        let mut titles_only = Vec::new();
        for result in composite {
            if result.content.len() <= remaining {
                remaining -= result.content.len();
                full.push(result);
            } else {
                titles_only.push(result);
            }
        }
        assert_eq!(full.len(), 2);
        assert_eq!(titles_only.len(), 1);
        assert_eq!(budget_chars - remaining, 100);
    }
}
