//! TF-IDF concordance over the FTS5 index.
//!
//! Vectors are sparse `{term_index: tfidf_score}` maps built directly from
//! `fts5vocab` row/instance side tables, so term stemming always matches the
//! tokenizer used for lexical search. Ported from `pk_concordance.py`.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use serde::Serialize;

use crate::config::VOCAB_DRIFT_TOP_K;
use crate::error::Result;
use crate::models::{ConcordanceResult, ResultType};
use crate::schema;

/// A sparse term-weight vector, sorted ascending by term index.
pub type SparseVector = Vec<(u32, f32)>;

/// Serialize a sparse vector to packed little-endian `(u32, f32)` pairs.
#[must_use]
pub fn serialize_sparse_vector(vec: &HashMap<u32, f32>) -> Vec<u8> {
    let mut pairs: Vec<(u32, f32)> = vec.iter().map(|(&k, &v)| (k, v)).collect();
    pairs.sort_by_key(|&(idx, _)| idx);
    let mut out = Vec::with_capacity(pairs.len() * 8);
    for (idx, score) in pairs {
        out.extend_from_slice(&idx.to_le_bytes());
        out.extend_from_slice(&score.to_le_bytes());
    }
    out
}

/// Deserialize packed `(u32, f32)` pairs back into a sparse vector map.
#[must_use]
pub fn deserialize_sparse_vector(data: &[u8]) -> HashMap<u32, f32> {
    let mut vec = HashMap::new();
    for chunk in data.chunks_exact(8) {
        let idx = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
        let score = f32::from_le_bytes(chunk[4..8].try_into().unwrap());
        vec.insert(idx, score);
    }
    vec
}

/// Cosine similarity between two sparse vectors, in `[0, 1]`.
#[must_use]
pub fn sparse_cosine_similarity(a: &HashMap<u32, f32>, b: &HashMap<u32, f32>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(k, v)| b.get(k).map(|bv| f64::from(*v) * f64::from(*bv)))
        .sum();
    let norm_a: f64 = a.values().map(|v| f64::from(*v).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| f64::from(*v).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A stored entry vector plus its identity.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub file_path: String,
    pub heading: String,
    pub source_type: String,
    pub vector: HashMap<u32, f32>,
}

/// Outcome of [`Concordance::build_vectors`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildStats {
    pub vectors_built: usize,
    pub elapsed_seconds: f64,
}

/// Outcome of [`Concordance::run_full_analysis`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisStats {
    pub entries_analyzed: usize,
    pub see_also_pairs: usize,
    pub related_file_pairs: usize,
    pub elapsed_seconds: f64,
}

/// A candidate entry similar to a target, scored by cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarEntry {
    pub file_path: String,
    pub heading: String,
    pub source_type: String,
    pub similarity: f64,
}

/// Result of [`Concordance::compute_vocabulary_drift`].
#[derive(Debug, Clone, PartialEq)]
pub struct VocabularyDrift {
    pub score: f64,
    pub available: bool,
    pub top_k_terms: usize,
    pub absent_terms: usize,
    pub absent_term_names: Vec<String>,
}

/// A candidate knowledge-to-knowledge merge pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeCandidate {
    pub target_path: String,
    pub target_title: String,
    pub source_path: String,
    pub source_title: String,
    pub similarity: f64,
}

/// Computes and manages TF-IDF vectors from the FTS5 index.
pub struct Concordance {
    db_path: std::path::PathBuf,
}

impl Concordance {
    #[must_use]
    pub fn new(db_path: impl Into<std::path::PathBuf>) -> Self {
        Concordance {
            db_path: db_path.into(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        schema::connect(&self.db_path)
    }

    fn doc_count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT count(*) FROM entries", [], |r| r.get(0))?)
    }

    fn doc_frequencies(conn: &Connection) -> Result<HashMap<String, i64>> {
        let mut stmt = conn.prepare(
            "SELECT term, COUNT(DISTINCT doc) FROM entry_terms_instance WHERE col = 'content' GROUP BY term",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn term_index(doc_freqs: &HashMap<String, i64>) -> HashMap<String, u32> {
        let mut terms: Vec<&String> = doc_freqs.keys().collect();
        terms.sort();
        terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect()
    }

    fn instance_term_frequencies(conn: &Connection) -> Result<HashMap<i64, HashMap<String, u32>>> {
        let mut stmt =
            conn.prepare("SELECT term, doc FROM entry_terms_instance WHERE col = 'content'")?;
        let mut doc_tfs: HashMap<i64, HashMap<String, u32>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (term, doc) = row?;
            *doc_tfs.entry(doc).or_default().entry(term).or_insert(0) += 1;
        }
        Ok(doc_tfs)
    }

    fn entry_rowids(
        conn: &Connection,
        source_type_filter: Option<&str>,
    ) -> Result<HashMap<i64, (String, String, String)>> {
        let mut map = HashMap::new();
        if let Some(st) = source_type_filter {
            let mut stmt = conn.prepare(
                "SELECT rowid, file_path, heading, source_type FROM entries WHERE source_type = ?1",
            )?;
            let rows = stmt.query_map([st], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (rowid, fp, heading, st) = row?;
                map.insert(rowid, (fp, heading, st));
            }
        } else {
            let mut stmt = conn.prepare("SELECT rowid, file_path, heading, source_type FROM entries")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (rowid, fp, heading, st) = row?;
                map.insert(rowid, (fp, heading, st));
            }
        }
        Ok(map)
    }

    /// Compute TF-IDF vectors for every entry and persist them to
    /// `tfidf_vectors`. `TF-IDF = (1 + ln(tf)) * ln(N / df)`.
    pub fn build_vectors(&self, source_type_filter: Option<&str>) -> Result<BuildStats> {
        let start = std::time::Instant::now();
        let conn = self.connect()?;

        let total_docs = Self::doc_count(&conn)?;
        if total_docs == 0 {
            return Ok(BuildStats {
                vectors_built: 0,
                elapsed_seconds: 0.0,
            });
        }

        let doc_freqs = Self::doc_frequencies(&conn)?;
        let term_index = Self::term_index(&doc_freqs);
        let idf: HashMap<&String, f64> = doc_freqs
            .iter()
            .map(|(term, df)| {
                let v = if *df > 0 {
                    ((total_docs as f64) / (*df as f64)).ln()
                } else {
                    0.0
                };
                (term, v)
            })
            .collect();

        let doc_tfs = Self::instance_term_frequencies(&conn)?;
        let entry_map = Self::entry_rowids(&conn, source_type_filter)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let mut vectors_built = 0;
        for (rowid, (file_path, heading, source_type)) in &entry_map {
            let Some(tf_counts) = doc_tfs.get(rowid) else {
                continue;
            };
            let mut vec: HashMap<u32, f32> = HashMap::new();
            for (term, count) in tf_counts {
                if let (Some(&idx), Some(&term_idf)) = (term_index.get(term), idf.get(term)) {
                    let tf_weight = if *count > 0 {
                        1.0 + f64::from(*count).ln()
                    } else {
                        0.0
                    };
                    let tfidf = tf_weight * term_idf;
                    if tfidf > 0.0 {
                        vec.insert(idx, tfidf as f32);
                    }
                }
            }
            if vec.is_empty() {
                continue;
            }
            let blob = serialize_sparse_vector(&vec);
            conn.execute(
                "INSERT OR REPLACE INTO tfidf_vectors (file_path, heading, vector, source_type, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![file_path, heading, blob, source_type, now],
            )?;
            vectors_built += 1;
        }

        Ok(BuildStats {
            vectors_built,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        })
    }

    /// Retrieve a single entry's TF-IDF vector.
    pub fn get_vector(&self, file_path: &str, heading: &str) -> Result<Option<HashMap<u32, f32>>> {
        let conn = self.connect()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM tfidf_vectors WHERE file_path = ?1 AND heading = ?2",
                rusqlite::params![file_path, heading],
                |row| row.get(0),
            )
            .ok();
        Ok(blob.map(|b| deserialize_sparse_vector(&b)))
    }

    /// Retrieve every stored vector, optionally filtered by source type.
    pub fn get_all_vectors(&self, source_type: Option<&str>) -> Result<Vec<VectorEntry>> {
        let conn = self.connect()?;
        let mut out = Vec::new();
        if let Some(st) = source_type {
            let mut stmt = conn.prepare(
                "SELECT file_path, heading, vector, source_type FROM tfidf_vectors WHERE source_type = ?1",
            )?;
            let rows = stmt.query_map([st], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (file_path, heading, blob, source_type) = row?;
                out.push(VectorEntry {
                    file_path,
                    heading,
                    source_type,
                    vector: deserialize_sparse_vector(&blob),
                });
            }
        } else {
            let mut stmt =
                conn.prepare("SELECT file_path, heading, vector, source_type FROM tfidf_vectors")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (file_path, heading, blob, source_type) = row?;
                out.push(VectorEntry {
                    file_path,
                    heading,
                    source_type,
                    vector: deserialize_sparse_vector(&blob),
                });
            }
        }
        Ok(out)
    }

    /// Union of term indices across every `source`-typed vector: "terms that
    /// exist in the codebase".
    pub fn get_codebase_vocabulary(&self) -> Result<HashSet<u32>> {
        let vectors = self.get_all_vectors(Some("source"))?;
        Ok(vectors.iter().flat_map(|e| e.vector.keys().copied()).collect())
    }

    /// Fraction of a knowledge entry's top-K TF-IDF terms absent from the
    /// current codebase vocabulary.
    pub fn compute_vocabulary_drift(
        &self,
        file_path: &str,
        heading: &str,
        top_k: usize,
    ) -> Result<VocabularyDrift> {
        let Some(vec) = self.get_vector(file_path, heading)? else {
            return Ok(VocabularyDrift {
                score: 0.0,
                available: false,
                top_k_terms: 0,
                absent_terms: 0,
                absent_term_names: Vec::new(),
            });
        };
        let codebase_vocab = self.get_codebase_vocabulary()?;
        if codebase_vocab.is_empty() {
            return Ok(VocabularyDrift {
                score: 0.0,
                available: false,
                top_k_terms: 0,
                absent_terms: 0,
                absent_term_names: Vec::new(),
            });
        }

        let mut sorted_terms: Vec<(u32, f32)> = vec.into_iter().collect();
        sorted_terms.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        sorted_terms.truncate(top_k);

        let reverse_index = self.get_reverse_term_index()?;
        let absent: Vec<u32> = sorted_terms
            .iter()
            .map(|(idx, _)| *idx)
            .filter(|idx| !codebase_vocab.contains(idx))
            .collect();
        let absent_names = absent
            .iter()
            .map(|idx| {
                reverse_index
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("<unknown:{idx}>"))
            })
            .collect();

        let n_top = sorted_terms.len();
        let n_absent = absent.len();
        let score = if n_top > 0 {
            n_absent as f64 / n_top as f64
        } else {
            0.0
        };

        Ok(VocabularyDrift {
            score,
            available: true,
            top_k_terms: n_top,
            absent_terms: n_absent,
            absent_term_names: absent_names,
        })
    }

    /// Entries most similar to `(file_path, heading)` by TF-IDF cosine
    /// similarity, optionally filtered to one source type.
    pub fn find_similar(
        &self,
        file_path: &str,
        heading: &str,
        limit: usize,
        source_type_filter: Option<&str>,
    ) -> Result<Vec<SimilarEntry>> {
        let Some(target_vec) = self.get_vector(file_path, heading)? else {
            return Ok(Vec::new());
        };
        let candidates = self.get_all_vectors(source_type_filter)?;

        let mut scored: Vec<SimilarEntry> = candidates
            .into_iter()
            .filter(|c| !(c.file_path == file_path && c.heading == heading))
            .filter_map(|c| {
                let sim = sparse_cosine_similarity(&target_vec, &c.vector);
                (sim > 0.0).then_some(SimilarEntry {
                    file_path: c.file_path,
                    heading: c.heading,
                    source_type: c.source_type,
                    similarity: sim,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Source files related to a knowledge entry by TF-IDF similarity above
    /// `threshold`.
    pub fn suggest_related_files(
        &self,
        file_path: &str,
        heading: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarEntry>> {
        let candidates = self.find_similar(file_path, heading, limit, Some("source"))?;
        Ok(candidates
            .into_iter()
            .filter(|c| c.similarity >= threshold)
            .collect())
    }

    /// Stem and count tokens via an ephemeral in-memory FTS5 table using the
    /// same `porter unicode61` tokenizer as the corpus index, so query-time
    /// terms always line up with indexed terms.
    fn stem_and_count(text: &str) -> Result<HashMap<String, u32>> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("CREATE VIRTUAL TABLE _stem USING fts5(t, tokenize='porter unicode61');")?;
        conn.execute_batch(
            "CREATE VIRTUAL TABLE _stem_v USING fts5vocab('_stem', 'instance');",
        )?;
        conn.execute("INSERT INTO _stem(rowid, t) VALUES (1, ?1)", [text])?;
        let mut stmt = conn.prepare("SELECT term FROM _stem_v WHERE col = 't'")?;
        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            *counts.entry(row?).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Build a TF-IDF vector for a raw query string, using the corpus IDF
    /// and the same porter tokenizer as the index.
    pub fn build_query_vector(&self, query: &str) -> Result<HashMap<u32, f32>> {
        if query.trim().is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.connect()?;
        let total_docs = Self::doc_count(&conn)?;
        if total_docs == 0 {
            return Ok(HashMap::new());
        }
        let doc_freqs = Self::doc_frequencies(&conn)?;
        let term_index = Self::term_index(&doc_freqs);
        drop(conn);

        let tf_counts = Self::stem_and_count(query)?;
        let mut vec = HashMap::new();
        for (term, count) in tf_counts {
            if let (Some(&idx), Some(&df)) = (term_index.get(&term), doc_freqs.get(&term)) {
                let idf = if df > 0 {
                    ((total_docs as f64) / (df as f64)).ln()
                } else {
                    0.0
                };
                let tf_weight = 1.0 + f64::from(count).ln();
                let tfidf = tf_weight * idf;
                if tfidf > 0.0 {
                    vec.insert(idx, tfidf as f32);
                }
            }
        }
        Ok(vec)
    }

    /// Compute see-also and related-file recommendations for every knowledge
    /// entry and persist them to `concordance_results`.
    pub fn run_full_analysis(
        &self,
        see_also_limit: usize,
        related_files_threshold: f64,
        related_files_limit: usize,
    ) -> Result<AnalysisStats> {
        let start = std::time::Instant::now();
        let conn = self.connect()?;
        conn.execute("DELETE FROM concordance_results", [])?;

        let mut stmt = conn
            .prepare("SELECT DISTINCT file_path, heading FROM entries WHERE source_type = 'knowledge'")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut entries_analyzed = 0;
        let mut see_also_pairs = 0;
        let mut related_file_pairs = 0;

        for (file_path, heading) in &rows {
            let similar = self.find_similar(file_path, heading, see_also_limit, Some("knowledge"))?;
            for s in &similar {
                conn.execute(
                    "INSERT OR REPLACE INTO concordance_results \
                     (file_path, heading, similar_entry_path, similar_entry_heading, similarity_score, result_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 'see_also')",
                    rusqlite::params![file_path, heading, s.file_path, s.heading, s.similarity],
                )?;
                see_also_pairs += 1;
            }

            let related = self.suggest_related_files(
                file_path,
                heading,
                related_files_threshold,
                related_files_limit,
            )?;
            for r in &related {
                conn.execute(
                    "INSERT OR REPLACE INTO concordance_results \
                     (file_path, heading, similar_entry_path, similar_entry_heading, similarity_score, result_type) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 'related_file')",
                    rusqlite::params![file_path, heading, r.file_path, r.heading, r.similarity],
                )?;
                related_file_pairs += 1;
            }

            entries_analyzed += 1;
        }

        Ok(AnalysisStats {
            entries_analyzed,
            see_also_pairs,
            related_file_pairs,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        })
    }

    /// Knowledge-to-knowledge pairs from a prior [`run_full_analysis`] above
    /// `threshold`, deduplicated so symmetric pairs appear once.
    pub fn find_merge_candidates(&self, threshold: f64) -> Result<Vec<MergeCandidate>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT file_path, heading, similar_entry_path, similar_entry_heading, similarity_score \
             FROM concordance_results WHERE result_type = 'see_also' AND similarity_score >= ?1",
        )?;
        let rows: Vec<(String, String, String, String, f64)> = stmt
            .query_map([threshold], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (fp, heading, sim_fp, sim_heading, score) in rows {
            let (key, target, source) = if (&fp, &heading) <= (&sim_fp, &sim_heading) {
                (
                    (fp.clone(), heading.clone(), sim_fp.clone(), sim_heading.clone()),
                    (fp.clone(), heading.clone()),
                    (sim_fp.clone(), sim_heading.clone()),
                )
            } else {
                (
                    (sim_fp.clone(), sim_heading.clone(), fp.clone(), heading.clone()),
                    (sim_fp.clone(), sim_heading.clone()),
                    (fp.clone(), heading.clone()),
                )
            };
            if !seen.insert(key) {
                continue;
            }
            candidates.push(MergeCandidate {
                target_path: target.0,
                target_title: target.1,
                source_path: source.0,
                source_title: source.1,
                similarity: score,
            });
        }
        candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        Ok(candidates)
    }

    /// Current term -> integer index mapping, read fresh from `fts5vocab`.
    pub fn get_term_index(&self) -> Result<HashMap<String, u32>> {
        let conn = self.connect()?;
        let doc_freqs = Self::doc_frequencies(&conn)?;
        Ok(Self::term_index(&doc_freqs))
    }

    /// Inverse of [`Self::get_term_index`], for debuggable drift reports.
    pub fn get_reverse_term_index(&self) -> Result<HashMap<u32, String>> {
        Ok(self
            .get_term_index()?
            .into_iter()
            .map(|(term, idx)| (idx, term))
            .collect())
    }
}

/// Rows persisted by [`Concordance::run_full_analysis`], as entity structs.
#[must_use]
pub fn to_concordance_results(
    file_path: &str,
    heading: &str,
    entries: &[SimilarEntry],
    result_type: ResultType,
) -> Vec<ConcordanceResult> {
    entries
        .iter()
        .map(|e| ConcordanceResult {
            file_path: file_path.to_string(),
            heading: heading.to_string(),
            similar_path: e.file_path.clone(),
            similar_heading: e.heading.clone(),
            similarity: e.similarity,
            result_type,
        })
        .collect()
}

pub const DEFAULT_VOCAB_DRIFT_TOP_K: usize = VOCAB_DRIFT_TOP_K;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_vector_roundtrips() {
        let mut v = HashMap::new();
        v.insert(3u32, 1.5f32);
        v.insert(9u32, 0.25f32);
        let bytes = serialize_sparse_vector(&v);
        let back = deserialize_sparse_vector(&bytes);
        assert_eq!(back, v);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let mut v = HashMap::new();
        v.insert(1u32, 2.0f32);
        v.insert(2u32, 1.0f32);
        let sim = sparse_cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_similarity_of_disjoint_vectors_is_zero() {
        let mut a = HashMap::new();
        a.insert(1u32, 1.0f32);
        let mut b = HashMap::new();
        b.insert(2u32, 1.0f32);
        assert_eq!(sparse_cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn build_query_vector_on_empty_db_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(".pk_search.db");
        schema::rebuild(&db_path).unwrap();
        let concordance = Concordance::new(&db_path);
        let vec = concordance.build_query_vector("caching strategy").unwrap();
        assert!(vec.is_empty());
    }
}
