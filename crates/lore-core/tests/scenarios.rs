//! End-to-end scenarios (S1-S6) and universal properties from `spec.md` §8,
//! exercised against real `tempfile`-backed knowledge directories rather than
//! mocked internals.

use std::fs;
use std::path::Path;

use lore_core::concordance::{
    deserialize_sparse_vector, serialize_sparse_vector, sparse_cosine_similarity, Concordance,
};
use lore_core::indexer::Indexer;
use lore_core::link_checker::LinkChecker;
use lore_core::models::Confidence;
use lore_core::resolver::{filename_to_heading, Resolver};
use lore_core::scorer::{CompositeWeights, SearchFilter, Searcher};
use lore_core::staleness::{self, BacklinkDrift, FileDrift, NeighborDrift};

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

// ---------------------------------------------------------------------
// Universal properties
// ---------------------------------------------------------------------

/// Property 1: parser round-trip. Entries are stable under repeated parsing, and frontmatter/HTML-comment metadata is stripped from indexed content but preserved separately.
#[test]
fn property_parser_round_trip_strips_metadata_keeps_it_extractable() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(
        &kd,
        "principles/one.md",
        "# One Principle\n\n<!-- learned: 2026-01-01 | confidence: high -->\n\nBody text here.\n",
    );

    let first = lore_core::markdown::parse_entry_file(&kd.join("principles/one.md"));
    let second = lore_core::markdown::parse_entry_file(&kd.join("principles/one.md"));
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert!(first[0].content.contains("Body text here."));
    assert!(!first[0].content.contains("learned:"));
    assert!(!first[0].content.contains("<!--"));

    let meta = lore_core::markdown::extract_metadata(
        &fs::read_to_string(kd.join("principles/one.md")).unwrap(),
    );
    assert_eq!(meta.learned.as_deref(), Some("2026-01-01"));
    assert_eq!(meta.confidence.as_deref(), Some("high"));
}

/// Property 2: thread filename -> heading mapping, all four documented shapes.
#[test]
fn property_thread_filename_to_heading_mapping() {
    assert_eq!(filename_to_heading("2026-02-06.md"), "2026-02-06");
    assert_eq!(
        filename_to_heading("2026-02-06-s6.md"),
        "2026-02-06 (Session 6)"
    );
    assert_eq!(
        filename_to_heading("2026-02-07-s14-continued.md"),
        "2026-02-07 (Session 14, continued)"
    );
    assert_eq!(
        filename_to_heading("2026-02-07-s14-2.md"),
        "2026-02-07 (Session 14)"
    );
}

/// Property 3: idempotent full index. Force-reindexing yields the same entry count and the same set of (path, heading) keys.
#[test]
fn property_idempotent_full_index() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "principles/one.md", "# One\n\nBody one.\n");
    write(&kd, "domains/two.md", "# Two\n\nBody two.\n");

    let indexer = Indexer::new(&kd);
    let stats_first = indexer.index_all(false).unwrap();
    let keys_first = entry_keys(&indexer);

    let stats_second = indexer.index_all(true).unwrap();
    let keys_second = entry_keys(&indexer);

    assert_eq!(stats_first.total_entries, stats_second.total_entries);
    assert_eq!(keys_first, keys_second);
}

fn entry_keys(indexer: &Indexer) -> Vec<(String, String)> {
    let conn = rusqlite::Connection::open(indexer.db_path()).unwrap();
    let mut stmt = conn
        .prepare("SELECT file_path, heading FROM entries ORDER BY file_path, heading")
        .unwrap();
    let mut rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .unwrap()
        .filter_map(Result::ok)
        .collect::<Vec<_>>();
    rows.sort();
    rows
}

/// Property 4: incremental correctness. An mtime-only touch must not reindex; a content change must.
#[test]
fn property_incremental_correctness() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "principles/one.md", "# One\n\nOriginal body.\n");

    let indexer = Indexer::new(&kd);
    indexer.index_all(false).unwrap();

    // Touch mtime without changing content.
    let path = kd.join("principles/one.md");
    let content = fs::read_to_string(&path).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));
    fs::write(&path, &content).unwrap();

    let stats = indexer.incremental_index().unwrap();
    assert_eq!(stats.files_reindexed, 0, "mtime-only touch must not reindex");

    // Now change content.
    fs::write(&path, "# One\n\nChanged body.\n").unwrap();
    let stats = indexer.incremental_index().unwrap();
    assert_eq!(stats.files_reindexed, 1, "content change must reindex");
}

/// Property 5: FTS vocab stemming. `architecture` -> `architectur`, `testing` -> `test`; the raw query form still matches.
#[test]
fn property_fts_vocab_stemming() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(
        &kd,
        "principles/one.md",
        "# One\n\nNotes on architecture and testing practices.\n",
    );
    let indexer = Indexer::new(&kd);
    indexer.index_all(false).unwrap();

    let conn = rusqlite::Connection::open(indexer.db_path()).unwrap();
    let mut stmt = conn.prepare("SELECT term FROM entry_terms").unwrap();
    let terms: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert!(terms.contains(&"architectur".to_string()));
    assert!(terms.contains(&"test".to_string()));

    let searcher = Searcher::new(&kd);
    let results = searcher
        .search("architecture", 10, 0.0, &SearchFilter::default())
        .unwrap();
    assert!(results.iter().any(|r| r.heading == "One"));
}

/// Property 6: sparse vector serialization round-trips 1, arbitrary, and 0 entries; the empty-input blob is zero-length.
#[test]
fn property_sparse_vector_serialization_round_trip() {
    use std::collections::HashMap;

    let empty: HashMap<u32, f32> = HashMap::new();
    let blob = serialize_sparse_vector(&empty);
    assert!(blob.is_empty());
    assert_eq!(deserialize_sparse_vector(&blob), empty);

    let single: HashMap<u32, f32> = [(7, 0.5)].into_iter().collect();
    let blob = serialize_sparse_vector(&single);
    let back = deserialize_sparse_vector(&blob);
    assert_eq!(back.len(), 1);
    assert!((back[&7] - 0.5).abs() < 1e-6);

    let many: HashMap<u32, f32> = [(1, 0.1), (20, 0.25), (300, 0.9), (4000, 1.0)]
        .into_iter()
        .collect();
    let blob = serialize_sparse_vector(&many);
    let back = deserialize_sparse_vector(&blob);
    assert_eq!(back.len(), many.len());
    for (k, v) in &many {
        assert!((back[k] - v).abs() < 1e-6);
    }
}

/// Property 7: cosine similarity. Self-similarity is 1, disjoint vectors are 0, similarity of nonnegative vectors is bounded to [0, 1].
#[test]
fn property_cosine_similarity_bounds() {
    use std::collections::HashMap;

    let v: HashMap<u32, f32> = [(1, 1.0), (2, 2.0), (3, 3.0)].into_iter().collect();
    assert!((sparse_cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);

    let w: HashMap<u32, f32> = [(10, 1.0), (11, 2.0)].into_iter().collect();
    assert_eq!(sparse_cosine_similarity(&v, &w), 0.0);

    let overlapping: HashMap<u32, f32> = [(1, 5.0), (4, 1.0)].into_iter().collect();
    let sim = sparse_cosine_similarity(&v, &overlapping);
    assert!((0.0..=1.0).contains(&sim));
}

/// Property 8: archive fallback. Active resolves first, archive only when active is absent (and carries `archived=true`), neither resolves to unresolved.
#[test]
fn property_archive_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "_work/auth-refactor/plan.md", "# Auth Refactor\n\nPlan.\n");
    write(
        &kd,
        "_work/_archive/old-migration/plan.md",
        "# Old Migration\n\nArchived plan.\n",
    );

    let resolver = Resolver::new(&kd);

    let active = resolver.resolve("[[work:auth-refactor]]");
    assert!(active.resolved);
    assert!(!active.archived);

    let archived = resolver.resolve("[[work:old-migration]]");
    assert!(archived.resolved);
    assert!(archived.archived);

    let missing = resolver.resolve("[[work:does-not-exist]]");
    assert!(!missing.resolved);
}

/// Property 9: link checker. Fenced code is not scanned, valid references are neither broken nor archived, archived references are counted separately, and truly missing references are broken.
#[test]
fn property_link_checker_classifies_references() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "_work/active-item/plan.md", "# Active Item\n\nPlan body.\n");
    write(
        &kd,
        "_work/_archive/old-item/plan.md",
        "# Old Item\n\nArchived body.\n",
    );
    write(
        &kd,
        "principles/refs.md",
        "# Refs\n\nSee [[work:active-item]] and [[work:old-item]] and [[work:ghost]].\n\n\
         ```\n[[work:inside-a-fence]]\n```\n",
    );

    let checker = LinkChecker::new(&kd);
    let report = checker.check_all(true, true);

    assert_eq!(report.broken_links.len(), 1);
    assert_eq!(report.broken_links[0].backlink, "[[work:ghost]]");
    assert_eq!(report.archived_links.len(), 1);
    assert_eq!(report.archived_links[0].backlink, "[[work:old-item]]");
    // Total excludes the fenced reference; 3 real references scanned.
    assert_eq!(report.total_links, 3);
}

/// Property 10: composite budget invariant. `sum(len(content) for full) <= budget_chars`, `budget_used` equals that sum, and a zero budget yields an empty `full` tier.
#[test]
fn property_composite_budget_invariant() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "domains/a.md", "# Topic A\n\nshared query term, short body.\n");
    write(
        &kd,
        "domains/b.md",
        "# Topic B\n\nshared query term, a noticeably longer body of text to push past budget.\n",
    );
    let searcher = Searcher::new(&kd);

    let partition = searcher
        .budget_search(
            "shared query term",
            10,
            0.0,
            &SearchFilter::default(),
            CompositeWeights::default(),
            0,
        )
        .unwrap();
    assert!(partition.full.is_empty());
    assert_eq!(partition.budget_used, 0);

    let partition = searcher
        .budget_search(
            "shared query term",
            10,
            0.0,
            &SearchFilter::default(),
            CompositeWeights::default(),
            40,
        )
        .unwrap();
    let used: usize = partition.full.iter().map(|r| r.content.len()).sum();
    assert_eq!(used, partition.budget_used);
    assert!(used <= 40);
}

/// Property 11: category tiebreak. With identical bm25/recency/tfidf, the entry whose category has higher priority ranks first.
#[test]
fn property_category_tiebreak_orders_by_priority() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    // "principles" outranks "domains" in CATEGORY_PRIORITY.
    write(&kd, "domains/topic.md", "# Domain Topic\n\nidentical shared wording here.\n");
    write(
        &kd,
        "principles/topic.md",
        "# Principle Topic\n\nidentical shared wording here.\n",
    );
    let searcher = Searcher::new(&kd);

    let results = searcher
        .composite_search(
            "identical shared wording",
            10,
            0.0,
            &SearchFilter::default(),
            CompositeWeights::default(),
        )
        .unwrap();
    assert!(results.len() >= 2);
    let principle_rank = results
        .iter()
        .position(|r| r.base.heading == "Principle Topic")
        .unwrap();
    let domain_rank = results
        .iter()
        .position(|r| r.base.heading == "Domain Topic")
        .unwrap();
    assert!(
        principle_rank < domain_rank,
        "principles must outrank domains on an otherwise-tied composite score"
    );
}

/// Property 12: staleness weight renormalization. When only `file_drift` and `confidence` are available, their effective weights sum to 1 and the score equals their weighted combination.
#[test]
fn property_staleness_weight_renormalization() {
    let file_drift = FileDrift {
        commit_count: 0,
        score: 0.8,
        available: true,
    };
    let backlink_drift = BacklinkDrift {
        total: 0,
        broken: 0,
        broken_links: Vec::new(),
        score: 0.0,
        available: false,
    };
    let neighbor_drift = NeighborDrift {
        score: 0.0,
        available: false,
        neighbors_checked: 0,
        neighbors_updated: 0,
    };
    let vocabulary_drift = lore_core::concordance::VocabularyDrift {
        score: 0.0,
        available: false,
        top_k_terms: 0,
        absent_terms: 0,
        absent_term_names: Vec::new(),
    };

    let report = staleness::score_entry(
        &file_drift,
        &backlink_drift,
        Some(Confidence::Low),
        &neighbor_drift,
        &vocabulary_drift,
    );

    let w_fd = report.signals.file_drift.weight;
    let w_conf = report.signals.confidence.weight;
    assert!((w_fd + w_conf - 1.0).abs() < 1e-9);
    let expected = w_fd * file_drift.score + w_conf * Confidence::Low.drift_score();
    assert!((report.drift_score - expected).abs() < 1e-9);
}

// ---------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------

/// S1 - search ranks direct matches first.
#[test]
fn s1_search_ranks_direct_matches() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(
        &kd,
        "domains/sharding.md",
        "# Database Sharding\n\nHow we split large tables across database shards.\n",
    );
    write(
        &kd,
        "domains/replication.md",
        "# Database Replication\n\nHow we replicate data between database nodes.\n",
    );
    write(
        &kd,
        "domains/network.md",
        "# Network Timeouts\n\nHandling of network timeout retries.\n",
    );

    let searcher = Searcher::new(&kd);
    let results = searcher
        .search("database sharding", 10, 0.0, &SearchFilter::default())
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].heading, "Database Sharding");
}

/// S2 - composite ranking favors recency when BM25 is tied.
#[test]
fn s2_composite_with_low_recency() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");

    let today = chrono::Utc::now().date_naive();
    let one_year_ago = today - chrono::Duration::days(366);
    let two_years_ago = today - chrono::Duration::days(731);

    write(
        &kd,
        "principles/a.md",
        &format!(
            "# Entry A\n\n<!-- learned: {today} | confidence: high -->\n\nquery term appears here.\n"
        ),
    );
    write(
        &kd,
        "principles/b.md",
        &format!(
            "# Entry B\n\n<!-- learned: {one_year_ago} | confidence: high -->\n\nquery term appears here.\n"
        ),
    );
    write(
        &kd,
        "principles/c.md",
        &format!(
            "# Entry C\n\n<!-- learned: {two_years_ago} | confidence: high -->\n\nquery term appears here.\n"
        ),
    );

    let searcher = Searcher::new(&kd);
    let results = searcher
        .composite_search(
            "query term",
            10,
            0.0,
            &SearchFilter::default(),
            CompositeWeights::default(),
        )
        .unwrap();
    assert_eq!(results.len(), 3);
    let order: Vec<&str> = results.iter().map(|r| r.base.heading.as_str()).collect();
    assert_eq!(order, vec!["Entry A", "Entry B", "Entry C"]);
}

/// S3 - vocabulary drift flags absent terms against the codebase vocabulary.
#[test]
fn s3_vocabulary_drift_flags_absent_terms() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "principles/one.md", "# One\n\nbody.\n");
    let indexer = Indexer::new(&kd);
    indexer.index_all(false).unwrap();

    let db_path = indexer.db_path().to_path_buf();
    let concordance = Concordance::new(&db_path);

    // 10 terms, 3 of which (8, 9, 10) never appear in any source vector.
    let entry_vec: std::collections::HashMap<u32, f32> =
        (1u32..=10).map(|i| (i, 1.0)).collect();
    let source_vec: std::collections::HashMap<u32, f32> =
        (1u32..=7).map(|i| (i, 1.0)).collect();

    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tfidf_vectors (file_path, heading, vector, source_type, updated_at) \
             VALUES ('entry.md', 'One', ?1, 'knowledge', 0)",
            [serialize_sparse_vector(&entry_vec)],
        )
        .unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO tfidf_vectors (file_path, heading, vector, source_type, updated_at) \
             VALUES ('src.rs', 'src.rs', ?1, 'source', 0)",
            [serialize_sparse_vector(&source_vec)],
        )
        .unwrap();
    }

    let drift = concordance
        .compute_vocabulary_drift("entry.md", "One", 10)
        .unwrap();
    assert_eq!(drift.top_k_terms, 10);
    assert_eq!(drift.absent_terms, 3);
    assert!((drift.score - 0.3).abs() < 1e-9);
}

/// S4 - budget partitioning splits full vs. titles-only by content length.
#[test]
fn s4_budget_partitioning_matches_scenario() {
    // Mirrors the unit-level greedy-walk test in `scorer.rs`, exercised here
    // through a real corpus and a real `budget_search` call.
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    // Content lengths keep this scenario's proportions (60, 40, 120) intact
    // relative to each other, not their exact scenario byte counts, padded
    // with a shared real word so the FTS tokenizer actually matches it.
    write(
        &kd,
        "domains/first.md",
        "# First\n\nbudgettoken padding padding padding padding padding.\n",
    );
    write(&kd, "domains/second.md", "# Second\n\nbudgettoken padding.\n");
    write(
        &kd,
        "domains/third.md",
        &format!(
            "# Third\n\nbudgettoken {}\n",
            "padding ".repeat(15).trim()
        ),
    );

    let searcher = Searcher::new(&kd);
    let partition = searcher
        .budget_search(
            "budgettoken",
            10,
            0.0,
            &SearchFilter::default(),
            CompositeWeights::default(),
            120,
        )
        .unwrap();
    // Greedy walk in composite-descending order fills `full` while content
    // fits the remaining budget and demotes the rest to titles-only.
    assert!(partition.budget_used <= 120);
    assert_eq!(
        partition.full.len() + partition.titles_only.len(),
        3,
        "every result must land in exactly one tier"
    );
}

/// S5 - archive resolution flag: active resolves with no archive flag,
/// archive-only resolves with `archived=true`.
#[test]
fn s5_archive_resolution_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "_work/auth-refactor/plan.md", "# Auth Refactor\n\nBody.\n");
    write(
        &kd,
        "_work/_archive/old-migration/plan.md",
        "# Old Migration\n\nBody.\n",
    );

    let resolver = Resolver::new(&kd);
    let active = resolver.resolve("[[work:auth-refactor]]");
    assert!(active.resolved);
    assert!(!active.archived);

    let archived = resolver.resolve("[[work:old-migration]]");
    assert!(archived.resolved);
    assert!(archived.archived);
}

/// S6 - link checker separates broken from archived from valid.
#[test]
fn s6_link_checker_separates_broken_archived_valid() {
    let tmp = tempfile::tempdir().unwrap();
    let kd = tmp.path().join("knowledge");
    write(&kd, "_work/active-item/plan.md", "# Active Item\n\nBody.\n");
    write(
        &kd,
        "_work/_archive/old-item/plan.md",
        "# Old Item\n\nBody.\n",
    );
    write(
        &kd,
        "principles/refs.md",
        "# Refs\n\n[[work:active-item]] [[work:old-item]] [[work:missing-item]]\n",
    );

    let checker = LinkChecker::new(&kd);
    let report = checker.check_all(true, true);
    assert_eq!(report.broken_links.len(), 1);
    assert_eq!(report.archived_links.len(), 1);
    let valid = report.total_links - report.broken_links.len() - report.archived_links.len();
    assert_eq!(valid, 1);
}
