//! CLI for `lore`, a local personal knowledge retrieval engine.
//!
//! Thin dispatch layer over `lore-core`: this crate owns argument parsing,
//! environment-variable resolution of the knowledge directory, and
//! human/JSON output formatting. The core never reads environment or
//! writes to stdout directly.

#![forbid(unsafe_code)]

pub mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use lore_core::concordance::Concordance;
use lore_core::indexer::Indexer;
use lore_core::link_checker::LinkChecker;
use lore_core::resolver::{resolve_read_path, Resolver};
use lore_core::scorer::{CompositeWeights, SearchFilter, Searcher};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("knowledge directory not found (set --knowledge-dir, LORE_KNOWLEDGE_DIR, or run from a directory with a `knowledge/` subdir)")]
    NoKnowledgeDir,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error(transparent)]
    Core(#[from] lore_core::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "lore", version, about = "Local personal knowledge retrieval engine")]
pub struct Cli {
    /// Path to the knowledge directory. Falls back to `LORE_KNOWLEDGE_DIR`,
    /// then `$LORE_DATA_DIR/<cwd-name>/knowledge`, then `./knowledge`.
    #[arg(long, global = true)]
    pub knowledge_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a full index from scratch.
    Index {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
    /// Reindex only files that changed since the last index.
    IncrementalIndex {
        #[arg(long)]
        repo_root: Option<PathBuf>,
    },
    /// Lexical (optionally composite or budget-aware) search.
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long = "type")]
        source_type: Option<String>,
        #[arg(long, num_args = 1..)]
        category: Vec<String>,
        #[arg(long = "exclude-category", num_args = 1..)]
        exclude_category: Vec<String>,
        #[arg(long)]
        caller: Option<String>,
        #[arg(long)]
        include_archived: bool,
        /// Re-rank with BM25 + recency + TF-IDF composite scoring.
        #[arg(long)]
        composite: bool,
        /// Expand each result with its TF-IDF "see also" neighbors.
        #[arg(long)]
        expand: bool,
        /// Partition composite results into full/titles-only tiers within
        /// this many characters.
        #[arg(long)]
        budget: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Resolve one or more `[[type:target#heading]]` backlinks.
    Resolve {
        backlinks: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Read a knowledge file, optionally filtered by query relevance.
    Read {
        file: String,
        #[arg(long, short = 'q')]
        query: Option<String>,
        #[arg(long = "type")]
        source_type: Option<String>,
    },
    /// Scan the corpus for broken `[[backlink]]` references.
    CheckLinks {
        /// Include archived work items and thread files (excluded by default).
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Recompute see-also and related-file recommendations.
    AnalyzeConcordance {
        #[arg(long, default_value_t = lore_core::config::SEE_ALSO_LIMIT)]
        see_also_limit: usize,
        #[arg(long, default_value_t = lore_core::config::RELATED_FILES_THRESHOLD)]
        related_files_threshold: f64,
        #[arg(long)]
        json: bool,
    },
    /// Find knowledge-entry pairs similar enough to be merge candidates.
    AnalyzeMergeCandidates {
        #[arg(long, default_value_t = lore_core::config::MERGE_CANDIDATES_THRESHOLD)]
        threshold: f64,
        #[arg(long)]
        json: bool,
    },
    /// Print index/corpus statistics.
    Stats,
}

/// Resolve the knowledge directory: explicit flag, then `LORE_KNOWLEDGE_DIR`,
/// then `$LORE_DATA_DIR/<cwd-name>/knowledge`, then `./knowledge` if present.
/// The core itself never reads environment (`spec.md` §6).
fn resolve_knowledge_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    if let Ok(dir) = std::env::var("LORE_KNOWLEDGE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(data_dir) = std::env::var("LORE_DATA_DIR") {
        let cwd = std::env::current_dir().ok()?;
        let repo_name = cwd.file_name()?.to_str()?;
        let candidate = PathBuf::from(data_dir).join(repo_name).join("knowledge");
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    let cwd = std::env::current_dir().ok()?;
    let fallback = cwd.join("knowledge");
    if fallback.is_dir() {
        return Some(fallback);
    }
    None
}

#[must_use]
pub fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            1
        }
    }
}

fn execute(cli: Cli) -> CliResult<()> {
    let knowledge_dir =
        resolve_knowledge_dir(cli.knowledge_dir.as_deref()).ok_or(CliError::NoKnowledgeDir)?;

    match cli.command {
        Commands::Index { force, repo_root } => cmd_index(&knowledge_dir, force, repo_root),
        Commands::IncrementalIndex { repo_root } => {
            cmd_incremental_index(&knowledge_dir, repo_root)
        }
        Commands::Search {
            query,
            limit,
            threshold,
            source_type,
            category,
            exclude_category,
            caller,
            include_archived,
            composite,
            expand,
            budget,
            json,
        } => cmd_search(
            &knowledge_dir,
            &query,
            limit,
            threshold,
            source_type,
            category,
            exclude_category,
            caller,
            include_archived,
            composite,
            expand,
            budget,
            json,
        ),
        Commands::Resolve { backlinks, json } => cmd_resolve(&knowledge_dir, &backlinks, json),
        Commands::Read {
            file,
            query,
            source_type,
        } => cmd_read(&knowledge_dir, &file, query.as_deref(), source_type.as_deref()),
        Commands::CheckLinks { all, json } => cmd_check_links(&knowledge_dir, all, json),
        Commands::AnalyzeConcordance {
            see_also_limit,
            related_files_threshold,
            json,
        } => cmd_analyze_concordance(&knowledge_dir, see_also_limit, related_files_threshold, json),
        Commands::AnalyzeMergeCandidates { threshold, json } => {
            cmd_analyze_merge_candidates(&knowledge_dir, threshold, json)
        }
        Commands::Stats => cmd_stats(&knowledge_dir),
    }
}

fn build_indexer(knowledge_dir: &Path, repo_root: Option<PathBuf>) -> Indexer {
    let indexer = Indexer::new(knowledge_dir);
    match repo_root {
        Some(root) => indexer.with_repo_root(root),
        None => indexer,
    }
}

fn cmd_index(knowledge_dir: &Path, force: bool, repo_root: Option<PathBuf>) -> CliResult<()> {
    let indexer = build_indexer(knowledge_dir, repo_root);
    let stats = indexer.index_all(force)?;
    println!(
        "Indexed {} files, {} entries in {:.3}s",
        stats.files_indexed, stats.total_entries, stats.elapsed_seconds
    );
    Ok(())
}

fn cmd_incremental_index(knowledge_dir: &Path, repo_root: Option<PathBuf>) -> CliResult<()> {
    let indexer = build_indexer(knowledge_dir, repo_root);
    let stats = indexer.incremental_index()?;
    if stats.files_reindexed == 0 && stats.files_removed == 0 {
        println!("Index up to date.");
    } else {
        println!(
            "Reindexed {} files, removed {} in {:.3}s",
            stats.files_reindexed, stats.files_removed, stats.elapsed_seconds
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn cmd_search(
    knowledge_dir: &Path,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
    source_type: Option<String>,
    category: Vec<String>,
    exclude_category: Vec<String>,
    caller: Option<String>,
    include_archived: bool,
    composite: bool,
    expand: bool,
    budget: Option<usize>,
    json: bool,
) -> CliResult<()> {
    let searcher = Searcher::new(knowledge_dir);
    let limit = limit.unwrap_or_else(lore_core::scorer::default_limit);
    let threshold = threshold.unwrap_or_else(lore_core::scorer::default_threshold);
    let filter = SearchFilter {
        source_type,
        category,
        exclude_category,
        caller,
        include_archived,
    };

    if let Some(budget_chars) = budget {
        let partition = searcher.budget_search(
            query,
            limit,
            threshold,
            &filter,
            CompositeWeights::default(),
            budget_chars,
        )?;
        if json {
            output::print_json(&partition)?;
        } else {
            println!(
                "Budget {}/{} chars used — {} full, {} titles only",
                partition.budget_used,
                partition.budget_total,
                partition.full.len(),
                partition.titles_only.len()
            );
            for r in &partition.full {
                println!("\n[{:.3}] {} — {}", r.composite_score, r.base.heading, r.base.file_path);
                println!("{}", r.content);
            }
            for r in &partition.titles_only {
                println!("[{:.3}] {} — {} (titles only)", r.composite_score, r.heading, r.file_path);
            }
        }
        return Ok(());
    }

    if composite {
        let results =
            searcher.composite_search(query, limit, threshold, &filter, CompositeWeights::default())?;
        if json {
            output::print_json(&results)?;
        } else {
            print_composite_results(&results);
        }
        if expand {
            print_expand_section(knowledge_dir, &results.iter().map(|r| &r.base).collect::<Vec<_>>())?;
        }
        return Ok(());
    }

    let results = searcher.search(query, limit, threshold, &filter)?;
    if json {
        output::print_json(&results)?;
    } else {
        print_search_results(&results);
    }
    if expand {
        print_expand_section(knowledge_dir, &results.iter().collect::<Vec<_>>())?;
    }
    Ok(())
}

fn print_search_results(results: &[lore_core::scorer::SearchResult]) {
    if results.is_empty() {
        println!("(no results)");
        return;
    }
    for r in results {
        println!("\n[{:.3}] {} — {}", r.score, r.heading, r.file_path);
        println!("{}", r.snippet);
    }
}

fn print_composite_results(results: &[lore_core::scorer::CompositeResult]) {
    if results.is_empty() {
        println!("(no results)");
        return;
    }
    for r in results {
        println!(
            "\n[{:.3}] {} — {}",
            r.composite_score, r.base.heading, r.base.file_path
        );
        println!("{}", r.base.snippet);
    }
}

fn print_expand_section(
    knowledge_dir: &Path,
    results: &[&lore_core::scorer::SearchResult],
) -> CliResult<()> {
    if results.is_empty() {
        return Ok(());
    }
    let indexer = Indexer::new(knowledge_dir);
    let concordance = Concordance::new(indexer.db_path());
    println!("\n--- See also ---");
    for r in results {
        let abs_path = knowledge_dir.join(&r.file_path);
        let similar =
            concordance.find_similar(&abs_path.to_string_lossy(), &r.heading, 3, Some("knowledge"))?;
        if similar.is_empty() {
            continue;
        }
        println!("{}:", r.heading);
        for s in similar {
            println!("  - [{:.3}] {} ({})", s.similarity, s.heading, s.file_path);
        }
    }
    Ok(())
}

fn cmd_resolve(knowledge_dir: &Path, backlinks: &[String], json: bool) -> CliResult<()> {
    let resolver = Resolver::new(knowledge_dir);
    let results = resolver.resolve_batch(backlinks);
    if json {
        output::print_json(&results)?;
        return Ok(());
    }
    for r in &results {
        println!("\n--- {} ---", r.backlink);
        if r.resolved {
            let content = r.content.as_deref().unwrap_or_default();
            if content.len() > 2000 {
                println!("{}\n... (truncated)", &content[..2000]);
            } else {
                println!("{content}");
            }
        } else {
            println!("  ERROR: {}", r.error.as_deref().unwrap_or("unknown"));
        }
    }
    Ok(())
}

fn cmd_read(
    knowledge_dir: &Path,
    file_arg: &str,
    query: Option<&str>,
    source_type: Option<&str>,
) -> CliResult<()> {
    let file_path = resolve_read_path(knowledge_dir, file_arg, source_type)
        .ok_or_else(|| CliError::FileNotFound(file_arg.to_string()))?;

    if file_path.is_dir() {
        read_thread_dir(knowledge_dir, &file_path, query);
        return Ok(());
    }

    let Some(query) = query else {
        let content = std::fs::read_to_string(&file_path)?;
        print!("{content}");
        return Ok(());
    };

    let indexer = Indexer::new(knowledge_dir);
    if !indexer.db_path().exists() {
        indexer.index_all(false)?;
    }
    let conn = rusqlite::Connection::open(indexer.db_path())?;
    let abs_path = file_path.to_string_lossy().to_string();

    let mut stmt = conn.prepare("SELECT heading, content FROM entries WHERE file_path = ?1")?;
    let all_headings: Vec<(String, String)> = stmt
        .query_map([&abs_path], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(Result::ok)
        .collect();
    drop(stmt);

    if all_headings.is_empty() {
        let content = std::fs::read_to_string(&file_path)?;
        print!("{content}");
        return Ok(());
    }

    let prepared = lore_core::scorer::prepare_query(query);
    let mut match_stmt = conn.prepare(
        "SELECT heading, content FROM entries WHERE entries MATCH ?1 AND file_path = ?2 ORDER BY rank",
    )?;
    let matched: Vec<(String, String)> = match_stmt
        .query_map(rusqlite::params![prepared, abs_path], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .filter_map(Result::ok)
        .collect();
    drop(match_stmt);

    let matched_headings: std::collections::HashSet<&str> =
        matched.iter().map(|(h, _)| h.as_str()).collect();
    let rel_path = file_path
        .strip_prefix(knowledge_dir)
        .unwrap_or(&file_path)
        .display();

    println!("# {rel_path} (query: {query})");
    println!(
        "# {} matching, {} summarized",
        matched_headings.len(),
        all_headings.len() - matched_headings.len()
    );
    println!();
    for (heading, content) in &matched {
        println!("### {heading}");
        println!("{content}");
        println!();
    }
    let non_matching: Vec<&String> = all_headings
        .iter()
        .map(|(h, _)| h)
        .filter(|h| !matched_headings.contains(h.as_str()))
        .collect();
    if !non_matching.is_empty() {
        println!("### Other sections (heading only)");
        for h in non_matching {
            println!("- {h}");
        }
        println!();
    }
    Ok(())
}

fn read_thread_dir(knowledge_dir: &Path, dir: &Path, query: Option<&str>) {
    let thread_resolver = Resolver::new(knowledge_dir);
    let slug = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let backlink = format!("[[thread:{slug}]]");
    let resolved = thread_resolver.resolve(&backlink);
    let content = resolved.content.unwrap_or_default();

    if let Some(query) = query {
        let rel_path = dir.strip_prefix(knowledge_dir).unwrap_or(dir).display();
        println!("# {rel_path}/ (query: {query})");
    }
    print!("{content}");
}

fn cmd_check_links(knowledge_dir: &Path, all: bool, json: bool) -> CliResult<()> {
    let checker = LinkChecker::new(knowledge_dir);
    let report = checker.check_all(all, all);
    if json {
        output::print_json(&report)?;
        return Ok(());
    }
    println!(
        "Checked {} links: {} broken, {} archived, {} placeholder",
        report.total_links,
        report.broken_links.len(),
        report.archived_links.len(),
        report.placeholder_count
    );
    for b in &report.broken_links {
        println!("  BROKEN {} in {}: {}", b.backlink, b.source_file, b.error);
    }
    for a in &report.archived_links {
        println!("  ARCHIVED {} in {}", a.backlink, a.source_file);
    }
    Ok(())
}

fn cmd_analyze_concordance(
    knowledge_dir: &Path,
    see_also_limit: usize,
    related_files_threshold: f64,
    json: bool,
) -> CliResult<()> {
    let indexer = Indexer::new(knowledge_dir);
    if !indexer.db_path().exists() {
        indexer.index_all(false)?;
    }
    let concordance = Concordance::new(indexer.db_path());
    concordance.build_vectors(None)?;
    let stats = concordance.run_full_analysis(
        see_also_limit,
        related_files_threshold,
        lore_core::config::RELATED_FILES_LIMIT,
    )?;
    if json {
        output::print_json(&stats)?;
    } else {
        println!(
            "Analyzed {} entries: {} see-also pairs, {} related-file pairs in {:.3}s",
            stats.entries_analyzed, stats.see_also_pairs, stats.related_file_pairs, stats.elapsed_seconds
        );
    }
    Ok(())
}

fn cmd_analyze_merge_candidates(knowledge_dir: &Path, threshold: f64, json: bool) -> CliResult<()> {
    let indexer = Indexer::new(knowledge_dir);
    if !indexer.db_path().exists() {
        indexer.index_all(false)?;
    }
    let concordance = Concordance::new(indexer.db_path());
    let candidates = concordance.find_merge_candidates(threshold)?;
    if json {
        output::print_json(&candidates)?;
        return Ok(());
    }
    if candidates.is_empty() {
        println!("(no merge candidates)");
        return Ok(());
    }
    let mut table = output::CliTable::new(vec!["similarity", "target", "source"]);
    for c in &candidates {
        table.add_row(vec![
            format!("{:.3}", c.similarity),
            format!("{} — {}", c.target_path, c.target_title),
            format!("{} — {}", c.source_path, c.source_title),
        ]);
    }
    table.render();
    Ok(())
}

fn cmd_stats(knowledge_dir: &Path) -> CliResult<()> {
    let indexer = Indexer::new(knowledge_dir);
    let db_path = indexer.db_path();
    if !db_path.exists() {
        println!("No index found. Run `lore index` first.");
        return Ok(());
    }

    let conn = rusqlite::Connection::open(db_path)?;
    let entry_count: i64 = conn.query_row("SELECT count(*) FROM entries", [], |r| r.get(0))?;
    let file_count: i64 = conn.query_row("SELECT count(*) FROM file_meta", [], |r| r.get(0))?;

    let mut type_stmt =
        conn.prepare("SELECT source_type, count(*) FROM file_meta GROUP BY source_type")?;
    let type_counts: Vec<(String, i64)> = type_stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .filter_map(Result::ok)
        .collect();
    drop(type_stmt);

    let mut cat_stmt = conn.prepare(
        "SELECT category, count(*) FROM entries WHERE category IS NOT NULL GROUP BY category",
    )?;
    let category_counts: Vec<(String, i64)> = cat_stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .filter_map(Result::ok)
        .collect();
    drop(cat_stmt);

    let last_indexed: Option<String> = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key='last_indexed'",
            [],
            |r| r.get(0),
        )
        .ok();
    let db_size = std::fs::metadata(db_path).map_or(0, |m| m.len());
    let stale = indexer.get_stale_files()?;

    println!("Knowledge dir: {}", knowledge_dir.display());
    println!("Files indexed: {file_count}");
    if !type_counts.is_empty() {
        let parts: Vec<String> = type_counts.iter().map(|(k, v)| format!("{v} {k}")).collect();
        println!("  By type:     {}", parts.join(", "));
    }
    if !category_counts.is_empty() {
        let parts: Vec<String> = category_counts
            .iter()
            .map(|(k, v)| format!("{v} {k}"))
            .collect();
        println!("  By category: {}", parts.join(", "));
    }
    println!("Total entries: {entry_count}");
    println!("Database size: {db_size} bytes");
    println!("Last indexed:  {}", last_indexed.unwrap_or_else(|| "never".to_string()));
    println!("Stale files:   {}", stale.len());
    for f in &stale {
        println!("  - {}", f.path.display());
    }
    Ok(())
}
