//! Weighted, partial-signal staleness scoring across five drift signals:
//! file drift (VCS commit activity), backlink drift, neighbor drift
//! (TF-IDF concordance), vocabulary drift, and a confidence fallback.
//!
//! Ported from `staleness-scan.py`. Where the original shells out to the
//! `git` CLI for `file_drift`, this uses `git2` (libgit2 bindings) instead —
//! see `DESIGN.md` for that tradeoff.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::concordance::Concordance;
use crate::config::{
    AGING_THRESHOLD, DB_FILENAME, FILE_DRIFT_TIMEOUT_SECS, NEIGHBOR_DRIFT_COUNT, STALE_THRESHOLD,
    VOCAB_DRIFT_TOP_K, WEIGHT_BACKLINK_DRIFT, WEIGHT_CONFIDENCE,
    WEIGHT_FILE_DRIFT, WEIGHT_NEIGHBOR_DRIFT, WEIGHT_VOCABULARY_DRIFT,
};
use crate::error::Result;
use crate::layout;
use crate::markdown;
use crate::models::{Confidence, SourceType};
use crate::resolver::Resolver;

static BACKLINK_SCAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(?:knowledge|work|plan|thread):[^\]]+\]\]").unwrap());

static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!--\s*learned:\s*(?P<learned>\S+)\s*\|\s*confidence:\s*(?P<confidence>\w+)(?:\s*\|\s*source:\s*(?P<source>[^|]+?))?(?:\s*\|\s*related_files:\s*(?P<related_files>[^-]+?))?\s*-->",
    )
    .unwrap()
});

/// Metadata parsed from an entry's HTML comment, including the
/// staleness-specific `related_files` list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalenessMetadata {
    pub learned: Option<String>,
    pub confidence: Option<String>,
    pub related_files: Vec<String>,
}

/// Parse `<!-- learned: ... | confidence: ... | related_files: a,b -->`.
#[must_use]
pub fn parse_metadata(path: &Path) -> StalenessMetadata {
    let Ok(text) = std::fs::read_to_string(path) else {
        return StalenessMetadata::default();
    };
    let Some(caps) = META_RE.captures(&text) else {
        return StalenessMetadata::default();
    };
    let related_files = caps
        .name("related_files")
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    StalenessMetadata {
        learned: caps.name("learned").map(|m| m.as_str().trim().to_string()),
        confidence: caps
            .name("confidence")
            .map(|m| m.as_str().trim().to_lowercase()),
        related_files,
    }
}

/// Days since `learned_date` (`YYYY-MM-DD`), or `None` if unparseable.
#[must_use]
pub fn compute_age_days(learned_date: Option<&str>) -> Option<i64> {
    let learned_date = learned_date?;
    if learned_date.contains("YYYY") {
        return None;
    }
    let date = NaiveDate::parse_from_str(learned_date, "%Y-%m-%d").ok()?;
    let now = chrono::Utc::now().date_naive();
    Some((now - date).num_days())
}

/// Which of a list of related files still exist relative to the repo root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedFilesCheck {
    pub existing: Vec<String>,
    pub missing: Vec<String>,
    pub total: usize,
}

#[must_use]
pub fn check_related_files(related_files: &[String], repo_root: &Path) -> RelatedFilesCheck {
    let mut existing = Vec::new();
    let mut missing = Vec::new();
    for rf in related_files {
        if repo_root.join(rf).exists() {
            existing.push(rf.clone());
        } else {
            missing.push(rf.clone());
        }
    }
    RelatedFilesCheck {
        total: related_files.len(),
        existing,
        missing,
    }
}

/// Result of [`compute_file_drift`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileDrift {
    pub commit_count: usize,
    pub score: f64,
    pub available: bool,
}

/// Count commits touching `related_files` since `learned_date`, via
/// `git2`. The iteration is capped at [`FILE_DRIFT_TIMEOUT_SECS`] worth of
/// commit-walk steps, standing in for the original's subprocess timeout.
#[must_use]
pub fn compute_file_drift(
    repo_root: &Path,
    learned_date: Option<&str>,
    related_files: &[String],
) -> FileDrift {
    let unavailable = FileDrift {
        commit_count: 0,
        score: 0.0,
        available: false,
    };
    if related_files.is_empty() {
        return unavailable;
    }
    let Some(learned_date) = learned_date else {
        return unavailable;
    };
    if learned_date.contains("YYYY") {
        return unavailable;
    }
    let Ok(since) = NaiveDate::parse_from_str(learned_date, "%Y-%m-%d") else {
        return unavailable;
    };
    let Ok(repo) = git2::Repository::open(repo_root) else {
        return unavailable;
    };

    let since_time = since
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp();

    let mut revwalk = match repo.revwalk() {
        Ok(rw) => rw,
        Err(_) => return unavailable,
    };
    if revwalk.push_head().is_err() {
        return unavailable;
    }

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(FILE_DRIFT_TIMEOUT_SECS);
    let mut commit_count = 0usize;
    for oid in revwalk {
        if std::time::Instant::now() >= deadline {
            break;
        }
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        if commit.time().seconds() < since_time {
            break;
        }
        if commit_touches_paths(&repo, &commit, related_files) {
            commit_count += 1;
        }
    }

    let score = match commit_count {
        0 => 0.0,
        1..=3 => 0.3,
        4..=9 => 0.6,
        _ => 1.0,
    };
    FileDrift {
        commit_count,
        score,
        available: true,
    }
}

fn commit_touches_paths(repo: &git2::Repository, commit: &git2::Commit, paths: &[String]) -> bool {
    let Ok(tree) = commit.tree() else {
        return false;
    };
    let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
    let mut diff_opts = git2::DiffOptions::new();
    for p in paths {
        diff_opts.pathspec(p);
    }
    let Ok(diff) = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut diff_opts)) else {
        return false;
    };
    diff.deltas().len() > 0
}

/// Result of [`compute_backlink_drift`].
#[derive(Debug, Clone, PartialEq)]
pub struct BacklinkDrift {
    pub total: usize,
    pub broken: usize,
    pub broken_links: Vec<String>,
    pub score: f64,
    pub available: bool,
}

/// Resolve every `[[...]]` reference in `file_path`; drift score is binary
/// (0.0 if all resolve, 1.0 if any are broken).
#[must_use]
pub fn compute_backlink_drift(file_path: &Path, knowledge_dir: &Path) -> BacklinkDrift {
    let Ok(text) = std::fs::read_to_string(file_path) else {
        return BacklinkDrift {
            total: 0,
            broken: 0,
            broken_links: Vec::new(),
            score: 0.0,
            available: false,
        };
    };
    let backlinks: Vec<String> = BACKLINK_SCAN_RE
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();
    if backlinks.is_empty() {
        return BacklinkDrift {
            total: 0,
            broken: 0,
            broken_links: Vec::new(),
            score: 0.0,
            available: false,
        };
    }

    let resolver = Resolver::new(knowledge_dir);
    let broken_links: Vec<String> = backlinks
        .iter()
        .filter(|bl| !resolver.resolve(bl).resolved)
        .cloned()
        .collect();

    let score = if broken_links.is_empty() { 0.0 } else { 1.0 };
    BacklinkDrift {
        total: backlinks.len(),
        broken: broken_links.len(),
        broken_links,
        score,
        available: true,
    }
}

/// Result of [`compute_neighbor_drift`].
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborDrift {
    pub score: f64,
    pub available: bool,
    pub neighbors_checked: usize,
    pub neighbors_updated: usize,
}

/// Check whether an entry's top-N TF-IDF neighbors have a newer
/// `learned_date`, a signal that the entry itself may be stale relative to
/// its peers.
pub fn compute_neighbor_drift(
    file_path: &str,
    heading: &str,
    learned_date: Option<&str>,
    concordance: &Concordance,
) -> Result<NeighborDrift> {
    let unavailable = NeighborDrift {
        score: 0.0,
        available: false,
        neighbors_checked: 0,
        neighbors_updated: 0,
    };
    let Some(learned_date) = learned_date else {
        return Ok(unavailable);
    };
    if learned_date.contains("YYYY") {
        return Ok(unavailable);
    }
    let Ok(entry_date) = NaiveDate::parse_from_str(learned_date, "%Y-%m-%d") else {
        return Ok(unavailable);
    };

    let similar = concordance.find_similar(file_path, heading, NEIGHBOR_DRIFT_COUNT, Some("knowledge"))?;
    if similar.is_empty() {
        return Ok(unavailable);
    }

    let mut neighbors_checked = 0;
    let mut neighbors_updated = 0;
    for neighbor in &similar {
        let meta = parse_metadata(Path::new(&neighbor.file_path));
        let Some(neighbor_learned) = meta.learned else {
            continue;
        };
        if neighbor_learned.contains("YYYY") {
            continue;
        }
        let Ok(neighbor_date) = NaiveDate::parse_from_str(&neighbor_learned, "%Y-%m-%d") else {
            continue;
        };
        neighbors_checked += 1;
        if neighbor_date > entry_date {
            neighbors_updated += 1;
        }
    }

    if neighbors_checked == 0 {
        return Ok(unavailable);
    }
    Ok(NeighborDrift {
        score: neighbors_updated as f64 / neighbors_checked as f64,
        available: true,
        neighbors_checked,
        neighbors_updated,
    })
}

/// Freshness bucket assigned to a composite drift score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Fresh,
    Aging,
    Stale,
}

/// One drift signal's contribution to the composite score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalContribution {
    pub weight: f64,
    pub score: f64,
    pub available: bool,
}

/// The five drift signals' contributions, nested under a `signals` key in
/// the JSON report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StalenessSignals {
    pub file_drift: SignalContribution,
    pub backlink_drift: SignalContribution,
    pub neighbor_drift: SignalContribution,
    pub vocabulary_drift: SignalContribution,
    pub confidence: SignalContribution,
}

/// Composite staleness score for one entry.
#[derive(Debug, Clone, Serialize)]
pub struct StalenessScore {
    pub drift_score: f64,
    pub status: Status,
    pub signals: StalenessSignals,
}

/// Combine the five drift signals into a single `[0, 1]` score.
///
/// When `neighbor_drift` or `vocabulary_drift` is unavailable, its weight
/// folds into the confidence fallback signal, then every weight is
/// renormalized to sum to 1.0.
#[must_use]
pub fn score_entry(
    file_drift: &FileDrift,
    backlink_drift: &BacklinkDrift,
    confidence: Option<Confidence>,
    neighbor_drift: &NeighborDrift,
    vocabulary_drift: &crate::concordance::VocabularyDrift,
) -> StalenessScore {
    let conf_score = confidence.unwrap_or(Confidence::Medium).drift_score();

    let mut w_fd = if file_drift.available { WEIGHT_FILE_DRIFT } else { 0.0 };
    let mut w_bd = if backlink_drift.available {
        WEIGHT_BACKLINK_DRIFT
    } else {
        0.0
    };
    let mut w_nd = if neighbor_drift.available {
        WEIGHT_NEIGHBOR_DRIFT
    } else {
        0.0
    };
    let mut w_vd = if vocabulary_drift.available {
        WEIGHT_VOCABULARY_DRIFT
    } else {
        0.0
    };
    let mut w_conf = WEIGHT_CONFIDENCE;

    if !neighbor_drift.available {
        w_conf += WEIGHT_NEIGHBOR_DRIFT;
    }
    if !vocabulary_drift.available {
        w_conf += WEIGHT_VOCABULARY_DRIFT;
    }

    let mut total = w_fd + w_bd + w_nd + w_vd + w_conf;
    if total == 0.0 {
        w_conf = 1.0;
        total = 1.0;
    }
    if total < 1.0 {
        let scale = 1.0 / total;
        w_fd *= scale;
        w_bd *= scale;
        w_nd *= scale;
        w_vd *= scale;
        w_conf *= scale;
    }

    let fd_score = if file_drift.available { file_drift.score } else { 0.0 };
    let bd_score = if backlink_drift.available {
        backlink_drift.score
    } else {
        0.0
    };
    let nd_score = if neighbor_drift.available {
        neighbor_drift.score
    } else {
        0.0
    };
    let vd_score = if vocabulary_drift.available {
        vocabulary_drift.score
    } else {
        0.0
    };

    let drift_score = (w_fd * fd_score + w_bd * bd_score + w_nd * nd_score + w_vd * vd_score
        + w_conf * conf_score)
        .clamp(0.0, 1.0);

    let status = if drift_score >= STALE_THRESHOLD {
        Status::Stale
    } else if drift_score >= AGING_THRESHOLD {
        Status::Aging
    } else {
        Status::Fresh
    };

    StalenessScore {
        drift_score,
        status,
        signals: StalenessSignals {
            file_drift: SignalContribution {
                weight: w_fd,
                score: fd_score,
                available: file_drift.available,
            },
            backlink_drift: SignalContribution {
                weight: w_bd,
                score: bd_score,
                available: backlink_drift.available,
            },
            neighbor_drift: SignalContribution {
                weight: w_nd,
                score: nd_score,
                available: neighbor_drift.available,
            },
            vocabulary_drift: SignalContribution {
                weight: w_vd,
                score: vd_score,
                available: vocabulary_drift.available,
            },
            confidence: SignalContribution {
                weight: w_conf,
                score: conf_score,
                available: true,
            },
        },
    }
}

pub const DEFAULT_VOCAB_DRIFT_TOP_K: usize = VOCAB_DRIFT_TOP_K;

/// Per-entry freshness tallies for a scan.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StalenessCounts {
    pub fresh: usize,
    pub aging: usize,
    pub stale: usize,
}

/// One scored entry in a [`StalenessReport`].
#[derive(Debug, Clone, Serialize)]
pub struct StalenessReportEntry {
    pub file: String,
    pub status: Status,
    pub drift_score: f64,
    pub signals: StalenessSignals,
    pub learned: Option<String>,
    pub confidence: Option<String>,
    pub age_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_files: Option<RelatedFilesCheck>,
}

/// Full staleness scan report, written to `<knowledge_dir>/_meta/staleness-report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct StalenessReport {
    pub scan_time: String,
    pub knowledge_dir: String,
    pub repo_root: String,
    pub total_entries: usize,
    pub counts: StalenessCounts,
    pub entries: Vec<StalenessReportEntry>,
}

/// Heading used to key an entry's TF-IDF vector: its H1, or a title-cased
/// filename stem when there is none, matching how the indexer keys it.
fn entry_heading(path: &Path) -> String {
    markdown::parse_entry_file(path).into_iter().next().map_or_else(
        || {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string()
        },
        |e| e.heading,
    )
}

/// Scans every knowledge entry file for staleness and writes the JSON
/// report. Grounded in `staleness-scan.py::run_scan`/`main`.
pub struct StalenessEngine {
    knowledge_dir: PathBuf,
    repo_root: PathBuf,
}

impl StalenessEngine {
    #[must_use]
    pub fn new(knowledge_dir: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        StalenessEngine {
            knowledge_dir: knowledge_dir.into(),
            repo_root: repo_root.into(),
        }
    }

    /// Score every knowledge entry under the knowledge directory, write the
    /// report to `_meta/staleness-report.json`, and return it.
    pub fn scan(&self) -> Result<StalenessReport> {
        let db_path = self.knowledge_dir.join(DB_FILENAME);
        let concordance = Concordance::new(&db_path);

        let mut entry_files: Vec<PathBuf> = layout::collect_md_files(&self.knowledge_dir)
            .into_iter()
            .filter(|f| f.source_type == SourceType::Knowledge)
            .map(|f| f.path)
            .collect();
        entry_files.sort();
        debug!(count = entry_files.len(), "staleness scan: entries found");

        let mut entries = Vec::with_capacity(entry_files.len());
        let mut counts = StalenessCounts::default();

        for path in &entry_files {
            let meta = parse_metadata(path);
            let age_days = compute_age_days(meta.learned.as_deref());
            let file_drift =
                compute_file_drift(&self.repo_root, meta.learned.as_deref(), &meta.related_files);
            let backlink_drift = compute_backlink_drift(path, &self.knowledge_dir);

            let heading = entry_heading(path);
            let path_str = path.to_string_lossy();
            let neighbor_drift =
                compute_neighbor_drift(&path_str, &heading, meta.learned.as_deref(), &concordance)?;
            let vocabulary_drift =
                concordance.compute_vocabulary_drift(&path_str, &heading, VOCAB_DRIFT_TOP_K)?;

            let confidence = meta
                .confidence
                .as_deref()
                .and_then(|c| c.parse::<Confidence>().ok());
            let score = score_entry(
                &file_drift,
                &backlink_drift,
                confidence,
                &neighbor_drift,
                &vocabulary_drift,
            );

            match score.status {
                Status::Fresh => counts.fresh += 1,
                Status::Aging => counts.aging += 1,
                Status::Stale => counts.stale += 1,
            }

            let rel_path = path
                .strip_prefix(&self.knowledge_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            let related_files = (!meta.related_files.is_empty())
                .then(|| check_related_files(&meta.related_files, &self.repo_root));

            entries.push(StalenessReportEntry {
                file: rel_path,
                status: score.status,
                drift_score: score.drift_score,
                signals: score.signals,
                learned: meta.learned,
                confidence: meta.confidence,
                age_days,
                related_files,
            });
        }

        let report = StalenessReport {
            scan_time: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            knowledge_dir: self.knowledge_dir.to_string_lossy().to_string(),
            repo_root: self.repo_root.to_string_lossy().to_string(),
            total_entries: entries.len(),
            counts,
            entries,
        };

        self.write_report(&report)?;
        Ok(report)
    }

    fn write_report(&self, report: &StalenessReport) -> Result<()> {
        let meta_dir = self.knowledge_dir.join("_meta");
        std::fs::create_dir_all(&meta_dir)?;
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(meta_dir.join("staleness-report.json"), format!("{json}\n"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available_drift(score: f64) -> FileDrift {
        FileDrift {
            commit_count: 1,
            score,
            available: true,
        }
    }

    fn unavailable_drift() -> FileDrift {
        FileDrift {
            commit_count: 0,
            score: 0.0,
            available: false,
        }
    }

    #[test]
    fn confidence_only_fallback_when_all_unavailable() {
        let fd = unavailable_drift();
        let bd = BacklinkDrift {
            total: 0,
            broken: 0,
            broken_links: Vec::new(),
            score: 0.0,
            available: false,
        };
        let nd = NeighborDrift {
            score: 0.0,
            available: false,
            neighbors_checked: 0,
            neighbors_updated: 0,
        };
        let vd = crate::concordance::VocabularyDrift {
            score: 0.0,
            available: false,
            top_k_terms: 0,
            absent_terms: 0,
            absent_term_names: Vec::new(),
        };
        let result = score_entry(&fd, &bd, Some(Confidence::Low), &nd, &vd);
        assert!((result.drift_score - 1.0).abs() < 1e-9);
        assert_eq!(result.status, Status::Stale);
    }

    #[test]
    fn weights_renormalize_when_file_drift_available_only() {
        let fd = available_drift(1.0);
        let bd = BacklinkDrift {
            total: 0,
            broken: 0,
            broken_links: Vec::new(),
            score: 0.0,
            available: false,
        };
        let nd = NeighborDrift {
            score: 0.0,
            available: false,
            neighbors_checked: 0,
            neighbors_updated: 0,
        };
        let vd = crate::concordance::VocabularyDrift {
            score: 0.0,
            available: false,
            top_k_terms: 0,
            absent_terms: 0,
            absent_term_names: Vec::new(),
        };
        let result = score_entry(&fd, &bd, Some(Confidence::High), &nd, &vd);
        let total_weight = result.signals.file_drift.weight
            + result.signals.backlink_drift.weight
            + result.signals.neighbor_drift.weight
            + result.signals.vocabulary_drift.weight
            + result.signals.confidence.weight;
        assert!((total_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn compute_age_days_rejects_placeholder() {
        assert_eq!(compute_age_days(Some("YYYY-MM-DD")), None);
    }

    #[test]
    fn parse_metadata_extracts_related_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry.md");
        std::fs::write(
            &path,
            "<!-- learned: 2026-01-01 | confidence: medium | related_files: src/a.rs, src/b.rs -->\nbody\n",
        )
        .unwrap();
        let meta = parse_metadata(&path);
        assert_eq!(meta.confidence.as_deref(), Some("medium"));
        assert_eq!(meta.related_files, vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn scan_writes_report_and_tallies_counts() {
        let repo = tempfile::tempdir().unwrap();
        let kd = repo.path().join("knowledge");
        let principles = kd.join("principles");
        std::fs::create_dir_all(&principles).unwrap();
        std::fs::write(
            principles.join("one.md"),
            "# One\n\n<!-- learned: 2026-01-01 | confidence: high -->\n\nbody text.\n",
        )
        .unwrap();

        crate::indexer::Indexer::new(&kd).index_all(false).unwrap();

        let report = StalenessEngine::new(&kd, repo.path()).scan().unwrap();
        assert_eq!(report.total_entries, 1);
        assert_eq!(
            report.counts.fresh + report.counts.aging + report.counts.stale,
            1
        );
        assert_eq!(report.entries[0].file, "principles/one.md");
        assert_eq!(report.entries[0].learned.as_deref(), Some("2026-01-01"));

        let report_path = kd.join("_meta").join("staleness-report.json");
        assert!(report_path.is_file());
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(on_disk["total_entries"], 1);
        assert!(on_disk["entries"][0]["signals"]["confidence"].is_object());
    }
}
