//! Scans the corpus for `[[backlink]]` references and reports which ones
//! fail to resolve. Ported from `pk_search.py::LinkChecker`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::indexer::Indexer;
use crate::resolver::{Resolved, Resolver, BACKLINK_RE};

static FENCED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?sm)^```.*?^```").unwrap());
static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]+`").unwrap());
static PLACEHOLDER_TARGETS: &[&str] = &["file", "slug", "...", "name"];

/// A backlink that failed to resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenLink {
    pub source_file: String,
    pub backlink: String,
    pub error: String,
}

/// A backlink that resolved, but against an archived target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedLink {
    pub source_file: String,
    pub backlink: String,
}

/// Outcome of [`LinkChecker::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub total_links: usize,
    pub broken_links: Vec<BrokenLink>,
    pub archived_links: Vec<ArchivedLink>,
    pub placeholder_count: usize,
    pub skipped_archived_files: usize,
    pub skipped_thread_files: usize,
}

fn strip_code_blocks(text: &str) -> String {
    let text = FENCED_CODE_RE.replace_all(text, "");
    INLINE_CODE_RE.replace_all(&text, "").into_owned()
}

fn is_placeholder_backlink(target: &str) -> bool {
    PLACEHOLDER_TARGETS.contains(&target.trim())
}

/// Scans a knowledge directory for `[[backlink]]` references and resolves
/// each one.
pub struct LinkChecker {
    knowledge_dir: std::path::PathBuf,
    resolver: Resolver,
}

impl LinkChecker {
    #[must_use]
    pub fn new(knowledge_dir: impl Into<std::path::PathBuf>) -> Self {
        let knowledge_dir = knowledge_dir.into();
        let resolver = Resolver::new(&knowledge_dir);
        LinkChecker {
            knowledge_dir,
            resolver,
        }
    }

    /// Scan every indexable file for backlinks and resolve each one.
    #[must_use]
    pub fn check_all(&self, include_archived: bool, include_threads: bool) -> LinkReport {
        let indexer = Indexer::new(&self.knowledge_dir);
        let md_files = crate::layout::collect_md_files(&self.knowledge_dir);

        let mut all_links: Vec<(String, String)> = Vec::new();
        let mut placeholder_count = 0;
        let mut skipped_archived_files = 0;
        let mut skipped_thread_files = 0;
        drop(indexer);

        for file in &md_files {
            let rel = file
                .path
                .strip_prefix(&self.knowledge_dir)
                .unwrap_or(&file.path);
            let rel_str = rel.display().to_string();

            if !include_archived && rel_str.starts_with(&format!("_work{}_archive{}", std::path::MAIN_SEPARATOR, std::path::MAIN_SEPARATOR))
            {
                skipped_archived_files += 1;
                continue;
            }
            if !include_threads && rel_str.starts_with(&format!("_threads{}", std::path::MAIN_SEPARATOR)) {
                skipped_thread_files += 1;
                continue;
            }

            let Ok(text) = std::fs::read_to_string(&file.path) else {
                continue;
            };
            let stripped = strip_code_blocks(&text);
            for caps in BACKLINK_RE.captures_iter(&stripped) {
                let whole = caps.get(0).unwrap().as_str().to_string();
                let target = &caps["target"];
                if is_placeholder_backlink(target) {
                    placeholder_count += 1;
                    continue;
                }
                all_links.push((file.path.display().to_string(), whole));
            }
        }

        let mut broken = Vec::new();
        let mut archived = Vec::new();
        for (source_file, backlink) in &all_links {
            let result: Resolved = self.resolver.resolve(backlink);
            let rel_source = Path::new(source_file)
                .strip_prefix(&self.knowledge_dir)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| source_file.clone());

            if !result.resolved {
                broken.push(BrokenLink {
                    source_file: rel_source,
                    backlink: backlink.clone(),
                    error: result.error.unwrap_or_else(|| "Unknown".to_string()),
                });
            } else if result.archived {
                archived.push(ArchivedLink {
                    source_file: rel_source,
                    backlink: backlink.clone(),
                });
            }
        }

        LinkReport {
            total_links: all_links.len(),
            broken_links: broken,
            archived_links: archived,
            placeholder_count,
            skipped_archived_files,
            skipped_thread_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detects_broken_backlink() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("principles")).unwrap();
        fs::write(
            dir.path().join("principles/one.md"),
            "# One\n\nSee [[knowledge:nonexistent]] for details.\n",
        )
        .unwrap();

        let checker = LinkChecker::new(dir.path());
        let report = checker.check_all(false, false);
        assert_eq!(report.total_links, 1);
        assert_eq!(report.broken_links.len(), 1);
    }

    #[test]
    fn resolves_valid_backlink() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("principles")).unwrap();
        fs::write(dir.path().join("principles/two.md"), "# Two\nbody\n").unwrap();
        fs::write(
            dir.path().join("principles/one.md"),
            "# One\n\nSee [[knowledge:two]] for details.\n",
        )
        .unwrap();

        let checker = LinkChecker::new(dir.path());
        let report = checker.check_all(false, false);
        assert_eq!(report.broken_links.len(), 0);
    }

    #[test]
    fn skips_placeholder_backlinks() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("principles")).unwrap();
        fs::write(
            dir.path().join("principles/one.md"),
            "# One\n\nTemplate: `[[knowledge:file]]`\n",
        )
        .unwrap();
        let checker = LinkChecker::new(dir.path());
        let report = checker.check_all(false, false);
        assert_eq!(report.total_links, 0);
    }
}
