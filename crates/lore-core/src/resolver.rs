//! Resolves `[[type:target#heading]]` backlinks to content, and CLI `read`
//! file arguments to on-disk paths.
//!
//! Ported from `pk_resolve.py`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{CATEGORY_DIRS, SKIP_FILES};

/// Matches `[[knowledge:target]]`, `[[work:target#heading]]`,
/// `[[plan:target]]` (deprecated alias for `work`), and `[[thread:target#date]]`.
pub static BACKLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[(?P<type>knowledge|work|plan|thread):(?P<target>[^\]#]+)(?:#(?P<heading>[^\]]+))?\]\]")
        .unwrap()
});

/// The outcome of resolving one backlink.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Resolved {
    pub backlink: String,
    pub resolved: bool,
    pub source_type: Option<String>,
    pub target: Option<String>,
    pub heading: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub archived: bool,
}

impl Resolved {
    fn failure(backlink: &str, error: impl Into<String>) -> Self {
        Resolved {
            backlink: backlink.to_string(),
            resolved: false,
            source_type: None,
            target: None,
            heading: None,
            content: None,
            error: Some(error.into()),
            archived: false,
        }
    }
}

/// Reconstruct a thread entry heading from its filename.
///
/// `2026-02-06.md` -> `2026-02-06`; `2026-02-06-s6.md` -> `2026-02-06 (Session 6)`;
/// `2026-02-07-s14-continued.md` -> `2026-02-07 (Session 14, continued)`;
/// `2026-02-07-s14-2.md` -> `2026-02-07 (Session 14)`.
#[must_use]
pub fn filename_to_heading(fname: &str) -> String {
    static SESSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^s(\d+)(-.*)?$").unwrap());
    static DISAMBIGUATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-\d+$").unwrap());

    let base = fname.replace(".md", "");
    let date: String = base.chars().take(10).collect();
    let rest: String = base.chars().skip(10).collect();

    if rest.is_empty() {
        return date;
    }

    let rest = rest.trim_start_matches('-');
    let Some(caps) = SESSION_RE.captures(rest) else {
        return date;
    };
    let session_num = &caps[1];
    let suffix = caps.get(2).map(|m| m.as_str()).unwrap_or("");

    if suffix.is_empty() {
        format!("{date} (Session {session_num})")
    } else if DISAMBIGUATION_RE.is_match(suffix) {
        format!("{date} (Session {session_num})")
    } else {
        let qualifier = suffix.trim_start_matches('-').replace('-', " ");
        format!("{date} (Session {session_num}, {qualifier})")
    }
}

/// Resolves backlinks against a knowledge directory.
pub struct Resolver {
    knowledge_dir: PathBuf,
}

impl Resolver {
    #[must_use]
    pub fn new(knowledge_dir: impl Into<PathBuf>) -> Self {
        Resolver {
            knowledge_dir: knowledge_dir.into(),
        }
    }

    /// Resolve a single backlink string, e.g. `[[knowledge:architecture#Section]]`.
    #[must_use]
    pub fn resolve(&self, backlink: &str) -> Resolved {
        let Some(caps) = BACKLINK_RE.captures(backlink) else {
            return Resolved::failure(backlink, format!("Invalid backlink syntax: {backlink}"));
        };

        let source_type = caps["type"].to_string();
        let target = caps["target"].trim().to_string();
        let heading = caps.name("heading").map(|m| m.as_str().trim().to_string());

        let Some((file_path, is_archived)) = self.resolve_path(&source_type, &target) else {
            return Resolved {
                backlink: backlink.to_string(),
                resolved: false,
                source_type: Some(source_type.clone()),
                target: Some(target.clone()),
                heading: heading.clone(),
                content: None,
                error: Some(format!("Target not found: {source_type}:{target}")),
                archived: false,
            };
        };

        let content = if source_type == "thread" && file_path.is_dir() {
            match self.resolve_thread_dir(&file_path, heading.as_deref()) {
                Some(c) => c,
                None => {
                    return Resolved {
                        backlink: backlink.to_string(),
                        resolved: false,
                        source_type: Some(source_type),
                        target: Some(target.clone()),
                        heading: heading.clone(),
                        content: None,
                        error: Some(format!(
                            "Entry '{}' not found in thread {target}",
                            heading.as_deref().unwrap_or("")
                        )),
                        archived: false,
                    };
                }
            }
        } else if source_type == "knowledge" && file_path.is_dir() {
            match self.resolve_category_dir(&file_path, heading.as_deref()) {
                Some(c) => c,
                None => {
                    return Resolved {
                        backlink: backlink.to_string(),
                        resolved: false,
                        source_type: Some(source_type),
                        target: Some(target.clone()),
                        heading: heading.clone(),
                        content: None,
                        error: Some(format!(
                            "Entry '{}' not found in category {target}",
                            heading.as_deref().unwrap_or("")
                        )),
                        archived: false,
                    };
                }
            }
        } else if let Some(h) = &heading {
            match crate::sectioning::extract_section(&file_path, h, false) {
                Some(c) => c,
                None => {
                    return Resolved {
                        backlink: backlink.to_string(),
                        resolved: false,
                        source_type: Some(source_type),
                        target: Some(target.clone()),
                        heading: heading.clone(),
                        content: None,
                        error: Some(format!("Heading '{h}' not found in {target}")),
                        archived: false,
                    };
                }
            }
        } else {
            match fs::read_to_string(&file_path) {
                Ok(c) => c,
                Err(e) => {
                    return Resolved {
                        backlink: backlink.to_string(),
                        resolved: false,
                        source_type: Some(source_type),
                        target: Some(target),
                        heading: None,
                        content: None,
                        error: Some(e.to_string()),
                        archived: false,
                    };
                }
            }
        };

        Resolved {
            backlink: backlink.to_string(),
            resolved: true,
            source_type: Some(source_type),
            target: Some(target),
            heading,
            content: Some(content.trim().to_string()),
            error: None,
            archived: is_archived,
        }
    }

    /// Resolve every backlink in `backlinks`, preserving order.
    #[must_use]
    pub fn resolve_batch(&self, backlinks: &[String]) -> Vec<Resolved> {
        backlinks.iter().map(|bl| self.resolve(bl)).collect()
    }

    fn resolve_thread_dir(&self, thread_dir: &Path, heading: Option<&str>) -> Option<String> {
        let Ok(entries) = fs::read_dir(thread_dir) else {
            return if heading.is_none() {
                Some(String::new())
            } else {
                None
            };
        };
        let mut entry_files: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(".md"))
            .collect();
        entry_files.sort();
        entry_files.reverse();

        if entry_files.is_empty() {
            return if heading.is_none() {
                Some(String::new())
            } else {
                None
            };
        }

        let Some(heading) = heading else {
            let mut parts = Vec::new();
            for fname in &entry_files {
                let fpath = thread_dir.join(fname);
                let Ok(body) = fs::read_to_string(&fpath) else {
                    continue;
                };
                let entry_heading = filename_to_heading(fname);
                parts.push(format!("## {entry_heading}\n{}", body.trim()));
            }
            return Some(parts.join("\n\n"));
        };

        for fname in &entry_files {
            if filename_to_heading(fname) == heading {
                return fs::read_to_string(thread_dir.join(fname))
                    .ok()
                    .map(|s| s.trim().to_string());
            }
        }
        for fname in &entry_files {
            let stem = fname.trim_end_matches(".md");
            if stem == heading {
                return fs::read_to_string(thread_dir.join(fname))
                    .ok()
                    .map(|s| s.trim().to_string());
            }
        }
        None
    }

    fn resolve_category_dir(&self, category_dir: &Path, heading: Option<&str>) -> Option<String> {
        let Ok(entries) = fs::read_dir(category_dir) else {
            return if heading.is_none() {
                Some(String::new())
            } else {
                None
            };
        };
        let mut entry_files: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(".md") && !SKIP_FILES.contains(&n.as_str()))
            .collect();
        entry_files.sort();

        if entry_files.is_empty() {
            return if heading.is_none() {
                Some(String::new())
            } else {
                None
            };
        }

        let Some(heading) = heading else {
            let mut titles = Vec::new();
            for fname in &entry_files {
                let fpath = category_dir.join(fname);
                let Ok(text) = fs::read_to_string(&fpath) else {
                    continue;
                };
                let first_line = text.lines().next().unwrap_or("").trim();
                if let Some(title) = first_line.strip_prefix("# ") {
                    titles.push(format!("- {title}"));
                } else {
                    titles.push(format!("- {}", fname.trim_end_matches(".md")));
                }
            }
            return Some(titles.join("\n"));
        };

        for fname in &entry_files {
            let fpath = category_dir.join(fname);
            let Ok(content) = fs::read_to_string(&fpath) else {
                continue;
            };
            let first_line = content.lines().next().unwrap_or("").trim();
            if let Some(title) = first_line.strip_prefix("# ") {
                if title.trim() == heading {
                    return Some(content.trim().to_string());
                }
            }
        }
        None
    }

    fn resolve_path(&self, source_type: &str, target: &str) -> Option<(PathBuf, bool)> {
        match source_type {
            "knowledge" => {
                if CATEGORY_DIRS.contains(&target) {
                    let cat_dir = self.knowledge_dir.join(target);
                    if cat_dir.is_dir() {
                        return Some((cat_dir, false));
                    }
                }
                if target.contains('/') {
                    for candidate in [
                        self.knowledge_dir.join(format!("{target}.md")),
                        self.knowledge_dir.join(target),
                    ] {
                        if candidate.is_file() {
                            return Some((candidate, false));
                        }
                    }
                }
                let mut sorted_cats: Vec<&str> = CATEGORY_DIRS.to_vec();
                sorted_cats.sort_unstable();
                for cat_dir in sorted_cats {
                    let candidate = self.knowledge_dir.join(cat_dir).join(format!("{target}.md"));
                    if candidate.is_file() {
                        return Some((candidate, false));
                    }
                }
                for candidate in [
                    self.knowledge_dir.join(format!("{target}.md")),
                    self.knowledge_dir.join(target),
                    self.knowledge_dir.join("domains").join(format!("{target}.md")),
                ] {
                    if candidate.is_file() {
                        return Some((candidate, false));
                    }
                }
                None
            }
            "work" | "plan" => {
                let work_item_dir = self.knowledge_dir.join("_work").join(target);
                if work_item_dir.is_dir() {
                    for fname in ["plan.md", "notes.md"] {
                        let candidate = work_item_dir.join(fname);
                        if candidate.is_file() {
                            return Some((candidate, false));
                        }
                    }
                }
                let archive_dir = self.knowledge_dir.join("_work").join("_archive").join(target);
                if archive_dir.is_dir() {
                    for fname in ["plan.md", "notes.md"] {
                        let candidate = archive_dir.join(fname);
                        if candidate.is_file() {
                            return Some((candidate, true));
                        }
                    }
                }
                None
            }
            "thread" => {
                let thread_dir = self.knowledge_dir.join("_threads").join(target);
                if thread_dir.is_dir() {
                    return Some((thread_dir, false));
                }
                let candidate = self
                    .knowledge_dir
                    .join("_threads")
                    .join(format!("{target}.md"));
                if candidate.is_file() {
                    return Some((candidate, false));
                }
                None
            }
            _ => None,
        }
    }
}

/// Resolve a CLI `read` file argument (e.g. `domains/topic`, `_threads/slug`,
/// a plain name, or an absolute path) to an absolute path under
/// `knowledge_dir`.
#[must_use]
pub fn resolve_read_path(
    knowledge_dir: &Path,
    file_arg: &str,
    source_type: Option<&str>,
) -> Option<PathBuf> {
    let as_path = Path::new(file_arg);
    if as_path.is_absolute() && as_path.is_file() {
        return Some(as_path.to_path_buf());
    }

    let base = file_arg.strip_suffix(".md").unwrap_or(file_arg);

    if source_type == Some("thread") {
        let candidate_dir = knowledge_dir.join("_threads").join(base);
        if candidate_dir.is_dir() {
            return Some(candidate_dir);
        }
        let candidate = knowledge_dir.join("_threads").join(format!("{base}.md"));
        if candidate.is_file() {
            return Some(candidate);
        }
        if let Some(stripped) = base.strip_prefix("_threads/") {
            let candidate_dir = knowledge_dir.join("_threads").join(stripped);
            if candidate_dir.is_dir() {
                return Some(candidate_dir);
            }
            let candidate = knowledge_dir.join(format!("{base}.md"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let mut candidates = Vec::new();
    if base.contains('/') {
        candidates.push(knowledge_dir.join(format!("{base}.md")));
        candidates.push(knowledge_dir.join(base));
    }
    let mut sorted_cats: Vec<&str> = CATEGORY_DIRS.to_vec();
    sorted_cats.sort_unstable();
    for cat_dir in sorted_cats {
        candidates.push(knowledge_dir.join(cat_dir).join(format!("{base}.md")));
    }
    candidates.push(knowledge_dir.join(format!("{base}.md")));
    if !base.ends_with(".md") {
        candidates.push(knowledge_dir.join(base));
    }
    candidates.push(knowledge_dir.join("domains").join(format!("{base}.md")));
    candidates.push(knowledge_dir.join("_threads").join(format!("{base}.md")));

    candidates.into_iter().find(|c| c.is_file())
}
