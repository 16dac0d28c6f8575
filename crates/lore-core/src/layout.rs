//! Corpus enumeration: walks a knowledge directory and classifies every
//! indexable markdown file by [`SourceType`] (`pk_search.py::_collect_md_files`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::config::{
    CATEGORY_DIRS, REPO_SKIP_DIRS, SKIP_DIRS, SKIP_FILES, SOURCE_FILE_MAX_BYTES,
};
use crate::models::SourceType;

/// One indexable file discovered under the knowledge directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub source_type: SourceType,
}

#[derive(Debug, Deserialize, Default)]
struct ThreadIndex {
    #[serde(default = "default_thread_format")]
    thread_format_version: u32,
}

fn default_thread_format() -> u32 {
    1
}

/// Walk the knowledge directory and return every indexable file, sorted by
/// path for deterministic indexing order.
#[must_use]
pub fn collect_md_files(knowledge_dir: &Path) -> Vec<DiscoveredFile> {
    let mut results = Vec::new();

    for cat_dir in CATEGORY_DIRS {
        let cat_path = knowledge_dir.join(cat_dir);
        if !cat_path.is_dir() {
            continue;
        }
        walk_category(&cat_path, &mut results);
    }

    let work_dir = knowledge_dir.join("_work");
    if work_dir.is_dir() {
        collect_work_items(&work_dir, &mut results);
        let archive_dir = work_dir.join("_archive");
        if archive_dir.is_dir() {
            collect_work_items(&archive_dir, &mut results);
        }
    }

    let threads_dir = knowledge_dir.join("_threads");
    if threads_dir.is_dir() {
        collect_threads(&threads_dir, &mut results);
    }

    results.sort_by(|a, b| a.path.cmp(&b.path));
    results
}

/// Walk `repo_root` for plain-text source files, excluding the knowledge
/// directory itself and common VCS/build/dependency directories. Each file
/// becomes one whole-file entry tagged [`SourceType::Source`].
#[must_use]
pub fn collect_source_files(repo_root: &Path, knowledge_dir: &Path) -> Vec<DiscoveredFile> {
    let mut results = Vec::new();
    let canonical_kd = knowledge_dir.canonicalize().ok();

    let walker = WalkDir::new(repo_root).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() {
            let Some(name) = entry.file_name().to_str() else {
                return false;
            };
            if SKIP_DIRS.contains(&name) || REPO_SKIP_DIRS.contains(&name) {
                return false;
            }
            if let Some(canonical_kd) = &canonical_kd {
                if entry.path().canonicalize().ok().as_ref() == Some(canonical_kd) {
                    return false;
                }
            }
        }
        true
    });

    for entry in walker.filter_map(|r| r.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.len() > SOURCE_FILE_MAX_BYTES {
            continue;
        }
        if fs::read_to_string(entry.path()).is_err() {
            continue;
        }
        results.push(DiscoveredFile {
            path: entry.into_path(),
            source_type: SourceType::Source,
        });
    }

    results.sort_by(|a, b| a.path.cmp(&b.path));
    results
}

fn walk_category(cat_path: &Path, results: &mut Vec<DiscoveredFile>) {
    let walker = WalkDir::new(cat_path).into_iter().filter_entry(|entry| {
        if entry.file_type().is_dir() {
            entry
                .file_name()
                .to_str()
                .map(|n| !SKIP_DIRS.contains(&n))
                .unwrap_or(true)
        } else {
            true
        }
    });

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(fname) = entry.file_name().to_str() else {
            continue;
        };
        if !fname.ends_with(".md") || SKIP_FILES.contains(&fname) {
            continue;
        }
        results.push(DiscoveredFile {
            path: entry.into_path(),
            source_type: SourceType::Knowledge,
        });
    }
}

fn collect_work_items(work_dir: &Path, results: &mut Vec<DiscoveredFile>) {
    let Ok(entries) = fs::read_dir(work_dir) else {
        return;
    };
    let mut item_names: Vec<_> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name != "_archive")
        .collect();
    item_names.sort();

    for item_name in item_names {
        let item_path = work_dir.join(&item_name);
        for fname in ["plan.md", "notes.md"] {
            let fpath = item_path.join(fname);
            if fpath.is_file() {
                results.push(DiscoveredFile {
                    path: fpath,
                    source_type: SourceType::Work,
                });
            }
        }
    }
}

fn detect_thread_format(threads_dir: &Path) -> u32 {
    let index_json = threads_dir.join("_index.json");
    let Ok(text) = fs::read_to_string(index_json) else {
        return 1;
    };
    serde_json::from_str::<ThreadIndex>(&text)
        .map(|idx| idx.thread_format_version)
        .unwrap_or(1)
}

fn collect_threads(threads_dir: &Path, results: &mut Vec<DiscoveredFile>) {
    if detect_thread_format(threads_dir) >= 2 {
        let Ok(entries) = fs::read_dir(threads_dir) else {
            return;
        };
        let mut dir_names: Vec<_> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.') && !name.starts_with('_'))
            .collect();
        dir_names.sort();

        for entry_name in dir_names {
            let entry_path = threads_dir.join(&entry_name);
            let Ok(files) = fs::read_dir(&entry_path) else {
                continue;
            };
            let mut fnames: Vec<_> = files
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|n| n.ends_with(".md"))
                .collect();
            fnames.sort();
            for fname in fnames {
                let fpath = entry_path.join(fname);
                if fpath.is_file() {
                    results.push(DiscoveredFile {
                        path: fpath,
                        source_type: SourceType::Thread,
                    });
                }
            }
        }
    } else {
        let Ok(entries) = fs::read_dir(threads_dir) else {
            return;
        };
        let mut fnames: Vec<_> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(".md"))
            .filter(|n| !SKIP_FILES.contains(&n.as_str()) && !n.starts_with('_'))
            .collect();
        fnames.sort();
        for fname in fnames {
            let fpath = threads_dir.join(fname);
            if fpath.is_file() {
                results.push(DiscoveredFile {
                    path: fpath,
                    source_type: SourceType::Thread,
                });
            }
        }
    }
}

/// SHA-256 hash of a file's contents, or an empty string if it can't be read.
#[must_use]
pub fn file_hash(path: &Path) -> String {
    use sha2::{Digest, Sha256};

    let Ok(bytes) = fs::read(path) else {
        return String::new();
    };
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Whether `path` lives directly under a category directory (a file-per-entry
/// knowledge file, as opposed to a `_work`/`_threads` file).
#[must_use]
pub fn is_entry_file(knowledge_dir: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(knowledge_dir) else {
        return false;
    };
    let mut components = rel.components();
    match components.next().and_then(|c| c.as_os_str().to_str()) {
        Some(first) if CATEGORY_DIRS.contains(&first) => components.next().is_some(),
        _ => false,
    }
}

/// Whether `path` is a v2 thread entry file (`_threads/<slug>/<date>.md`).
#[must_use]
pub fn is_thread_entry_file(knowledge_dir: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(knowledge_dir) else {
        return false;
    };
    let mut components = rel.components();
    let first = components.next().and_then(|c| c.as_os_str().to_str());
    first == Some("_threads") && components.next().is_some() && components.next().is_some()
}

/// Extract the category name from a knowledge file's path, if any.
#[must_use]
pub fn extract_category(knowledge_dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(knowledge_dir).ok()?;
    let mut components = rel.components();
    let first = components.next()?.as_os_str().to_str()?;
    if CATEGORY_DIRS.contains(&first) && components.next().is_some() {
        Some(first.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collect_source_files_skips_knowledge_dir_and_build_dirs() {
        let repo = tempfile::tempdir().unwrap();
        let kd = repo.path().join("knowledge");
        fs::create_dir_all(&kd).unwrap();
        fs::write(kd.join("notes.md"), "# notes").unwrap();

        fs::write(repo.path().join("main.rs"), "fn main() {}").unwrap();
        let target = repo.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("build.rs"), "junk").unwrap();

        let files = collect_source_files(repo.path(), &kd);
        let paths: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert!(paths.contains(&"main.rs".to_string()));
        assert!(!paths.contains(&"build.rs".to_string()));
        assert!(!paths.contains(&"notes.md".to_string()));
        assert!(files.iter().all(|f| f.source_type == SourceType::Source));
    }

    #[test]
    fn collect_source_files_skips_oversized_files() {
        let repo = tempfile::tempdir().unwrap();
        let kd = repo.path().join("knowledge");
        fs::create_dir_all(&kd).unwrap();

        let big = "x".repeat(usize::try_from(SOURCE_FILE_MAX_BYTES).unwrap() + 1);
        fs::write(repo.path().join("big.txt"), big).unwrap();
        fs::write(repo.path().join("small.txt"), "hello").unwrap();

        let files = collect_source_files(repo.path(), &kd);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"small.txt".to_string()));
        assert!(!names.contains(&"big.txt".to_string()));
    }
}
