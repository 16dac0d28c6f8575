//! Builds and maintains the FTS5 index over a knowledge directory.
//!
//! Ported from `pk_search.py::Indexer`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::concordance::Concordance;
use crate::config::DB_FILENAME;
use crate::error::Result;
use crate::layout::{self, DiscoveredFile};
use crate::markdown::{self, EntryMetadata};
use crate::models::SourceType;
use crate::schema;

/// Outcome of a full [`Indexer::index_all`] pass.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub total_entries: usize,
    pub elapsed_seconds: f64,
}

/// Outcome of an [`Indexer::incremental_index`] pass.
#[derive(Debug, Clone, Serialize)]
pub struct IncrementalStats {
    pub files_reindexed: usize,
    pub files_removed: usize,
    pub entries_added: usize,
    pub elapsed_seconds: f64,
}

/// Builds and maintains the FTS5 index for one knowledge directory.
pub struct Indexer {
    knowledge_dir: PathBuf,
    db_path: PathBuf,
    repo_root: Option<PathBuf>,
}

impl Indexer {
    #[must_use]
    pub fn new(knowledge_dir: impl Into<PathBuf>) -> Self {
        let knowledge_dir = knowledge_dir.into();
        let db_path = knowledge_dir.join(DB_FILENAME);
        Indexer {
            knowledge_dir,
            db_path,
            repo_root: None,
        }
    }

    /// Also index plain-text source files under `repo_root`, tagged
    /// [`SourceType::Source`], so `Concordance::suggest_related_files` has
    /// something to recommend.
    #[must_use]
    pub fn with_repo_root(mut self, repo_root: impl Into<PathBuf>) -> Self {
        self.repo_root = Some(repo_root.into());
        self
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn knowledge_dir(&self) -> &Path {
        &self.knowledge_dir
    }

    fn collect_md_files(&self) -> Vec<DiscoveredFile> {
        let mut files = layout::collect_md_files(&self.knowledge_dir);
        if let Some(repo_root) = &self.repo_root {
            files.extend(layout::collect_source_files(repo_root, &self.knowledge_dir));
        }
        files
    }

    /// Heading level to split on for a given source type: threads split on
    /// `##`, everything else on `###`.
    fn heading_level(source_type: SourceType) -> usize {
        match source_type {
            SourceType::Thread => 2,
            _ => 3,
        }
    }

    fn index_file(&self, conn: &Connection, path: &Path, source_type: SourceType) -> Result<usize> {
        conn.execute(
            "DELETE FROM entries WHERE file_path = ?1",
            [path.to_string_lossy().to_string()],
        )?;

        let entries = if source_type == SourceType::Source {
            match std::fs::read_to_string(path) {
                Ok(content) if !content.trim().is_empty() => {
                    let fname = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    vec![markdown::ParsedEntry {
                        heading: fname.to_string(),
                        content: content.trim().to_string(),
                    }]
                }
                _ => Vec::new(),
            }
        } else if source_type == SourceType::Knowledge
            && layout::is_entry_file(&self.knowledge_dir, path)
        {
            markdown::parse_entry_file(path)
        } else if source_type == SourceType::Thread
            && layout::is_thread_entry_file(&self.knowledge_dir, path)
        {
            match std::fs::read_to_string(path) {
                Ok(content) if !content.trim().is_empty() => {
                    let fname = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    vec![markdown::ParsedEntry {
                        heading: crate::resolver::filename_to_heading(fname),
                        content: content.trim().to_string(),
                    }]
                }
                _ => Vec::new(),
            }
        } else {
            markdown::parse_file(path, Self::heading_level(source_type))
        };

        let category = if source_type == SourceType::Knowledge {
            layout::extract_category(&self.knowledge_dir, path)
        } else {
            None
        };

        let metadata = if source_type == SourceType::Knowledge {
            std::fs::read_to_string(path)
                .map(|text| markdown::extract_metadata(&text))
                .unwrap_or_default()
        } else {
            EntryMetadata::default()
        };

        let path_str = path.to_string_lossy().to_string();
        for entry in &entries {
            conn.execute(
                "INSERT INTO entries (file_path, heading, content, source_type, category, confidence, learned_date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    path_str,
                    entry.heading,
                    entry.content,
                    source_type.as_str(),
                    category,
                    metadata.confidence,
                    metadata.learned,
                ],
            )?;
        }

        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let content_hash = layout::file_hash(path);
        conn.execute(
            "INSERT OR REPLACE INTO file_meta (file_path, mtime, content_hash, source_type) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![path_str, mtime, content_hash, source_type.as_str()],
        )?;

        Ok(entries.len())
    }

    /// Full index of every markdown file. Rebuilds the database if it is
    /// missing, corrupt, at the wrong schema version, or `force` is set.
    pub fn index_all(&self, force: bool) -> Result<IndexStats> {
        if !self.knowledge_dir.is_dir() {
            return Err(crate::Error::DirectoryNotFound(
                self.knowledge_dir.display().to_string(),
            ));
        }

        let start = Instant::now();
        let conn = if force || !self.db_path.exists() {
            schema::rebuild(&self.db_path)?
        } else {
            schema::open_or_rebuild(&self.db_path)?
        };

        if force {
            conn.execute("DELETE FROM entries", [])?;
            conn.execute("DELETE FROM file_meta", [])?;
        }

        let md_files = self.collect_md_files();
        let mut total_entries = 0;
        let mut files_indexed = 0;
        for file in &md_files {
            total_entries += self.index_file(&conn, &file.path, file.source_type)?;
            files_indexed += 1;
        }

        let existing_paths: HashSet<String> = md_files
            .iter()
            .map(|f| f.path.to_string_lossy().to_string())
            .collect();
        let mut stmt = conn.prepare("SELECT file_path FROM file_meta")?;
        let stale_paths: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .filter(|fp: &String| !existing_paths.contains(fp))
            .collect();
        drop(stmt);
        for fp in stale_paths {
            conn.execute("DELETE FROM file_meta WHERE file_path = ?1", [&fp])?;
            conn.execute("DELETE FROM entries WHERE file_path = ?1", [&fp])?;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        conn.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('last_indexed', ?1)",
            [now.to_string()],
        )?;

        drop(conn);
        Concordance::new(&self.db_path).build_vectors(None)?;

        let elapsed = start.elapsed().as_secs_f64();
        info!(files_indexed, total_entries, "full index complete");
        Ok(IndexStats {
            files_indexed,
            total_entries,
            elapsed_seconds: elapsed,
        })
    }

    fn current_file_meta(&self, conn: &Connection) -> Result<std::collections::HashMap<String, (f64, String)>> {
        let mut stmt = conn.prepare("SELECT file_path, mtime, content_hash FROM file_meta")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, (row.get::<_, f64>(1)?, row.get::<_, String>(2)?)))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn is_stale(path: &Path, stored: Option<&(f64, String)>) -> bool {
        let Some((stored_mtime, stored_hash)) = stored else {
            return true;
        };
        let Ok(current_mtime) = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|t| {
                t.duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64()
            })
        else {
            return true;
        };
        if (current_mtime - stored_mtime).abs() <= 0.01 {
            return false;
        }
        layout::file_hash(path) != *stored_hash
    }

    /// Files that differ from the database's `file_meta` snapshot: new,
    /// modified, or deleted.
    pub fn get_stale_files(&self) -> Result<Vec<DiscoveredFile>> {
        let md_files = self.collect_md_files();
        if !self.db_path.exists() {
            return Ok(md_files);
        }
        let conn = match schema::connect(&self.db_path) {
            Ok(c) if schema::is_valid(&c) => c,
            _ => return Ok(md_files),
        };

        let meta_rows = self.current_file_meta(&conn)?;
        let existing_paths: HashSet<String> = md_files
            .iter()
            .map(|f| f.path.to_string_lossy().to_string())
            .collect();

        let mut stale = Vec::new();
        for file in &md_files {
            let key = file.path.to_string_lossy().to_string();
            if Self::is_stale(&file.path, meta_rows.get(&key)) {
                stale.push(file.clone());
            }
        }
        for (fp, _) in &meta_rows {
            if !existing_paths.contains(fp) {
                stale.push(DiscoveredFile {
                    path: PathBuf::from(fp),
                    source_type: SourceType::Knowledge,
                });
            }
        }
        Ok(stale)
    }

    /// Re-index only files that are new, changed, or deleted since the last
    /// index. Falls back to a full (forced) index if the database is
    /// missing or invalid.
    pub fn incremental_index(&self) -> Result<IncrementalStats> {
        if !self.knowledge_dir.is_dir() {
            return Err(crate::Error::DirectoryNotFound(
                self.knowledge_dir.display().to_string(),
            ));
        }
        if !self.db_path.exists() {
            let full = self.index_all(false)?;
            return Ok(IncrementalStats {
                files_reindexed: full.files_indexed,
                files_removed: 0,
                entries_added: full.total_entries,
                elapsed_seconds: full.elapsed_seconds,
            });
        }

        let conn = match schema::connect(&self.db_path) {
            Ok(c) if schema::is_valid(&c) => c,
            _ => {
                let full = self.index_all(true)?;
                return Ok(IncrementalStats {
                    files_reindexed: full.files_indexed,
                    files_removed: 0,
                    entries_added: full.total_entries,
                    elapsed_seconds: full.elapsed_seconds,
                });
            }
        };

        let start = Instant::now();
        let md_files = self.collect_md_files();
        let existing_paths: HashSet<String> = md_files
            .iter()
            .map(|f| f.path.to_string_lossy().to_string())
            .collect();
        let meta_rows = self.current_file_meta(&conn)?;

        let mut files_reindexed = 0;
        let mut files_removed = 0;
        let mut entries_added = 0;

        for file in &md_files {
            let key = file.path.to_string_lossy().to_string();
            if Self::is_stale(&file.path, meta_rows.get(&key)) {
                entries_added += self.index_file(&conn, &file.path, file.source_type)?;
                files_reindexed += 1;
                debug!(path = %file.path.display(), "reindexed");
            }
        }

        for fp in meta_rows.keys() {
            if !existing_paths.contains(fp) {
                conn.execute("DELETE FROM entries WHERE file_path = ?1", [fp])?;
                conn.execute("DELETE FROM file_meta WHERE file_path = ?1", [fp])?;
                files_removed += 1;
            }
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        conn.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('last_indexed', ?1)",
            [now.to_string()],
        )?;

        drop(conn);
        if files_reindexed > 0 || files_removed > 0 {
            Concordance::new(&self.db_path).build_vectors(None)?;
        }

        let elapsed = start.elapsed().as_secs_f64();
        info!(files_reindexed, files_removed, entries_added, "incremental index complete");
        Ok(IncrementalStats {
            files_reindexed,
            files_removed,
            entries_added,
            elapsed_seconds: elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_corpus() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("principles")).unwrap();
        fs::write(
            dir.path().join("principles/one.md"),
            "# First Principle\n\n<!-- learned: 2026-01-01 | confidence: high -->\nBody text about caching.\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn index_all_indexes_knowledge_files() {
        let dir = setup_corpus();
        let indexer = Indexer::new(dir.path());
        let stats = indexer.index_all(false).unwrap();
        assert_eq!(stats.files_indexed, 1);
        assert_eq!(stats.total_entries, 1);
        assert!(indexer.db_path().exists());
    }

    #[test]
    fn incremental_index_skips_unchanged_files() {
        let dir = setup_corpus();
        let indexer = Indexer::new(dir.path());
        indexer.index_all(false).unwrap();
        let stats = indexer.incremental_index().unwrap();
        assert_eq!(stats.files_reindexed, 0);
        assert_eq!(stats.files_removed, 0);
    }

    #[test]
    fn incremental_index_picks_up_new_files() {
        let dir = setup_corpus();
        let indexer = Indexer::new(dir.path());
        indexer.index_all(false).unwrap();

        fs::write(
            dir.path().join("principles/two.md"),
            "# Second Principle\n\nMore body text.\n",
        )
        .unwrap();
        let stats = indexer.incremental_index().unwrap();
        assert_eq!(stats.files_reindexed, 1);
    }

    #[test]
    fn incremental_index_removes_deleted_files() {
        let dir = setup_corpus();
        let indexer = Indexer::new(dir.path());
        indexer.index_all(false).unwrap();

        fs::remove_file(dir.path().join("principles/one.md")).unwrap();
        let stats = indexer.incremental_index().unwrap();
        assert_eq!(stats.files_removed, 1);
    }

    #[test]
    fn missing_directory_errors() {
        let indexer = Indexer::new("/nonexistent/path/for/lore/tests");
        assert!(indexer.index_all(false).is_err());
    }

    #[test]
    fn with_repo_root_indexes_source_files_as_whole_entries() {
        let repo = tempdir().unwrap();
        fs::create_dir_all(repo.path().join("knowledge/principles")).unwrap();
        fs::write(
            repo.path().join("knowledge/principles/one.md"),
            "# First Principle\n\nBody text.\n",
        )
        .unwrap();
        fs::write(
            repo.path().join("lib.rs"),
            "pub fn cached_lookup() -> u32 { 42 }\n",
        )
        .unwrap();

        let indexer =
            Indexer::new(repo.path().join("knowledge")).with_repo_root(repo.path());
        let stats = indexer.index_all(false).unwrap();
        assert_eq!(stats.files_indexed, 2);

        let conn = Connection::open(indexer.db_path()).unwrap();
        let heading: String = conn
            .query_row(
                "SELECT heading FROM entries WHERE source_type = 'source'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(heading, "lib.rs");
    }
}
