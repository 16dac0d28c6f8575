//! Markdown parsing: splits a file into heading-delimited entries and pulls
//! metadata out of the `<!-- learned: ... -->` comment convention.
//!
//! Ported from `pk_markdown.py::MarkdownParser`.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// One parsed section: a heading and the body text beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub heading: String,
    pub content: String,
}

/// Metadata pulled from an entry's `<!-- learned: ... -->` comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub learned: Option<String>,
    pub confidence: Option<String>,
    pub source: Option<String>,
}

static FRONTMATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\n.*?\n---\n").unwrap());

static H1_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());

static METADATA_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<!--\s*learned:\s*(?P<learned>\S+)\s*\|\s*confidence:\s*(?P<confidence>\S+)(?:\s*\|\s*source:\s*(?P<source>[^-].*?))?\s*-->",
    )
    .unwrap()
});

static HTML_COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

fn strip_frontmatter(text: &str) -> String {
    FRONTMATTER_RE.replace(text, "").into_owned()
}

/// Strip every `<!-- ... -->` HTML comment, including the `learned`/
/// `confidence` metadata comment, from indexed content. Metadata is pulled
/// out separately via [`extract_metadata`] before this runs.
fn strip_html_comments(text: &str) -> String {
    HTML_COMMENT_RE.replace_all(text, "").into_owned()
}

fn heading_regex(level: usize) -> Regex {
    let hashes = "#".repeat(level);
    Regex::new(&format!(r"(?m)^{hashes}[ \t]+(.+)$")).expect("heading regex is well-formed")
}

/// Extract `learned`/`confidence`/`source` from an entry's metadata comment.
#[must_use]
pub fn extract_metadata(text: &str) -> EntryMetadata {
    let Some(caps) = METADATA_COMMENT_RE.captures(text) else {
        return EntryMetadata::default();
    };
    EntryMetadata {
        learned: caps.name("learned").map(|m| m.as_str().trim().to_string()),
        confidence: caps
            .name("confidence")
            .map(|m| m.as_str().trim().to_string()),
        source: caps.name("source").map(|m| m.as_str().trim().to_string()),
    }
}

/// Parse a file-per-entry knowledge file as a single entry, keyed by its H1.
///
/// Content is the file minus YAML frontmatter and HTML comments (the
/// `learned`/`confidence` metadata comment is extracted separately via
/// [`extract_metadata`], not left in indexed content). Falls back to a
/// title-cased version of the filename stem when there is no H1 heading.
/// Returns an empty vec if the file is empty, unreadable, or not valid UTF-8.
#[must_use]
pub fn parse_entry_file(path: &Path) -> Vec<ParsedEntry> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let text = strip_frontmatter(&text);
    let stripped = strip_html_comments(&text);
    let content = stripped.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let heading = H1_RE
        .captures(&text)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| filename_title(path));

    vec![ParsedEntry {
        heading,
        content: content.to_string(),
    }]
}

fn filename_title(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled");
    stem.replace('-', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a markdown file into heading-delimited entries at the given heading
/// level (`"##"` for threads, `"###"` for knowledge/work). Frontmatter and
/// HTML comments are stripped before splitting. If no heading at that level
/// is found, the whole file becomes a single `(ungrouped)` entry.
#[must_use]
pub fn parse_file(path: &Path, heading_level: usize) -> Vec<ParsedEntry> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let text = strip_frontmatter(&text);
    let text = strip_html_comments(&text);
    let heading_re = heading_regex(heading_level);
    let matches: Vec<_> = heading_re.captures_iter(&text).collect();

    if matches.is_empty() {
        let content = text.trim();
        if content.is_empty() {
            return Vec::new();
        }
        return vec![ParsedEntry {
            heading: "(ungrouped)".to_string(),
            content: content.to_string(),
        }];
    }

    let mut entries = Vec::with_capacity(matches.len());
    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).unwrap();
        let heading = caps[1].trim().to_string();
        let start = whole.end();
        let end = matches
            .get(i + 1)
            .map(|next| next.get(0).unwrap().start())
            .unwrap_or(text.len());
        let content = text[start..end].trim().to_string();
        entries.push(ParsedEntry { heading, content });
    }
    entries
}
