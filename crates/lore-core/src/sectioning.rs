//! Extract a single section from a markdown file by heading name.
//!
//! Ported from `extract_section.py`; used by the resolver to satisfy
//! `[[type:target#heading]]` backlinks that point at a sub-section rather
//! than a whole file.

use std::fs;
use std::path::Path;

fn heading_level(line: &str) -> usize {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return 0;
    }
    match line.as_bytes().get(hashes) {
        Some(b' ') | Some(b'\t') => hashes,
        _ => 0,
    }
}

fn heading_text(line: &str) -> String {
    line.trim_start_matches('#').trim().to_string()
}

/// Extract a section (heading line through the next heading of equal or
/// higher level, or EOF) from `path`. Heading matching is a case-insensitive
/// substring match unless `exact` is set.
#[must_use]
pub fn extract_section(path: &Path, heading_name: &str, exact: bool) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    if text.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let search = heading_name.trim();

    let mut start_idx = None;
    let mut start_level = 0;
    for (i, line) in lines.iter().enumerate() {
        let level = heading_level(line);
        if level == 0 {
            continue;
        }
        let text_here = heading_text(line);
        let matched = if exact {
            text_here == search
        } else {
            text_here.to_lowercase().contains(&search.to_lowercase())
        };
        if matched {
            start_idx = Some(i);
            start_level = level;
            break;
        }
    }

    let start_idx = start_idx?;
    let mut end_idx = lines.len();
    for (i, line) in lines.iter().enumerate().skip(start_idx + 1) {
        let level = heading_level(line);
        if level > 0 && level <= start_level {
            end_idx = i;
            break;
        }
    }

    let section: String = lines[start_idx..end_idx].concat();
    Some(section.trim_end_matches('\n').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_md(text: &str) -> NamedTempFile {
        let mut f = NamedTempFile::with_suffix(".md").unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn extracts_matching_section() {
        let f = write_md("# Title\n## Naming Patterns\nbody one\n## Other\nbody two\n");
        let section = extract_section(f.path(), "naming", false).unwrap();
        assert!(section.starts_with("## Naming Patterns"));
        assert!(section.contains("body one"));
        assert!(!section.contains("body two"));
    }

    #[test]
    fn stops_at_equal_or_higher_level() {
        let f = write_md("## A\ntext\n### Sub\nsub text\n## B\nmore\n");
        let section = extract_section(f.path(), "A", true).unwrap();
        assert!(section.contains("Sub"));
        assert!(!section.contains("more"));
    }

    #[test]
    fn missing_heading_returns_none() {
        let f = write_md("## Something\nbody\n");
        assert!(extract_section(f.path(), "nope", false).is_none());
    }
}
