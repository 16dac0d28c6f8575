//! Shared entity types for the retrieval core (`spec.md` §3).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which tree an indexed entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Knowledge,
    Work,
    Thread,
    Source,
}

impl SourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::Work => "work",
            Self::Thread => "thread",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knowledge" => Ok(Self::Knowledge),
            "work" => Ok(Self::Work),
            "thread" => Ok(Self::Thread),
            "source" => Ok(Self::Source),
            other => Err(format!("unknown source_type: {other}")),
        }
    }
}

/// One of the fixed category directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Principles,
    Workflows,
    Conventions,
    Gotchas,
    Abstractions,
    Architecture,
    Domains,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Principles => "principles",
            Self::Workflows => "workflows",
            Self::Conventions => "conventions",
            Self::Gotchas => "gotchas",
            Self::Abstractions => "abstractions",
            Self::Architecture => "architecture",
            Self::Domains => "domains",
        }
    }

    /// Priority rank for the composite-search category tiebreak; lower is
    /// higher priority, matching `config::CATEGORY_PRIORITY`.
    #[must_use]
    pub fn priority(self) -> usize {
        crate::config::category_priority(self.as_str())
    }

    #[must_use]
    pub fn all() -> [Category; 7] {
        [
            Self::Principles,
            Self::Workflows,
            Self::Conventions,
            Self::Gotchas,
            Self::Abstractions,
            Self::Architecture,
            Self::Domains,
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "principles" => Ok(Self::Principles),
            "workflows" => Ok(Self::Workflows),
            "conventions" => Ok(Self::Conventions),
            "gotchas" => Ok(Self::Gotchas),
            "abstractions" => Ok(Self::Abstractions),
            "architecture" => Ok(Self::Architecture),
            "domains" => Ok(Self::Domains),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Confidence level extracted from an entry's metadata comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Drift contribution used as a staleness fallback signal.
    #[must_use]
    pub fn drift_score(self) -> f64 {
        match self {
            Self::High => 0.0,
            Self::Medium => 0.5,
            Self::Low => 1.0,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown confidence: {other}")),
        }
    }
}

/// One searchable unit: identity is `(file_path, heading)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub file_path: String,
    pub heading: String,
    pub content: String,
    pub source_type: SourceType,
    pub category: Option<Category>,
    pub confidence: Option<Confidence>,
    pub learned_date: Option<String>,
}

/// Per-file bookkeeping row used for incremental re-indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_path: String,
    pub mtime: f64,
    pub content_hash: String,
    pub source_type: SourceType,
}

/// The kind of concordance recommendation a row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    SeeAlso,
    RelatedFile,
}

impl ResultType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SeeAlso => "see_also",
            Self::RelatedFile => "related_file",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A precomputed recommendation row stored in `concordance_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcordanceResult {
    pub file_path: String,
    pub heading: String,
    pub similar_path: String,
    pub similar_heading: String,
    pub similarity: f64,
    pub result_type: ResultType,
}

/// An identity key for an entry: `(file_path, heading)`.
pub type EntryKey = (String, String);
