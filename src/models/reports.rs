//! Continuous-integration and static-analysis report records.
//!
//! CI reports live in `refs/notes/devtools/ci` and analysis reports in
//! `refs/notes/devtools/analyses`, one JSON record per note line.

use super::FORMAT_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Records that carry an orderable timestamp and a format version.
pub trait Report {
    /// Timestamp token of the record.
    fn timestamp(&self) -> &str;

    /// Format version of the record.
    fn version(&self) -> u32;
}

/// Result of a continuous-integration run against a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiReport {
    #[serde(default)]
    pub timestamp: String,

    /// Link to the build results
    #[serde(default)]
    pub url: String,

    /// "success", "failure", or anything else for pending/unknown
    #[serde(default)]
    pub status: String,

    /// Name of the CI system that produced the report
    #[serde(default)]
    pub agent: String,

    #[serde(default, rename = "v")]
    pub version: u32,
}

impl Report for CiReport {
    fn timestamp(&self) -> &str {
        &self.timestamp
    }

    fn version(&self) -> u32 {
        self.version
    }
}

/// Pointer to a static-analysis result document for a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysesReport {
    #[serde(default)]
    pub timestamp: String,

    /// Where the lint result document can be fetched
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, rename = "v")]
    pub version: u32,
}

impl Report for AnalysesReport {
    fn timestamp(&self) -> &str {
        &self.timestamp
    }

    fn version(&self) -> u32 {
        self.version
    }
}

/// Line range of a lint finding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintRange {
    #[serde(default)]
    pub start_line: u32,
}

/// File location of a lint finding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintLocation {
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub range: Option<LintRange>,
}

/// One lint finding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintNote {
    #[serde(default)]
    pub location: Option<LintLocation>,

    /// Analyzer-specific category, used as the lint code
    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: String,
}

/// Findings produced by one analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(default, rename = "note")]
    pub notes: Vec<LintNote>,
}

/// The document an analyses report's `url` points at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintDocument {
    #[serde(default)]
    pub analyze_response: Vec<AnalyzeResponse>,
}

/// Parse every note line into `T`, keeping only well-formed records of the current version.
pub fn parse_all_valid<T: Report + DeserializeOwned>(lines: &[String]) -> Vec<T> {
    lines
        .iter()
        .filter_map(|line| serde_json::from_str::<T>(line.trim()).ok())
        .filter(|r| r.version() == FORMAT_VERSION)
        .collect()
}

/// Compare two timestamp tokens, numerically when both are integers.
pub fn compare_timestamps(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Pick the most recent record. On equal timestamps the one written last wins.
pub fn latest_report<T: Report>(reports: &[T]) -> Option<&T> {
    reports.iter().fold(None, |best: Option<&T>, r| match best {
        Some(b) if compare_timestamps(r.timestamp(), b.timestamp()).is_lt() => Some(b),
        _ => Some(r),
    })
}
