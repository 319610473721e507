//! Fetching the lint result document an analyses report points at.

use crate::models::reports::{AnalysesReport, AnalyzeResponse, LintDocument};
use crate::{Error, Result};
use std::fs;
use std::time::Duration;

/// Load the analyzer responses referenced by `report`.
///
/// `http://` and `https://` URLs are fetched; anything else is read as a
/// local path, with an optional `file://` prefix. An empty URL yields no
/// responses. HTTP fetches give up after `timeout`.
pub fn load_lint_results(
    report: &AnalysesReport,
    timeout: Duration,
) -> Result<Vec<AnalyzeResponse>> {
    let url = report.url.trim();
    if url.is_empty() {
        return Ok(Vec::new());
    }

    let document: LintDocument = if url.starts_with("http://") || url.starts_with("https://") {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        agent
            .get(url)
            .set("Accept", "application/json")
            .call()
            .map_err(|e| Error::Http(format!("GET {}: {}", url, e)))?
            .into_json()
            .map_err(|e| Error::Http(format!("Failed to parse lint report {}: {}", url, e)))?
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        serde_json::from_str(&fs::read_to_string(path)?)?
    };

    Ok(document.analyze_response)
}
