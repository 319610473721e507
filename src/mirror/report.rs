//! Translating CI and static-analysis reports into diff properties.

use crate::models::reports::{AnalyzeResponse, CiReport};
use serde::{Deserialize, Serialize};

/// Diff property holding unit test results.
pub const UNIT_PROPERTY: &str = "arc:unit";
/// Diff property holding lint results.
pub const LINT_PROPERTY: &str = "arc:lint";

/// Severity attached to every mirrored lint finding.
const LINT_SEVERITY: &str = "warning";

/// One entry of the unit test diff property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProperty {
    pub name: String,
    pub link: String,
    pub result: String,
}

/// One entry of the lint diff property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintProperty {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    pub severity: String,
    pub path: String,
    pub line: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Map a CI status onto a unit test result.
///
/// There is no pending state on the remote side, so anything that is not a
/// definite success or failure is reported as skipped.
pub fn unit_result(status: &str) -> &'static str {
    match status {
        "success" => "pass",
        "failure" => "fail",
        _ => "skip",
    }
}

/// Translate a CI report into the unit test property.
///
/// Reports without a link are not actionable yet and produce nothing. The
/// remote expects a list even though only the latest report is mirrored.
pub fn translate_ci(report: &CiReport) -> Option<Vec<UnitProperty>> {
    if report.url.is_empty() {
        return None;
    }
    Some(vec![UnitProperty {
        name: report.agent.clone(),
        link: report.url.clone(),
        result: unit_result(&report.status).to_string(),
    }])
}

/// Flatten every located finding of the given analyzer responses into the
/// lint property, in order. Produces nothing if no finding has a location.
pub fn translate_lint(responses: &[AnalyzeResponse]) -> Option<Vec<LintProperty>> {
    let properties: Vec<LintProperty> = responses
        .iter()
        .flat_map(|r| &r.notes)
        .filter_map(|note| {
            let location = note.location.as_ref()?;
            let range = location.range.as_ref()?;
            Some(LintProperty {
                code: note.category.clone(),
                severity: LINT_SEVERITY.to_string(),
                path: location.path.clone(),
                line: range.start_line,
                description: note.description.clone(),
            })
        })
        .collect();

    if properties.is_empty() {
        None
    } else {
        Some(properties)
    }
}
