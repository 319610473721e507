//! Request and response shapes of the conduit methods the mirror calls.
//!
//! Conduit is loose about identifiers: the same id may come back as a
//! number in one method and as a string in another, so every id is read
//! through [`flexible_id`] and kept as a string.

use crate::mirror::remote::{RemoteRevision, RevisionStatus};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Differential's status strings for terminal states.
pub const STATUS_CLOSED: &str = "3";
pub const STATUS_ABANDONED: &str = "4";

/// Diff property listing the local commits a diff was built from.
pub const LOCAL_COMMITS_PROPERTY: &str = "local:commits";

/// Accept a JSON string or number as an identifier.
pub fn flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// The `{error, errorMessage, response}` envelope printed by `arc call-conduit`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub response: serde_json::Value,
}

// ==================== differential.query ====================

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commit_hashes: Vec<[String; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferentialReview {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default)]
    pub phid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "flexible_id")]
    pub status: String,
    #[serde(default, rename = "authorPHID")]
    pub author_phid: String,
    #[serde(default)]
    pub reviewers: serde_json::Value,
    #[serde(default)]
    pub hashes: Vec<Vec<String>>,
    #[serde(default)]
    pub diffs: Vec<serde_json::Value>,
}

impl From<DifferentialReview> for RemoteRevision {
    fn from(review: DifferentialReview) -> Self {
        let status = match review.status.as_str() {
            STATUS_CLOSED => RevisionStatus::Closed,
            STATUS_ABANDONED => RevisionStatus::Abandoned,
            _ => RevisionStatus::Open,
        };
        // Reviewers come back as a list, or as an object keyed by PHID.
        let reviewers = match review.reviewers {
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            serde_json::Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        RemoteRevision {
            id: review.id,
            title: review.title,
            status,
            author: review.author_phid,
            reviewers,
            hashes: review
                .hashes
                .into_iter()
                .filter_map(|pair| match pair.as_slice() {
                    [kind, hash] => Some((kind.clone(), hash.clone())),
                    _ => None,
                })
                .collect(),
            diffs: review
                .diffs
                .into_iter()
                .filter_map(|d| match d {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        }
    }
}

// ==================== differential.createrevision ====================

#[derive(Debug, Default, Serialize)]
pub struct RevisionFieldsRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "reviewerPHIDs", skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<String>,
    #[serde(rename = "ccPHIDs", skip_serializing_if = "Vec::is_empty")]
    pub ccs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRevisionRequest {
    pub diffid: u64,
    pub fields: RevisionFieldsRequest,
}

#[derive(Debug, Deserialize)]
pub struct CreateRevisionResponse {
    #[serde(deserialize_with = "flexible_id")]
    pub revisionid: String,
    #[serde(default)]
    pub uri: String,
}

// ==================== differential.updaterevision / close ====================

#[derive(Debug, Serialize)]
pub struct UpdateRevisionRequest {
    pub id: String,
    pub diffid: String,
}

#[derive(Debug, Serialize)]
pub struct CloseRequest {
    #[serde(rename = "revisionID")]
    pub revision_id: u64,
}

// ==================== diffs ====================

#[derive(Debug, Serialize)]
pub struct CreateRawDiffRequest {
    pub diff: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateRawDiffResponse {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Serialize)]
pub struct QueryDiffsRequest {
    pub ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct QueriedDiff {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    /// An object by property name, or an empty list when there are none
    #[serde(default)]
    pub properties: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SetDiffPropertyRequest {
    pub diff_id: u64,
    pub name: String,
    pub data: String,
}

/// One entry of the `local:commits` diff property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCommit {
    pub commit: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub summary: String,
}

/// The newest commit of a `local:commits` set: the one no other commit
/// names as a parent. Ties are broken by commit time, then hash.
pub fn find_last_commit(commits: &BTreeMap<String, LocalCommit>) -> Option<String> {
    commits
        .values()
        .filter(|c| {
            !commits
                .values()
                .any(|other| other.parents.iter().any(|p| *p == c.commit))
        })
        .max_by_key(|c| (c.time.parse::<i64>().unwrap_or_default(), c.commit.clone()))
        .map(|c| c.commit.clone())
}

// ==================== comments ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInlineRequest {
    #[serde(rename = "revisionID")]
    pub revision_id: String,
    #[serde(rename = "diffID")]
    pub diff_id: String,
    pub file_path: String,
    pub line_number: u32,
    pub content: String,
    /// 1 anchors the comment on the new side of the diff
    pub is_new_file: u32,
}

#[derive(Debug, Serialize)]
pub struct CreateCommentRequest {
    pub revision_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub action: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub attach_inlines: bool,
}

#[derive(Debug, Serialize)]
pub struct GetCommentsRequest {
    pub ids: Vec<u64>,
    pub inlines: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevisionInline {
    #[serde(default, rename = "diffID", deserialize_with = "flexible_id")]
    pub diff_id: String,
    #[serde(default, rename = "filePath")]
    pub file_path: String,
    #[serde(default, rename = "lineNumber", deserialize_with = "flexible_id")]
    pub line_number: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevisionComment {
    #[serde(default)]
    pub action: String,
    #[serde(default, rename = "authorPHID")]
    pub author_phid: String,
    #[serde(default, rename = "dateCreated", deserialize_with = "flexible_id")]
    pub date_created: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub inlines: Vec<RevisionInline>,
}

impl RevisionComment {
    /// Resolution state expressed by the comment's action.
    pub fn resolved(&self) -> Option<bool> {
        match self.action.as_str() {
            "accept" => Some(true),
            "reject" => Some(false),
            _ => None,
        }
    }
}

// ==================== users / repositories ====================

#[derive(Debug, Default, Serialize)]
pub struct UserQueryRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub usernames: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub phids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUser {
    pub phid: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub primary_email: Option<String>,
}

impl RemoteUser {
    /// Local identity of the user: the email when visible, else the user name.
    pub fn identity(&self) -> String {
        self.primary_email
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.user_name.clone())
    }
}

#[derive(Debug, Serialize)]
pub struct LookSoonRequest {
    pub callsigns: Vec<String>,
}
