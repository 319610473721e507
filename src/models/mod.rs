//! Data models for locally stored review metadata.
//!
//! These mirror the JSON records kept in git notes under `refs/notes/devtools/*`:
//! - `Request` - A review request attached to the first commit of a change
//! - `Comment` - A single review comment (optionally anchored to a file location)
//! - `CommentThread` - A comment plus the replies made to it
//!
//! Report records (CI and static analysis) live in [`reports`].

pub mod reports;

use serde::{Deserialize, Serialize};

/// Format version written into every record. Records with any other version are ignored.
pub const FORMAT_VERSION: u32 = 0;

/// A line range inside a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    /// First line of the range (1-based)
    #[serde(default)]
    pub start_line: u32,
}

/// Where a comment is anchored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Commit the comment refers to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,

    /// File path, empty for whole-commit comments
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Optional line range within the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

impl Location {
    /// Whether this location points at a file rather than the whole change.
    pub fn is_inline(&self) -> bool {
        !self.path.is_empty()
    }

    /// Line to anchor an inline comment on; defaults to the first line.
    pub fn start_line(&self) -> u32 {
        self.range
            .as_ref()
            .map(|r| r.start_line)
            .filter(|line| *line > 0)
            .unwrap_or(1)
    }
}

/// A single review comment.
///
/// Comments are immutable once written; replies are new comments whose
/// `parent` names the hash of the comment they answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Orderable timestamp token (seconds since the epoch, as a string)
    #[serde(default)]
    pub timestamp: String,

    /// Author identity (usually an email address)
    #[serde(default)]
    pub author: String,

    /// Hash of the comment this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Anchor of the comment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Free-text body
    #[serde(default)]
    pub description: String,

    /// Tri-state resolution flag: absent, accepted (true) or rejected (false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,

    /// Record format version
    #[serde(default, rename = "v")]
    pub version: u32,
}

impl Comment {
    /// Serialize the comment as a single note line.
    pub fn to_note(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// File location of an inline comment, if it has one.
    pub fn inline_location(&self) -> Option<&Location> {
        self.location.as_ref().filter(|l| l.is_inline())
    }
}

/// A comment and the replies made to it, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentThread {
    /// Identity hash of the root comment's note line
    pub hash: String,

    /// The root comment
    pub comment: Comment,

    /// Replies, each itself a thread
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CommentThread>,
}

impl CommentThread {
    /// Wrap a comment with no replies.
    pub fn leaf(comment: Comment) -> Self {
        Self {
            hash: String::new(),
            comment,
            children: Vec::new(),
        }
    }

    /// Iterate over this thread's comments, parent before children.
    pub fn comments(&self) -> Vec<&Comment> {
        let mut out = vec![&self.comment];
        for child in &self.children {
            out.extend(child.comments());
        }
        out
    }
}

/// Flatten a forest of threads into its comments, parent before children.
pub fn flatten_threads(threads: &[CommentThread]) -> Vec<&Comment> {
    threads.iter().flat_map(|t| t.comments()).collect()
}

/// A review request as stored in `refs/notes/devtools/reviews`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Orderable timestamp token
    #[serde(default)]
    pub timestamp: String,

    /// Ref holding the change under review (e.g. refs/heads/feature)
    #[serde(default)]
    pub review_ref: String,

    /// Ref the change should land on (e.g. refs/heads/master)
    #[serde(default)]
    pub target_ref: String,

    /// Identity of whoever asked for the review
    #[serde(default)]
    pub requester: String,

    /// Identities asked to review
    #[serde(default)]
    pub reviewers: Vec<String>,

    /// Free-text description; the first line doubles as the title
    #[serde(default)]
    pub description: String,

    /// Explicit base commit, when the author pinned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,

    /// Record format version
    #[serde(default, rename = "v")]
    pub version: u32,
}
