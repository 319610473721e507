//! The remote review tool as seen by the reconciliation engine.
//!
//! Two seams live here:
//! - [`RemoteApi`] - the primitive, synchronous operations of the remote
//!   tool (query, create/update/close revisions, create diffs, post
//!   comments). The `arcanist` module implements it.
//! - [`ReviewTool`] - what the sync loop drives per repository. The
//!   [`DiffReconciler`](super::reconcile::DiffReconciler) implements it on
//!   top of any `RemoteApi`.

use crate::models::Comment;
use crate::review::Review;
use crate::storage::Repo;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hash kind the remote uses for commit hashes (as opposed to trees or blobs).
pub const COMMIT_HASH_KIND: &str = "gtcm";

/// Lifecycle state of a remote revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionStatus {
    #[default]
    Open,
    Closed,
    Abandoned,
}

impl RevisionStatus {
    /// Closed and abandoned revisions are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Abandoned)
    }
}

/// The remote tool's view of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRevision {
    pub id: String,
    pub title: String,
    pub status: RevisionStatus,
    pub author: String,
    pub reviewers: Vec<String>,
    /// (hash kind, hash value) pairs for every object ever attached
    pub hashes: Vec<(String, String)>,
    /// Diff identifiers, oldest first
    pub diffs: Vec<String>,
}

impl RemoteRevision {
    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Every commit hash attached to the revision.
    pub fn commit_hashes(&self) -> impl Iterator<Item = &str> {
        self.hashes
            .iter()
            .filter(|(kind, _)| kind == COMMIT_HASH_KIND)
            .map(|(_, hash)| hash.as_str())
    }

    /// Whether `commit` is attached to the revision.
    pub fn contains_commit(&self, commit: &str) -> bool {
        self.commit_hashes().any(|h| h == commit)
    }

    /// The oldest attached commit that exists locally.
    ///
    /// Commits are ordered by commit time; among equally old commits the one
    /// listed last wins. Commits that are unknown locally or have an
    /// unreadable timestamp are ignored.
    pub fn first_commit(&self, repo: &dyn Repo) -> Option<String> {
        let mut oldest: Option<(i64, &str)> = None;
        for commit in self.commit_hashes() {
            if repo.last_parent(commit).is_err() {
                continue;
            }
            let Some(time) = repo
                .commit_time(commit)
                .ok()
                .and_then(|t| t.trim().parse::<i64>().ok())
            else {
                continue;
            };
            match oldest {
                Some((best, _)) if time > best => {}
                _ => oldest = Some((time, commit)),
            }
        }
        oldest.map(|(_, commit)| commit.to_string())
    }
}

impl fmt::Display for RemoteRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.id)
    }
}

/// One snapshot of a revision's patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteDiff {
    pub id: String,
    /// The local commit this snapshot was built from
    pub last_commit: Option<String>,
    /// Properties already attached to the diff, by name
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// Fields of a new revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevisionFields {
    pub title: String,
    pub summary: Option<String>,
    /// Remote user identifiers of the reviewers
    pub reviewers: Vec<String>,
    /// Remote user identifiers to keep informed
    pub ccs: Vec<String>,
}

/// A comment anchored to a line of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineComment {
    pub revision_id: String,
    pub diff_id: String,
    pub path: String,
    pub line: u32,
    pub content: String,
}

/// A comment on the revision as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralComment {
    pub revision_id: String,
    pub message: String,
    /// Publish pending inline comments along with this one
    pub attach_inlines: bool,
}

/// Outcome of a remote call that reached the remote and got an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// The call did what was asked
    Success(T),
    /// A known, harmless refusal (e.g. closing an already closed revision)
    Benign(String),
    /// Any other explicit error reported by the remote
    Failed { code: String, message: String },
}

impl<T> Reply<T> {
    /// Treat anything but success as a fatal error for `method`.
    pub fn into_result(self, method: &str) -> Result<T> {
        match self {
            Reply::Success(value) => Ok(value),
            Reply::Benign(message) => Err(Error::Conduit {
                method: method.to_string(),
                code: "benign".to_string(),
                message,
            }),
            Reply::Failed { code, message } => Err(Error::Conduit {
                method: method.to_string(),
                code,
                message,
            }),
        }
    }

    /// Log anything but success and carry on.
    pub fn log_failure(self, what: &str) -> Option<T> {
        match self {
            Reply::Success(value) => Some(value),
            Reply::Benign(message) => {
                tracing::info!(%message, "{} was refused", what);
                None
            }
            Reply::Failed { code, message } => {
                tracing::warn!(%code, %message, "{} failed", what);
                None
            }
        }
    }
}

/// Primitive operations of the remote review tool.
///
/// Every call is synchronous. `Err` means the call could not be completed
/// or understood (timeout, malformed response) and aborts the pass;
/// explicit remote refusals come back as [`Reply`] where the caller
/// decides how serious they are.
pub trait RemoteApi {
    /// Revisions that have `commit` attached.
    fn query_revisions(&self, commit: &str) -> Result<Vec<RemoteRevision>>;

    /// Every open revision.
    fn query_open_revisions(&self) -> Result<Vec<RemoteRevision>>;

    /// Create a diff for `base..head`; `None` when the remote produced no diff.
    fn create_diff(&self, repo: &dyn Repo, base: &str, head: &str) -> Result<Option<RemoteDiff>>;

    /// Create a revision from a diff, returning the new revision's id.
    fn create_revision(&self, diff_id: &str, fields: &RevisionFields) -> Result<Reply<String>>;

    /// Attach a new diff to an existing revision, leaving its other fields alone.
    fn update_revision(&self, revision_id: &str, diff_id: &str) -> Result<Reply<()>>;

    /// Close a revision.
    fn close_revision(&self, revision_id: &str) -> Result<Reply<()>>;

    /// Read a diff back; `None` when it does not exist.
    fn read_diff(&self, diff_id: &str) -> Result<Option<RemoteDiff>>;

    /// Set a JSON-encoded property on a diff.
    fn set_diff_property(&self, diff_id: &str, name: &str, value: &str) -> Result<Reply<()>>;

    /// Draft an inline comment; published by the next general comment with `attach_inlines`.
    fn create_inline(&self, comment: &InlineComment) -> Result<Reply<()>>;

    /// Post a general comment.
    fn create_comment(&self, comment: &GeneralComment) -> Result<Reply<()>>;

    /// Remote user identifier for a local identity, `None` if unknown.
    fn find_user(&self, identity: &str) -> Result<Option<String>>;

    /// Every comment on a revision, translated into local comments.
    fn load_comments(&self, revision: &RemoteRevision) -> Result<Vec<Comment>>;

    /// Ask the remote to re-read the repository.
    fn refresh(&self, repo: &dyn Repo) -> Result<()>;
}

/// What the sync loop needs from a review tool.
pub trait ReviewTool {
    /// Make sure the remote has an up-to-date revision for `review`.
    /// Re-running it without local changes performs no remote mutation.
    fn ensure_request_exists(&mut self, repo: &dyn Repo, review: &Review) -> Result<()>;

    /// Every open remote review.
    fn list_open_reviews(&self, repo: &dyn Repo) -> Result<Vec<RemoteRevision>>;

    /// Comments on a remote review.
    fn load_comments(&self, review: &RemoteRevision) -> Result<Vec<Comment>>;

    /// Tell the remote that the repository changed.
    fn refresh(&self, repo: &dyn Repo) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryRepo;

    fn revision(hashes: &[(&str, &str)]) -> RemoteRevision {
        RemoteRevision {
            id: "1".to_string(),
            hashes: hashes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_contains_commit_ignores_other_hash_kinds() {
        let r = revision(&[("gttr", "tree1"), (COMMIT_HASH_KIND, "c1")]);
        assert!(r.contains_commit("c1"));
        assert!(!r.contains_commit("tree1"));
    }

    #[test]
    fn test_first_commit_picks_oldest_known() {
        let repo = MemoryRepo::new();
        repo.add_commit("c1", &[], "200");
        repo.add_commit("c2", &["c1"], "100");
        let r = revision(&[
            (COMMIT_HASH_KIND, "c1"),
            (COMMIT_HASH_KIND, "unknown"),
            (COMMIT_HASH_KIND, "c2"),
        ]);
        assert_eq!(r.first_commit(&repo), Some("c2".to_string()));
    }

    #[test]
    fn test_first_commit_tie_goes_to_last_listed() {
        let repo = MemoryRepo::new();
        repo.add_commit("c1", &[], "100");
        repo.add_commit("c2", &[], "100");
        let r = revision(&[(COMMIT_HASH_KIND, "c1"), (COMMIT_HASH_KIND, "c2")]);
        assert_eq!(r.first_commit(&repo), Some("c2".to_string()));
    }

    #[test]
    fn test_first_commit_none_when_unknown() {
        let repo = MemoryRepo::new();
        assert_eq!(revision(&[(COMMIT_HASH_KIND, "x")]).first_commit(&repo), None);
    }

    #[test]
    fn test_reply_into_result() {
        assert_eq!(Reply::Success(3).into_result("m").unwrap(), 3);
        let err = Reply::<()>::Failed {
            code: "ERR".to_string(),
            message: "boom".to_string(),
        }
        .into_result("differential.updaterevision")
        .unwrap_err();
        assert!(err.to_string().contains("differential.updaterevision"));
        assert!(Reply::<()>::Benign("already".to_string()).log_failure("close").is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RevisionStatus::Open.is_terminal());
        assert!(RevisionStatus::Closed.is_terminal());
        assert!(RevisionStatus::Abandoned.is_terminal());
    }
}
