//! Repository capability trait.
//!
//! The mirror only talks to a repository through this trait:
//! - `GitRepo` - Shells out to `git` (production)
//! - `MemoryRepo` - In-memory fake used by unit tests

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Metadata of a single commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDetails {
    /// Full commit hash
    pub commit: String,
    /// Parent hashes, first parent first
    pub parents: Vec<String>,
    /// Committer timestamp (seconds since the epoch)
    pub time: String,
    /// Author email
    pub author: String,
    /// First line of the commit message
    pub summary: String,
}

/// Operations the mirror needs from a local repository.
pub trait Repo {
    /// Filesystem path of the repository; doubles as its identity.
    fn path(&self) -> &Path;

    /// Opaque token that changes whenever any ref (including notes) moves.
    fn state_hash(&self) -> Result<String>;

    /// Commits that carry a note under `notes_ref`.
    fn list_annotated(&self, notes_ref: &str) -> Result<Vec<String>>;

    /// Non-empty lines of the note attached to `commit`, empty when there is none.
    fn get_notes(&self, notes_ref: &str, commit: &str) -> Result<Vec<String>>;

    /// Append one record to the note attached to `commit`.
    fn append_note(&self, notes_ref: &str, commit: &str, note: &str) -> Result<()>;

    /// Fetch notes matching `pattern` from `remote` and merge them into the local refs.
    fn pull_notes(&self, remote: &str, pattern: &str) -> Result<()>;

    /// Push local notes matching `pattern` to `remote`.
    fn push_notes(&self, remote: &str, pattern: &str) -> Result<()>;

    /// Resolve a ref or commit-ish to a commit hash, `None` when it does not exist.
    fn resolve_ref(&self, reference: &str) -> Result<Option<String>>;

    /// Whether `ancestor` is reachable from `descendant`.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Best common ancestor of two commit-ish values.
    fn merge_base(&self, a: &str, b: &str) -> Result<String>;

    /// Last parent of `commit`; `None` for root commits. Errors if the commit is unknown.
    fn last_parent(&self, commit: &str) -> Result<Option<String>>;

    /// Commit timestamp token of `commit`.
    fn commit_time(&self, commit: &str) -> Result<String>;

    /// Full metadata of `commit`.
    fn commit_details(&self, commit: &str) -> Result<CommitDetails>;

    /// Commits reachable from `head` but not from `base`, oldest first.
    fn list_commits(&self, base: &str, head: &str) -> Result<Vec<String>>;

    /// Unified patch between two commits with full file context.
    fn diff(&self, base: &str, head: &str) -> Result<String>;
}
