//! Process-lifetime caches used to skip redundant work.
//!
//! Nothing here is persisted. A restart starts from empty caches and simply
//! reprocesses every repository once, which is safe because every remote
//! operation the mirror issues is idempotent.

use super::remote::RemoteRevision;
use crate::models::{Comment, CommentThread};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-repository record of the last fully processed state.
#[derive(Debug, Default)]
pub struct StateTracker {
    /// Fingerprint of each repository at its last full pass
    fingerprints: HashMap<PathBuf, String>,
    /// Open remote reviews seen at each repository's last full pass
    open_reviews: HashMap<PathBuf, Vec<RemoteRevision>>,
    /// Known local comments, by review revision
    comments: HashMap<String, Vec<CommentThread>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the repository changed since its last full pass.
    pub fn should_process(&self, repo: &Path, fingerprint: &str) -> bool {
        self.fingerprints.get(repo).map(String::as_str) != Some(fingerprint)
    }

    /// Remember a completed full pass.
    pub fn record_processed(
        &mut self,
        repo: &Path,
        fingerprint: &str,
        open_reviews: Vec<RemoteRevision>,
    ) {
        self.fingerprints
            .insert(repo.to_path_buf(), fingerprint.to_string());
        self.open_reviews.insert(repo.to_path_buf(), open_reviews);
    }

    /// Open remote reviews from the repository's last full pass.
    pub fn open_reviews(&self, repo: &Path) -> &[RemoteRevision] {
        self.open_reviews
            .get(repo)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Replace the known comment threads of a review.
    pub fn remember_comments(&mut self, revision: &str, threads: Vec<CommentThread>) {
        self.comments.insert(revision.to_string(), threads);
    }

    /// Record a comment that was just written locally.
    pub fn add_comment(&mut self, revision: &str, comment: Comment) {
        self.comments
            .entry(revision.to_string())
            .or_default()
            .push(CommentThread::leaf(comment));
    }

    /// Known comment threads of a review.
    pub fn comments(&self, revision: &str) -> &[CommentThread] {
        self.comments
            .get(revision)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
