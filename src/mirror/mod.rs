//! The reconciliation engine.
//!
//! [`Mirror`] runs one pass per repository:
//!
//! 1. Optionally pull the devtools notes from the git remote.
//! 2. Fingerprint the repository.
//! 3. If nothing changed since the last full pass, reuse the cached open
//!    remote reviews and go to step 5.
//! 4. Otherwise drive every local review through the [`ReviewTool`], cache
//!    its comments, snapshot the open remote reviews and ask the remote to
//!    refresh its view of the repository.
//! 5. Copy comments made on the remote into the local notes.
//! 6. Optionally push the notes back to the git remote.

pub mod overlap;
pub mod reconcile;
pub mod remote;
pub mod report;
pub mod state;

use crate::models::{CommentThread, flatten_threads};
use crate::review;
use crate::storage::{COMMENT_REF, NOTES_PATTERN, Repo};
use crate::Result;
use chrono::{DateTime, Utc};
use overlap::filter_overlapping;
use remote::{RemoteRevision, ReviewTool};
use serde::Serialize;
use state::StateTracker;

/// Options controlling a mirror pass.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Pull and push notes around every pass
    pub sync_to_remote: bool,
    /// Git remote the notes are exchanged with
    pub remote: String,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            sync_to_remote: false,
            remote: "origin".to_string(),
        }
    }
}

/// What one pass over one repository did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub repo: String,
    pub started_at: DateTime<Utc>,
    /// Whether the repository changed since the previous full pass
    pub dirty: bool,
    /// Local reviews reconciled (0 for clean passes)
    pub reviews: usize,
    /// Open remote reviews considered for comment mirroring
    pub open_reviews: usize,
    /// Remote comments appended to the local notes
    pub comments_appended: usize,
    /// Whether notes were pushed successfully
    pub pushed: bool,
}

/// Process-lifetime driver of the reconciliation passes.
pub struct Mirror<T> {
    tool: T,
    state: StateTracker,
    options: MirrorOptions,
}

impl<T: ReviewTool> Mirror<T> {
    pub fn new(tool: T, options: MirrorOptions) -> Self {
        Self {
            tool,
            state: StateTracker::new(),
            options,
        }
    }

    #[cfg(test)]
    pub(crate) fn tool(&self) -> &T {
        &self.tool
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &StateTracker {
        &self.state
    }

    /// Run one pass over `repo`.
    pub fn mirror_repo(&mut self, repo: &dyn Repo) -> Result<PassSummary> {
        let started_at = Utc::now();
        let path = repo.path().to_path_buf();
        let _span = tracing::info_span!("mirror", repo = %path.display()).entered();

        if self.options.sync_to_remote {
            if let Err(e) = repo.pull_notes(&self.options.remote, NOTES_PATTERN) {
                tracing::warn!(error = %e, "failed to pull notes");
            }
        }

        let fingerprint = repo.state_hash()?;
        let dirty = self.state.should_process(&path, &fingerprint);
        let mut reviews = 0;
        if dirty {
            tracing::info!("repository changed, reconciling");
            for review in review::list_all(repo)? {
                self.state
                    .remember_comments(&review.revision, review.comments.clone());
                self.tool.ensure_request_exists(repo, &review)?;
                reviews += 1;
            }
            let open = self.tool.list_open_reviews(repo)?;
            self.state.record_processed(&path, &fingerprint, open);
            self.tool.refresh(repo)?;
        } else {
            tracing::debug!("repository unchanged");
        }

        let open: Vec<RemoteRevision> = self.state.open_reviews(&path).to_vec();
        let mut comments_appended = 0;
        for remote in &open {
            comments_appended += self.mirror_remote_comments(repo, remote)?;
        }

        let mut pushed = false;
        if self.options.sync_to_remote {
            match repo.push_notes(&self.options.remote, NOTES_PATTERN) {
                Ok(()) => pushed = true,
                Err(e) => tracing::warn!(error = %e, "failed to push notes"),
            }
        }

        Ok(PassSummary {
            repo: path.display().to_string(),
            started_at,
            dirty,
            reviews,
            open_reviews: open.len(),
            comments_appended,
            pushed,
        })
    }

    /// Append comments of one remote review that are not yet in the local notes.
    fn mirror_remote_comments(&mut self, repo: &dyn Repo, remote: &RemoteRevision) -> Result<usize> {
        let Some(commit) = remote.first_commit(repo) else {
            tracing::debug!(revision = %remote, "no attached commit known locally");
            return Ok(0);
        };
        let Some(review) = review::get(repo, &commit)? else {
            tracing::debug!(revision = %remote, %commit, "no local review for remote revision");
            return Ok(0);
        };
        if self.state.comments(&review.revision).is_empty() {
            self.state
                .remember_comments(&review.revision, review.comments.clone());
        }

        let incoming: Vec<CommentThread> = self
            .tool
            .load_comments(remote)?
            .into_iter()
            .map(CommentThread::leaf)
            .collect();
        let known: Vec<_> = flatten_threads(self.state.comments(&review.revision))
            .into_iter()
            .cloned()
            .collect();
        let fresh = filter_overlapping(&incoming, &known);

        for comment in &fresh {
            repo.append_note(COMMENT_REF, &review.revision, &comment.to_note()?)?;
            self.state.add_comment(&review.revision, comment.clone());
        }
        if !fresh.is_empty() {
            tracing::info!(
                revision = %remote,
                review = %review.revision,
                count = fresh.len(),
                "appended remote comments"
            );
        }
        Ok(fresh.len())
    }
}
