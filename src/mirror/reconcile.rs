//! Bringing a remote revision in line with a local review.
//!
//! For each local review the reconciler walks this decision list:
//!
//! 1. The revision was already seen closed in this process: nothing to do.
//! 2. The review is submitted: close every open matching remote revision.
//! 3. The base or head commit cannot be computed: skip the review this pass.
//! 4. No remote revision references the review: create a diff for
//!    base..head and a revision from it, then treat the result like (5).
//! 5. A remote revision exists: if it lacks the head commit, attach a new
//!    diff; otherwise mirror reports and comments onto its diffs.

use super::overlap::{filter_overlapping, quote_description};
use super::remote::{
    GeneralComment, InlineComment, RemoteApi, RemoteDiff, RemoteRevision, Reply, ReviewTool,
    RevisionFields,
};
use super::report::{LINT_PROPERTY, UNIT_PROPERTY, translate_ci, translate_lint};
use crate::config::resolver::DEFAULT_REQUEST_TIMEOUT;
use crate::models::{Comment, Request};
use crate::review::{self, Review, lint};
use crate::storage::Repo;
use crate::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Maximum length of a remote revision title, in characters.
pub const TITLE_LENGTH_LIMIT: usize = 256;

const ELLIPSIS: &str = "...";

/// Split a description into a revision title and optional summary.
///
/// The title is the first line, cut to [`TITLE_LENGTH_LIMIT`] characters
/// with a trailing ellipsis when too long. The full description becomes the
/// summary whenever the title does not already say all of it.
pub fn title_and_summary(description: &str) -> (String, Option<String>) {
    let first_line = description.lines().next().unwrap_or_default();
    let title = if first_line.chars().count() > TITLE_LENGTH_LIMIT {
        let kept: String = first_line
            .chars()
            .take(TITLE_LENGTH_LIMIT - ELLIPSIS.len())
            .collect();
        format!("{}{}", kept, ELLIPSIS)
    } else {
        first_line.to_string()
    };
    let summary = (title != description).then(|| description.to_string());
    (title, summary)
}

/// Drives one [`RemoteApi`] to keep remote revisions in line with local reviews.
pub struct DiffReconciler<A> {
    api: A,
    /// Revisions observed closed during this process's lifetime
    closed: HashSet<String>,
    /// Bound on fetching lint result documents
    lint_timeout: Duration,
}

impl<A: RemoteApi> DiffReconciler<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            closed: HashSet::new(),
            lint_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Give up on lint result documents that take longer than `timeout`.
    pub fn with_lint_timeout(mut self, timeout: Duration) -> Self {
        self.lint_timeout = timeout;
        self
    }

    /// The underlying remote API.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Whether `revision` has been closed (or seen closed) by this process.
    #[cfg(test)]
    pub(crate) fn is_known_closed(&self, revision: &str) -> bool {
        self.closed.contains(revision)
    }

    /// Resolve local identities to remote user ids, skipping unknown ones.
    fn resolve_users<'a, I>(&self, identities: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut users = Vec::new();
        for identity in identities {
            if identity.is_empty() {
                continue;
            }
            match self.api.find_user(identity)? {
                Some(user) => users.push(user),
                None => tracing::warn!(%identity, "no remote user for identity, skipping"),
            }
        }
        Ok(users)
    }

    fn revision_fields(&self, request: &Request) -> Result<RevisionFields> {
        let (title, summary) = title_and_summary(&request.description);
        Ok(RevisionFields {
            title,
            summary,
            reviewers: self.resolve_users(&request.reviewers)?,
            ccs: self.resolve_users(std::iter::once(&request.requester))?,
        })
    }

    fn close(&self, remote: &RemoteRevision) -> Result<()> {
        match self.api.close_revision(&remote.id)? {
            Reply::Success(()) => tracing::info!(revision = %remote, "closed submitted revision"),
            Reply::Benign(message) => {
                tracing::info!(revision = %remote, %message, "revision was already closed")
            }
            // The remote refuses e.g. closing unaccepted revisions or ones we do not own.
            Reply::Failed { code, message } => {
                tracing::warn!(revision = %remote, %code, %message, "could not close revision")
            }
        }
        Ok(())
    }

    /// Make the remote revision track `head`, or mirror onto it if it already does.
    fn update_review_diffs(
        &self,
        repo: &dyn Repo,
        remote: &RemoteRevision,
        head: &str,
        review: &Review,
    ) -> Result<()> {
        if remote.is_closed() {
            return Ok(());
        }
        if remote.contains_commit(head) {
            return self.mirror_into_revision(repo, remote, review);
        }

        let merge_base = match repo.merge_base(&review.request.target_ref, head) {
            Ok(base) => base,
            Err(e) => {
                tracing::info!(
                    revision = %review.revision,
                    error = %e,
                    "no merge base for new head, skipping"
                );
                return Ok(());
            }
        };
        let Some(diff) = self.api.create_diff(repo, &merge_base, head)? else {
            // The remote sees nothing to diff, i.e. the change is already merged.
            tracing::info!(revision = %review.revision, "no diff produced for {}", head);
            return Ok(());
        };
        self.api
            .update_revision(&remote.id, &diff.id)?
            .into_result("update revision")?;
        tracing::info!(revision = %remote, diff = %diff.id, head, "attached new diff");
        Ok(())
    }

    /// Diffs of a revision keyed by the local commit each was built from.
    fn diffs_by_commit(&self, remote: &RemoteRevision) -> Result<BTreeMap<String, RemoteDiff>> {
        let mut by_commit = BTreeMap::new();
        for diff_id in &remote.diffs {
            match self.api.read_diff(diff_id)? {
                Some(diff) => match diff.last_commit.clone().filter(|c| !c.is_empty()) {
                    Some(commit) => {
                        by_commit.insert(commit, diff);
                    }
                    None => tracing::debug!(diff = %diff_id, "diff has no local commit"),
                },
                None => tracing::debug!(diff = %diff_id, "diff not found"),
            }
        }
        Ok(by_commit)
    }

    /// Set a diff property unless the diff already carries the same value.
    fn set_property<T: Serialize>(&self, diff: &RemoteDiff, name: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if diff.properties.get(name) == Some(&value) {
            return Ok(());
        }
        self.api
            .set_diff_property(&diff.id, name, &value.to_string())?
            .log_failure(&format!("setting {} on diff {}", name, diff.id));
        Ok(())
    }

    /// Mirror the latest CI and analysis reports of each commit onto its diff.
    fn mirror_reports(
        &self,
        repo: &dyn Repo,
        diffs: &BTreeMap<String, RemoteDiff>,
    ) -> Result<()> {
        for (commit, diff) in diffs {
            match review::latest_ci_report(repo, commit) {
                Ok(Some(report)) => {
                    tracing::debug!(diff = %diff.id, ?report, "latest CI report");
                    if let Some(property) = translate_ci(&report) {
                        self.set_property(diff, UNIT_PROPERTY, &property)?;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%commit, error = %e, "failed to load CI reports"),
            }

            let lint_results = match review::latest_analyses_report(repo, commit) {
                Ok(Some(report)) => lint::load_lint_results(&report, self.lint_timeout),
                Ok(None) => Ok(Vec::new()),
                Err(e) => Err(e),
            };
            match lint_results {
                Ok(results) => {
                    if let Some(property) = translate_lint(&results) {
                        self.set_property(diff, LINT_PROPERTY, &property)?;
                    }
                }
                Err(e) => tracing::warn!(%commit, error = %e, "failed to load analysis reports"),
            }
        }
        Ok(())
    }

    /// Build the remote comments for local comments not yet mirrored.
    ///
    /// Inline comments go to the diff built from the commit they were made
    /// on; comments on commits without a diff wait for a later pass.
    fn build_comment_requests(
        &self,
        remote: &RemoteRevision,
        review: &Review,
        existing: &[Comment],
        diffs: &BTreeMap<String, RemoteDiff>,
    ) -> (Vec<InlineComment>, Vec<GeneralComment>) {
        let mut inlines = Vec::new();
        let mut generals = Vec::new();

        for thread in &review.comments {
            let fresh = filter_overlapping(std::slice::from_ref(thread), existing);
            match thread.comment.inline_location() {
                Some(location) => {
                    let Some(diff) = diffs.get(&location.commit) else {
                        continue;
                    };
                    inlines.extend(fresh.iter().map(|c| InlineComment {
                        revision_id: remote.id.clone(),
                        diff_id: diff.id.clone(),
                        path: location.path.clone(),
                        line: location.start_line(),
                        content: quote_description(c),
                    }));
                }
                None => generals.extend(fresh.iter().map(|c| GeneralComment {
                    revision_id: remote.id.clone(),
                    message: quote_description(c),
                    attach_inlines: false,
                })),
            }
        }

        if !inlines.is_empty() {
            generals.push(GeneralComment {
                revision_id: remote.id.clone(),
                message: String::new(),
                attach_inlines: true,
            });
        }
        (inlines, generals)
    }

    /// Mirror reports and not-yet-mirrored local comments onto a revision.
    fn mirror_into_revision(
        &self,
        repo: &dyn Repo,
        remote: &RemoteRevision,
        review: &Review,
    ) -> Result<()> {
        let diffs = self.diffs_by_commit(remote)?;
        self.mirror_reports(repo, &diffs)?;

        let existing = self.api.load_comments(remote)?;
        let (inlines, generals) = self.build_comment_requests(remote, review, &existing, &diffs);
        for inline in &inlines {
            self.api
                .create_inline(inline)?
                .log_failure(&format!("inline comment on {}", remote));
        }
        for general in &generals {
            self.api
                .create_comment(general)?
                .log_failure(&format!("comment on {}", remote));
        }
        if !generals.is_empty() {
            tracing::info!(
                revision = %remote,
                inline = inlines.len(),
                general = generals.len(),
                "mirrored local comments"
            );
        }
        Ok(())
    }
}

impl<A: RemoteApi> ReviewTool for DiffReconciler<A> {
    fn ensure_request_exists(&mut self, repo: &dyn Repo, review: &Review) -> Result<()> {
        let revision = review.revision.as_str();
        if self.closed.contains(revision) {
            return Ok(());
        }

        let existing = self.api.query_revisions(revision)?;
        if review.submitted {
            for remote in existing.iter().filter(|r| !r.is_closed()) {
                self.close(remote)?;
            }
            self.closed.insert(revision.to_string());
            return Ok(());
        }

        let base = match review.base_commit(repo) {
            Ok(base) => base,
            Err(e) => {
                // Lost to a rebase, a merge or garbage collection; not worth failing for.
                tracing::info!(%revision, error = %e, "ignoring review without a base commit");
                return Ok(());
            }
        };
        let head = match review.head_commit(repo) {
            Ok(head) => head,
            Err(e) => {
                tracing::info!(
                    %revision,
                    review_ref = %review.request.review_ref,
                    error = %e,
                    "ignoring review without a head commit"
                );
                return Ok(());
            }
        };

        if !existing.is_empty() {
            for remote in &existing {
                self.update_review_diffs(repo, remote, &head, review)?;
            }
            return Ok(());
        }

        let Some(diff) = self.api.create_diff(repo, &base, &head)? else {
            tracing::info!(%revision, "no diff produced, change is already merged");
            return Ok(());
        };
        let fields = self.revision_fields(&review.request)?;
        let created = self
            .api
            .create_revision(&diff.id, &fields)?
            .into_result("create revision")?;
        tracing::info!(%revision, diff = %diff.id, remote = %created, "created revision");

        // The change may already span several commits; make sure the newest is attached.
        for remote in self.api.query_revisions(revision)? {
            self.update_review_diffs(repo, &remote, &head, review)?;
        }
        Ok(())
    }

    fn list_open_reviews(&self, _repo: &dyn Repo) -> Result<Vec<RemoteRevision>> {
        // The remote cannot filter by repository; revisions whose commits are
        // unknown locally are dropped by the caller.
        self.api.query_open_revisions()
    }

    fn load_comments(&self, review: &RemoteRevision) -> Result<Vec<Comment>> {
        self.api.load_comments(review)
    }

    fn refresh(&self, repo: &dyn Repo) -> Result<()> {
        self.api.refresh(repo)
    }
}
