//! Local reviews assembled from git notes.
//!
//! A review is identified by the commit its request note is attached to
//! (its *revision*). Requests, comments and reports are all read from the
//! notes refs described in [`crate::storage`].

pub mod lint;

use crate::models::reports::{
    AnalysesReport, CiReport, compare_timestamps, latest_report, parse_all_valid,
};
use crate::models::{Comment, CommentThread, FORMAT_VERSION, Request};
use crate::storage::{ANALYSES_REF, CI_REF, COMMENT_REF, REQUEST_REF, Repo};
use crate::{Error, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A local code review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Review {
    /// Commit the review request is attached to
    pub revision: String,

    /// The latest request record
    pub request: Request,

    /// Comment threads, oldest root first
    pub comments: Vec<CommentThread>,

    /// Whether the change has landed on its target ref
    pub submitted: bool,
}

impl Review {
    /// Commit the change is based on.
    ///
    /// Uses the pinned base commit when the request has one, otherwise the
    /// merge base of the target ref and the review's revision.
    pub fn base_commit(&self, repo: &dyn Repo) -> Result<String> {
        if let Some(base) = self.request.base_commit.as_deref().filter(|b| !b.is_empty()) {
            return Ok(base.to_string());
        }
        if repo.resolve_ref(&self.request.target_ref)?.is_none() {
            return Err(Error::NotFound(format!(
                "target ref '{}' of review {}",
                self.request.target_ref, self.revision
            )));
        }
        repo.merge_base(&self.request.target_ref, &self.revision)
    }

    /// Latest commit of the change: the revision itself once submitted,
    /// otherwise whatever the review ref points at.
    pub fn head_commit(&self, repo: &dyn Repo) -> Result<String> {
        if self.submitted {
            return Ok(self.revision.clone());
        }
        if self.request.review_ref.is_empty() {
            return Err(Error::NotFound(format!("review ref of {}", self.revision)));
        }
        repo.resolve_ref(&self.request.review_ref)?
            .ok_or_else(|| Error::NotFound(format!("review ref '{}'", self.request.review_ref)))
    }
}

/// Identity hash of a serialized note record.
pub fn comment_hash(line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(line.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build comment threads from raw comment note lines.
///
/// Replies are attached under the comment whose hash their `parent` names;
/// replies to unknown comments become roots. Siblings are ordered by
/// timestamp, keeping note order for equal timestamps.
pub fn build_threads(lines: &[String]) -> Vec<CommentThread> {
    let mut seen = HashSet::new();
    let mut records: Vec<(String, Comment)> = Vec::new();
    for line in lines {
        let Ok(comment) = serde_json::from_str::<Comment>(line.trim()) else {
            continue;
        };
        if comment.version != FORMAT_VERSION {
            continue;
        }
        let hash = comment_hash(line);
        if seen.insert(hash.clone()) {
            records.push((hash, comment));
        }
    }
    records.sort_by(|a, b| compare_timestamps(&a.1.timestamp, &b.1.timestamp));

    fn attach(hash: &str, comment: &Comment, records: &[(String, Comment)]) -> CommentThread {
        let children = records
            .iter()
            .filter(|(_, c)| c.parent.as_deref() == Some(hash))
            .map(|(h, c)| attach(h, c, records))
            .collect();
        CommentThread {
            hash: hash.to_string(),
            comment: comment.clone(),
            children,
        }
    }

    records
        .iter()
        .filter(|(_, c)| match c.parent.as_deref() {
            Some(parent) => !seen.contains(parent),
            None => true,
        })
        .map(|(h, c)| attach(h, c, &records))
        .collect()
}

/// Load the comment threads attached to a review.
pub fn load_threads(repo: &dyn Repo, revision: &str) -> Result<Vec<CommentThread>> {
    Ok(build_threads(&repo.get_notes(COMMENT_REF, revision)?))
}

/// Pick the latest valid request record, ties going to the last one written.
fn latest_request(lines: &[String]) -> Option<Request> {
    lines
        .iter()
        .filter_map(|line| serde_json::from_str::<Request>(line.trim()).ok())
        .filter(|r| r.version == FORMAT_VERSION)
        .fold(None, |best: Option<Request>, r| match best {
            Some(b) if compare_timestamps(&r.timestamp, &b.timestamp).is_lt() => Some(b),
            _ => Some(r),
        })
}

/// Load the review whose request is attached to `revision`, if there is one.
pub fn get(repo: &dyn Repo, revision: &str) -> Result<Option<Review>> {
    let Some(request) = latest_request(&repo.get_notes(REQUEST_REF, revision)?) else {
        return Ok(None);
    };
    let submitted = match repo.resolve_ref(&request.target_ref)? {
        Some(target) => repo.is_ancestor(revision, &target)?,
        None => false,
    };
    Ok(Some(Review {
        revision: revision.to_string(),
        request,
        comments: load_threads(repo, revision)?,
        submitted,
    }))
}

/// Load every review in the repository.
pub fn list_all(repo: &dyn Repo) -> Result<Vec<Review>> {
    let mut reviews = Vec::new();
    for revision in repo.list_annotated(REQUEST_REF)? {
        if let Some(review) = get(repo, &revision)? {
            reviews.push(review);
        }
    }
    Ok(reviews)
}

/// Latest valid CI report for `commit`.
pub fn latest_ci_report(repo: &dyn Repo, commit: &str) -> Result<Option<CiReport>> {
    let reports: Vec<CiReport> = parse_all_valid(&repo.get_notes(CI_REF, commit)?);
    Ok(latest_report(&reports).cloned())
}

/// Latest valid static-analysis report for `commit`.
pub fn latest_analyses_report(repo: &dyn Repo, commit: &str) -> Result<Option<AnalysesReport>> {
    let reports: Vec<AnalysesReport> = parse_all_valid(&repo.get_notes(ANALYSES_REF, commit)?);
    Ok(latest_report(&reports).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryRepo;

    fn comment_line(timestamp: &str, description: &str, parent: Option<&str>) -> String {
        Comment {
            timestamp: timestamp.to_string(),
            author: "a@b.com".to_string(),
            parent: parent.map(|p| p.to_string()),
            description: description.to_string(),
            ..Default::default()
        }
        .to_note()
        .unwrap()
    }

    fn request_line(timestamp: &str, description: &str) -> String {
        serde_json::to_string(&Request {
            timestamp: timestamp.to_string(),
            review_ref: "refs/heads/feature".to_string(),
            target_ref: "refs/heads/master".to_string(),
            requester: "me@b.com".to_string(),
            description: description.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    // ==================== Thread Tests ====================

    #[test]
    fn test_build_threads_links_replies() {
        let root = comment_line("1", "root", None);
        let reply = comment_line("2", "reply", Some(&comment_hash(&root)));
        let other = comment_line("3", "other", None);

        let threads = build_threads(&[reply, other, root]);
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].comment.description, "root");
        assert_eq!(threads[0].children.len(), 1);
        assert_eq!(threads[0].children[0].comment.description, "reply");
        assert_eq!(threads[1].comment.description, "other");
    }

    #[test]
    fn test_build_threads_orphan_becomes_root() {
        let orphan = comment_line("1", "orphan", Some("deadbeef"));
        let threads = build_threads(&[orphan]);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comment.description, "orphan");
    }

    #[test]
    fn test_build_threads_skips_invalid_and_duplicates() {
        let root = comment_line("1", "root", None);
        let threads = build_threads(&[root.clone(), "garbage".to_string(), root]);
        assert_eq!(threads.len(), 1);
    }

    // ==================== Review Tests ====================

    #[test]
    fn test_get_unknown_review() {
        let repo = MemoryRepo::new();
        repo.add_commit("c1", &[], "100");
        assert!(get(&repo, "c1").unwrap().is_none());
    }

    #[test]
    fn test_get_uses_latest_request() {
        let repo = MemoryRepo::new();
        repo.add_commit("base", &[], "100");
        repo.add_commit("c1", &["base"], "200");
        repo.set_ref("refs/heads/master", "base");
        repo.set_ref("refs/heads/feature", "c1");
        repo.push_note(REQUEST_REF, "c1", &request_line("5", "old"));
        repo.push_note(REQUEST_REF, "c1", &request_line("7", "new"));
        repo.push_note(REQUEST_REF, "c1", &request_line("6", "middle"));

        let review = get(&repo, "c1").unwrap().unwrap();
        assert_eq!(review.request.description, "new");
        assert!(!review.submitted);
        assert_eq!(review.head_commit(&repo).unwrap(), "c1");
        assert_eq!(review.base_commit(&repo).unwrap(), "base");
    }

    #[test]
    fn test_submitted_review_head_is_revision() {
        let repo = MemoryRepo::new();
        repo.add_commit("base", &[], "100");
        repo.add_commit("c1", &["base"], "200");
        repo.set_ref("refs/heads/master", "c1");
        repo.push_note(REQUEST_REF, "c1", &request_line("5", "landed"));

        let review = get(&repo, "c1").unwrap().unwrap();
        assert!(review.submitted);
        assert_eq!(review.head_commit(&repo).unwrap(), "c1");
    }

    #[test]
    fn test_missing_review_ref_has_no_head() {
        let repo = MemoryRepo::new();
        repo.add_commit("base", &[], "100");
        repo.add_commit("c1", &["base"], "200");
        repo.set_ref("refs/heads/master", "base");
        repo.push_note(REQUEST_REF, "c1", &request_line("5", "gone"));

        let review = get(&repo, "c1").unwrap().unwrap();
        assert!(review.head_commit(&repo).is_err());
    }

    #[test]
    fn test_list_all_and_reports() {
        let repo = MemoryRepo::new();
        repo.add_commit("base", &[], "100");
        repo.add_commit("c1", &["base"], "200");
        repo.set_ref("refs/heads/master", "base");
        repo.push_note(REQUEST_REF, "c1", &request_line("5", "one"));
        repo.push_note(
            CI_REF,
            "c1",
            r#"{"timestamp":"9","url":"u","status":"failure","agent":"ci","v":0}"#,
        );
        repo.push_note(
            CI_REF,
            "c1",
            r#"{"timestamp":"9","url":"u","status":"success","agent":"ci","v":0}"#,
        );

        assert_eq!(list_all(&repo).unwrap().len(), 1);
        let ci = latest_ci_report(&repo, "c1").unwrap().unwrap();
        assert_eq!(ci.status, "success");
        assert!(latest_analyses_report(&repo, "c1").unwrap().is_none());
    }
}
