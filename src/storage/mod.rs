//! Storage layer: the local git repositories holding review notes.
//!
//! ## Notes layout
//!
//! All review metadata lives in git notes under `refs/notes/devtools/*`:
//!
//! - `refs/notes/devtools/reviews` - review requests, on the first commit of a change
//! - `refs/notes/devtools/discuss` - comments, on the same commit as the request
//! - `refs/notes/devtools/ci` - continuous-integration reports, per commit
//! - `refs/notes/devtools/analyses` - static-analysis reports, per commit
//!
//! Every note is a sequence of JSON records, one per line, and is only ever appended to.

pub mod backend;
pub mod git_notes;

pub use backend::{CommitDetails, Repo};
pub use git_notes::GitRepo;

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Notes ref holding review requests.
pub const REQUEST_REF: &str = "refs/notes/devtools/reviews";
/// Notes ref holding review comments.
pub const COMMENT_REF: &str = "refs/notes/devtools/discuss";
/// Notes ref holding CI reports.
pub const CI_REF: &str = "refs/notes/devtools/ci";
/// Notes ref holding static-analysis reports.
pub const ANALYSES_REF: &str = "refs/notes/devtools/analyses";
/// Pattern covering every devtools notes ref, used for push/pull.
pub const NOTES_PATTERN: &str = "refs/notes/devtools/*";

/// Whether `dir` looks like a git repository (work tree or bare).
fn looks_like_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
        || (dir.join("HEAD").is_file() && dir.join("objects").is_dir() && dir.join("refs").is_dir())
}

/// Find every git repository under `search_dir`.
///
/// Once a directory is identified as a repository its children are not
/// searched. Unreadable directories are skipped.
pub fn find_repos(search_dir: &Path) -> Result<Vec<GitRepo>> {
    let mut repos = Vec::new();
    let mut pending: Vec<PathBuf> = vec![search_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        if looks_like_repo(&dir) {
            match GitRepo::open(&dir) {
                Ok(repo) => {
                    repos.push(repo);
                    continue;
                }
                Err(e) => tracing::debug!(path = %dir.display(), error = %e, "not a usable repository"),
            }
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        // Reverse-sorted so the stack pops children in name order.
        children.sort();
        children.reverse();
        pending.extend(children);
    }

    Ok(repos)
}
