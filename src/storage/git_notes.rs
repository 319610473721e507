//! Git repository backend.
//!
//! Implements [`Repo`] by running the `git` command line tool in the
//! repository directory. Notes are read with `git notes show` and only ever
//! extended with `git notes append`, so concurrent writers never lose records.

use super::backend::{CommitDetails, Repo};
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Lines of context requested for patches; large enough to cover whole files.
const FULL_CONTEXT: &str = "-U32767";

/// A local git repository driven through the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitRepo {
    /// Path to the repository (work tree or bare directory).
    path: PathBuf,
}

impl GitRepo {
    /// Open the repository at `path`, failing if it is not a git repository.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Self {
            path: path.to_path_buf(),
        };
        let output = repo.git(&["rev-parse", "--git-dir"])?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "{} is not a git repository",
                path.display()
            )));
        }
        Ok(repo)
    }

    /// Run git with the given arguments and capture its output.
    fn git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .map_err(|e| Error::Git(format!("Failed to run git: {}", e)))
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    fn git_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Map a local notes pattern to the namespace its remote copy is fetched into.
    fn remote_tracking_pattern(remote: &str, pattern: &str) -> String {
        match pattern.strip_prefix("refs/notes/") {
            Some(rest) => format!("refs/notes/remotes/{}/{}", remote, rest),
            None => format!("refs/notes/remotes/{}/{}", remote, pattern),
        }
    }
}

impl Repo for GitRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn state_hash(&self) -> Result<String> {
        // show-ref exits non-zero for a repository without refs; that is still a state.
        let output = self.git(&["show-ref"])?;
        let mut hasher = Sha256::new();
        hasher.update(&output.stdout);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn list_annotated(&self, notes_ref: &str) -> Result<Vec<String>> {
        let output = self.git(&["notes", "--ref", notes_ref, "list"])?;
        if !output.status.success() {
            // No notes ref yet.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|s| s.to_string())
            .collect())
    }

    fn get_notes(&self, notes_ref: &str, commit: &str) -> Result<Vec<String>> {
        let output = self.git(&["notes", "--ref", notes_ref, "show", commit])?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|s| s.to_string())
            .collect())
    }

    fn append_note(&self, notes_ref: &str, commit: &str, note: &str) -> Result<()> {
        self.git_stdout(&["notes", "--ref", notes_ref, "append", "-m", note, commit])?;
        Ok(())
    }

    fn pull_notes(&self, remote: &str, pattern: &str) -> Result<()> {
        let tracking = Self::remote_tracking_pattern(remote, pattern);
        let refspec = format!("+{}:{}", pattern, tracking);
        self.git_stdout(&["fetch", remote, &refspec])?;

        let prefix = tracking.trim_end_matches('*');
        let local_prefix = pattern.trim_end_matches('*');
        let fetched = self.git_stdout(&["for-each-ref", "--format=%(refname)", prefix])?;
        for remote_ref in fetched.lines().filter(|l| !l.is_empty()) {
            let Some(suffix) = remote_ref.strip_prefix(prefix) else {
                continue;
            };
            let local_ref = format!("{}{}", local_prefix, suffix);
            self.git_stdout(&[
                "notes",
                "--ref",
                &local_ref,
                "merge",
                "-s",
                "cat_sort_uniq",
                remote_ref,
            ])?;
        }
        Ok(())
    }

    fn push_notes(&self, remote: &str, pattern: &str) -> Result<()> {
        let refspec = format!("{}:{}", pattern, pattern);
        self.git_stdout(&["push", remote, &refspec])?;
        Ok(())
    }

    fn resolve_ref(&self, reference: &str) -> Result<Option<String>> {
        let revision = format!("{}^{{commit}}", reference);
        let output = self.git(&["rev-parse", "--verify", "--quiet", &revision])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.git(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::Git(format!(
                "could not check ancestry of {} and {}: {}",
                ancestor,
                descendant,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        self.git_stdout(&["merge-base", a, b])
    }

    fn last_parent(&self, commit: &str) -> Result<Option<String>> {
        let parents = self.git_stdout(&["show", "-s", "--format=%P", commit])?;
        Ok(parents.split_whitespace().last().map(|s| s.to_string()))
    }

    fn commit_time(&self, commit: &str) -> Result<String> {
        self.git_stdout(&["show", "-s", "--format=%ct", commit])
    }

    fn commit_details(&self, commit: &str) -> Result<CommitDetails> {
        let out = self.git_stdout(&["show", "-s", "--format=%H%n%P%n%ct%n%ae%n%s", commit])?;
        let mut lines = out.lines();
        let mut next = || lines.next().unwrap_or_default().to_string();
        let hash = next();
        let parents = next();
        Ok(CommitDetails {
            commit: hash,
            parents: parents.split_whitespace().map(|s| s.to_string()).collect(),
            time: next(),
            author: next(),
            summary: next(),
        })
    }

    fn list_commits(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let range = format!("{}..{}", base, head);
        let out = self.git_stdout(&["rev-list", "--reverse", &range])?;
        Ok(out.lines().map(|s| s.to_string()).collect())
    }

    fn diff(&self, base: &str, head: &str) -> Result<String> {
        let output = self.git(&["diff", "--no-color", "--no-ext-diff", FULL_CONTEXT, base, head])?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "git diff {} {} failed: {}",
                base,
                head,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
