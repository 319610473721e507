//! Common test utilities for review-mirror integration tests.
//!
//! Provides `TestEnv`, an isolated search directory plus config file, and
//! helpers for building small git repositories with review notes.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with an isolated search directory and config file.
///
/// The `rm()` method returns a `Command` that sets `REVIEW_MIRROR_CONFIG`
/// per-invocation, so tests never read the user's config and stay
/// parallel-safe.
pub struct TestEnv {
    pub search_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            search_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Path of the (possibly absent) config file used by `rm()`.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.path().join("config.kdl")
    }

    /// Write config.kdl contents.
    pub fn write_config(&self, contents: &str) {
        fs::write(self.config_path(), contents).unwrap();
    }

    /// Get a Command for the review-mirror binary using this environment.
    pub fn rm(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_review-mirror"));
        cmd.env("REVIEW_MIRROR_CONFIG", self.config_path());
        cmd.env_remove("RUST_LOG");
        cmd.arg("--search-dir").arg(self.search_dir.path());
        cmd
    }

    /// Create a git repository named `name` under the search directory.
    pub fn repo(&self, name: &str) -> PathBuf {
        let dir = self.search_dir.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        init_repo(&dir);
        dir
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git in `dir`, asserting success, and return trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a repository on `master` with one commit.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q", "-b", "master"]);
    git(dir, &["config", "user.email", "dev@example.com"]);
    git(dir, &["config", "user.name", "Dev"]);
    commit(dir, "README", "hello\n");
}

/// Write `file` and commit it, returning the new commit hash.
pub fn commit(dir: &Path, file: &str, content: &str) -> String {
    fs::write(dir.join(file), content).unwrap();
    git(dir, &["add", file]);
    git(dir, &["commit", "-q", "-m", &format!("edit {}", file)]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Append a JSON record to the notes ref for `commit`.
pub fn append_note(dir: &Path, notes_ref: &str, commit: &str, record: &serde_json::Value) {
    git(
        dir,
        &[
            "notes",
            "--ref",
            notes_ref,
            "append",
            "-m",
            &record.to_string(),
            commit,
        ],
    );
}

/// Create a `feature` branch with two commits and a review request on its
/// first commit. Returns the first commit.
pub fn request_review(dir: &Path, description: &str) -> String {
    git(dir, &["checkout", "-q", "-b", "feature"]);
    let first = commit(dir, "a.txt", "one\n");
    commit(dir, "a.txt", "one\ntwo\n");
    append_note(
        dir,
        "refs/notes/devtools/reviews",
        &first,
        &serde_json::json!({
            "timestamp": "1450000000",
            "reviewRef": "refs/heads/feature",
            "targetRef": "refs/heads/master",
            "requester": "dev@example.com",
            "reviewers": ["reviewer@example.com"],
            "description": description,
            "v": 0
        }),
    );
    git(dir, &["checkout", "-q", "master"]);
    first
}
