//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The [`MirrorConfig`] struct representing the file
//! - Serialization/deserialization to/from KDL format
//! - Validation
//! - Loading from disk

use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings stored in config.kdl. Every value is optional; unset values
/// fall back to CLI flags or built-in defaults during resolution.
///
/// # KDL Schema
///
/// ```kdl
/// search-dir "/var/repo"
/// sync-period 30            // seconds between passes
/// sync-to-remote #false     // pull/push notes around each pass
/// remote "origin"
/// arc-command "arc"
/// request-timeout 60        // seconds before a conduit call is killed
/// repo-dir-prefix "/var/repo/"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Directory searched for git repositories
    pub search_dir: Option<String>,

    /// Seconds between passes
    pub sync_period: Option<u64>,

    /// Exchange notes with the git remote around every pass
    pub sync_to_remote: Option<bool>,

    /// Git remote the notes are exchanged with
    pub remote: Option<String>,

    /// Command used to reach the review tool
    pub arc_command: Option<String>,

    /// Seconds before a conduit call is killed
    pub request_timeout: Option<u64>,

    /// Path prefix stripped from repository paths to get callsigns
    pub repo_dir_prefix: Option<String>,
}

fn string_value(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)?
        .entries()
        .first()?
        .value()
        .as_string()
        .map(str::to_string)
}

fn integer_value(doc: &KdlDocument, name: &str) -> Option<u64> {
    let i = doc.get(name)?.entries().first()?.value().as_integer()?;
    u64::try_from(i).ok()
}

fn bool_value(doc: &KdlDocument, name: &str) -> Option<bool> {
    doc.get(name)?.entries().first()?.value().as_bool()
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}

impl MirrorConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.sync_period == Some(0) {
            return Err("sync-period must be greater than 0".to_string());
        }
        if self.request_timeout == Some(0) {
            return Err("request-timeout must be greater than 0".to_string());
        }
        if self.search_dir.as_deref() == Some("") {
            return Err("search-dir must not be empty".to_string());
        }
        Ok(())
    }

    /// Parse config from a KDL document. Values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            search_dir: string_value(doc, "search-dir"),
            sync_period: integer_value(doc, "sync-period"),
            sync_to_remote: bool_value(doc, "sync-to-remote"),
            remote: string_value(doc, "remote"),
            arc_command: string_value(doc, "arc-command"),
            request_timeout: integer_value(doc, "request-timeout"),
            repo_dir_prefix: string_value(doc, "repo-dir-prefix"),
        }
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref dir) = self.search_dir {
            push_node(&mut doc, "search-dir", KdlValue::String(dir.clone()));
        }
        if let Some(period) = self.sync_period {
            push_node(&mut doc, "sync-period", KdlValue::Integer(period as i128));
        }
        if let Some(sync) = self.sync_to_remote {
            push_node(&mut doc, "sync-to-remote", KdlValue::Bool(sync));
        }
        if let Some(ref remote) = self.remote {
            push_node(&mut doc, "remote", KdlValue::String(remote.clone()));
        }
        if let Some(ref command) = self.arc_command {
            push_node(&mut doc, "arc-command", KdlValue::String(command.clone()));
        }
        if let Some(timeout) = self.request_timeout {
            push_node(&mut doc, "request-timeout", KdlValue::Integer(timeout as i128));
        }
        if let Some(ref prefix) = self.repo_dir_prefix {
            push_node(&mut doc, "repo-dir-prefix", KdlValue::String(prefix.clone()));
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &MirrorConfig) {
        if other.search_dir.is_some() {
            self.search_dir = other.search_dir.clone();
        }
        if other.sync_period.is_some() {
            self.sync_period = other.sync_period;
        }
        if other.sync_to_remote.is_some() {
            self.sync_to_remote = other.sync_to_remote;
        }
        if other.remote.is_some() {
            self.remote = other.remote.clone();
        }
        if other.arc_command.is_some() {
            self.arc_command = other.arc_command.clone();
        }
        if other.request_timeout.is_some() {
            self.request_timeout = other.request_timeout;
        }
        if other.repo_dir_prefix.is_some() {
            self.repo_dir_prefix = other.repo_dir_prefix.clone();
        }
    }

    /// Load config.kdl from `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}
