//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. config.kdl (`--config`, `REVIEW_MIRROR_CONFIG`, or
//!    `~/.config/review-mirror/config.kdl`)
//! 3. Built-in defaults

use super::schema::MirrorConfig;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SEARCH_DIR: &str = "/var/repo";
pub const DEFAULT_SYNC_PERIOD: u64 = 30;
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_ARC_COMMAND: &str = "arc";
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 60;
pub const DEFAULT_REPO_DIR_PREFIX: &str = "/var/repo/";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from a CLI flag
    CliFlag,
    /// Value from the config file at the given path
    File(String),
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::File(path) => write!(f, "file:{}", path),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }

    fn default_value(value: T) -> Self {
        Self::new(value, ValueSource::Default)
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Config file that was consulted, whether or not it exists
    pub config_path: Option<String>,
    pub search_dir: Resolved<PathBuf>,
    pub sync_period: Resolved<u64>,
    pub sync_to_remote: Resolved<bool>,
    pub remote: Resolved<String>,
    pub arc_command: Resolved<String>,
    pub request_timeout: Resolved<u64>,
    pub repo_dir_prefix: Resolved<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            search_dir: Resolved::default_value(PathBuf::from(DEFAULT_SEARCH_DIR)),
            sync_period: Resolved::default_value(DEFAULT_SYNC_PERIOD),
            sync_to_remote: Resolved::default_value(false),
            remote: Resolved::default_value(DEFAULT_REMOTE.to_string()),
            arc_command: Resolved::default_value(DEFAULT_ARC_COMMAND.to_string()),
            request_timeout: Resolved::default_value(DEFAULT_REQUEST_TIMEOUT),
            repo_dir_prefix: Resolved::default_value(DEFAULT_REPO_DIR_PREFIX.to_string()),
        }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Explicit config file path
    pub config_path: Option<PathBuf>,
    pub search_dir: Option<PathBuf>,
    pub sync_period: Option<u64>,
    pub sync_to_remote: Option<bool>,
    pub remote: Option<String>,
    pub arc_command: Option<String>,
    pub request_timeout: Option<u64>,
    pub repo_dir_prefix: Option<String>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set the search directory override.
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = Some(dir.into());
        self
    }

    /// Set the sync period override.
    pub fn with_sync_period(mut self, secs: u64) -> Self {
        self.sync_period = Some(secs);
        self
    }

    /// Set the sync-to-remote override.
    pub fn with_sync_to_remote(mut self, sync: bool) -> Self {
        self.sync_to_remote = Some(sync);
        self
    }
}

/// Default location of config.kdl (`~/.config/review-mirror/config.kdl`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("review-mirror").join("config.kdl"))
}

fn pick<T: Clone>(
    slot: &mut Resolved<T>,
    cli: Option<&T>,
    file: Option<&T>,
    file_source: &ValueSource,
) {
    if let Some(value) = cli {
        *slot = Resolved::new(value.clone(), ValueSource::CliFlag);
    } else if let Some(value) = file {
        *slot = Resolved::new(value.clone(), file_source.clone());
    }
}

/// Resolve configuration from already-loaded file contents.
pub fn resolve_with(
    file: &MirrorConfig,
    file_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let mut result = ResolvedConfig {
        config_path: file_path.map(|p| p.display().to_string()),
        ..Default::default()
    };
    let file_source = ValueSource::File(result.config_path.clone().unwrap_or_default());

    let file_search_dir = file.search_dir.as_ref().map(PathBuf::from);
    pick(
        &mut result.search_dir,
        overrides.search_dir.as_ref(),
        file_search_dir.as_ref(),
        &file_source,
    );
    pick(
        &mut result.sync_period,
        overrides.sync_period.as_ref(),
        file.sync_period.as_ref(),
        &file_source,
    );
    pick(
        &mut result.sync_to_remote,
        overrides.sync_to_remote.as_ref(),
        file.sync_to_remote.as_ref(),
        &file_source,
    );
    pick(
        &mut result.remote,
        overrides.remote.as_ref(),
        file.remote.as_ref(),
        &file_source,
    );
    pick(
        &mut result.arc_command,
        overrides.arc_command.as_ref(),
        file.arc_command.as_ref(),
        &file_source,
    );
    pick(
        &mut result.request_timeout,
        overrides.request_timeout.as_ref(),
        file.request_timeout.as_ref(),
        &file_source,
    );
    pick(
        &mut result.repo_dir_prefix,
        overrides.repo_dir_prefix.as_ref(),
        file.repo_dir_prefix.as_ref(),
        &file_source,
    );

    if result.sync_period.value == 0 {
        return Err(Error::Config("sync period must be greater than 0".to_string()));
    }
    if result.request_timeout.value == 0 {
        return Err(Error::Config(
            "request timeout must be greater than 0".to_string(),
        ));
    }
    Ok(result)
}

/// Resolve configuration with the full precedence chain.
///
/// Precedence (highest to lowest):
/// 1. CLI flags (from `overrides`)
/// 2. config.kdl
/// 3. Built-in defaults
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let path = overrides.config_path.clone().or_else(default_config_path);
    let file = match path.as_deref() {
        Some(p) => MirrorConfig::load(p)?,
        None => MirrorConfig::new(),
    };
    resolve_with(&file, path.as_deref(), overrides)
}
