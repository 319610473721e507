//! Configuration for review-mirror.
//!
//! ## config.kdl
//!
//! Located at `~/.config/review-mirror/config.kdl` unless `--config` or
//! `REVIEW_MIRROR_CONFIG` names another file. Contains:
//! - `search-dir` - Directory searched for git repositories
//! - `sync-period` - Seconds between passes
//! - `sync-to-remote` - Pull and push notes around every pass
//! - `remote` - Git remote notes are exchanged with
//! - `arc-command` - Command used to reach the review tool
//! - `request-timeout` - Seconds before a conduit call is killed
//! - `repo-dir-prefix` - Prefix stripped from repository paths to get callsigns
//!
//! ## Precedence
//!
//! CLI flag > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, Resolved, ResolvedConfig, ValueSource, default_config_path, resolve_config,
};
pub use schema::MirrorConfig;
