//! CLI argument definitions for review-mirror.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// review-mirror - Mirror git-notes code reviews into a Differential review tool.
///
/// Reviews, comments and CI/analysis reports stored under refs/notes/devtools
/// are pushed to the remote tool, and comments made there are copied back
/// into the notes.
#[derive(Parser, Debug)]
#[command(name = "review-mirror")]
#[command(author, version, about = "Mirror git-notes code reviews into a Differential review tool", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.kdl (defaults to ~/.config/review-mirror/config.kdl)
    #[arg(long = "config", global = true, env = "REVIEW_MIRROR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Settings that override config.kdl.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    /// Directory searched for git repositories
    #[arg(long, global = true)]
    pub search_dir: Option<PathBuf>,

    /// Seconds between passes
    #[arg(long, global = true)]
    pub sync_period: Option<u64>,

    /// Pull and push devtools notes around every pass
    #[arg(long, global = true)]
    pub sync_to_remote: bool,

    /// Git remote notes are exchanged with
    #[arg(long, global = true)]
    pub remote: Option<String>,

    /// Command used to call conduit
    #[arg(long, global = true)]
    pub arc_command: Option<String>,

    /// Seconds before a conduit call is killed
    #[arg(long, global = true)]
    pub request_timeout: Option<u64>,

    /// Prefix stripped from repository paths to get callsigns
    #[arg(long, global = true)]
    pub repo_dir_prefix: Option<String>,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mirror every repository under the search directory, forever (default)
    Run,

    /// Run a single pass and print what it did
    Once {
        /// Repositories to mirror (defaults to those under the search directory)
        repos: Vec<PathBuf>,
    },

    /// Show the resolved configuration and where each value came from
    Config,
}
