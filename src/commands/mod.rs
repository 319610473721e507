//! Command implementations for the review-mirror CLI.
//!
//! - `run` - Mirror every discovered repository in a loop
//! - `once` - A single pass, reporting what happened per repository
//! - `config` - Show the resolved configuration

use crate::arcanist::Arcanist;
use crate::cli::SettingsArgs;
use crate::config::{ConfigOverrides, ResolvedConfig};
use crate::mirror::reconcile::DiffReconciler;
use crate::mirror::remote::ReviewTool;
use crate::mirror::{Mirror, MirrorOptions, PassSummary};
use crate::storage::{self, GitRepo};
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait CommandResult {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Build resolver overrides from command line settings.
pub fn overrides_from(config: Option<PathBuf>, settings: &SettingsArgs) -> ConfigOverrides {
    ConfigOverrides {
        config_path: config,
        search_dir: settings.search_dir.clone(),
        sync_period: settings.sync_period,
        // A flag can only switch syncing on; leave it unset so the file decides otherwise.
        sync_to_remote: settings.sync_to_remote.then_some(true),
        remote: settings.remote.clone(),
        arc_command: settings.arc_command.clone(),
        request_timeout: settings.request_timeout,
        repo_dir_prefix: settings.repo_dir_prefix.clone(),
    }
}

/// The production mirror for a resolved configuration.
pub fn build_mirror(config: &ResolvedConfig) -> Mirror<DiffReconciler<Arcanist>> {
    let timeout = Duration::from_secs(config.request_timeout.value);
    let arc = Arcanist::new(
        config.arc_command.value.clone(),
        timeout,
        config.repo_dir_prefix.value.clone(),
    );
    Mirror::new(
        DiffReconciler::new(arc).with_lint_timeout(timeout),
        MirrorOptions {
            sync_to_remote: config.sync_to_remote.value,
            remote: config.remote.value.clone(),
        },
    )
}

// ==================== config ====================

impl CommandResult for ResolvedConfig {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if let Some(ref path) = self.config_path {
            lines.push(format!("Config file: {}", path));
        }
        lines.push(format!(
            "  search-dir       {} ({})",
            self.search_dir.value.display(),
            self.search_dir.source
        ));
        lines.push(format!(
            "  sync-period      {}s ({})",
            self.sync_period.value, self.sync_period.source
        ));
        lines.push(format!(
            "  sync-to-remote   {} ({})",
            self.sync_to_remote.value, self.sync_to_remote.source
        ));
        lines.push(format!(
            "  remote           {} ({})",
            self.remote.value, self.remote.source
        ));
        lines.push(format!(
            "  arc-command      {} ({})",
            self.arc_command.value, self.arc_command.source
        ));
        lines.push(format!(
            "  request-timeout  {}s ({})",
            self.request_timeout.value, self.request_timeout.source
        ));
        lines.push(format!(
            "  repo-dir-prefix  {} ({})",
            self.repo_dir_prefix.value, self.repo_dir_prefix.source
        ));
        lines.join("\n")
    }
}

// ==================== once ====================

/// Result of `review-mirror once`.
#[derive(Debug, Serialize)]
pub struct OnceResult {
    pub passes: Vec<PassSummary>,
}

impl CommandResult for OnceResult {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.passes.is_empty() {
            return "No repositories found.".to_string();
        }
        let mut lines = vec![format!("Mirrored {} repositories:", self.passes.len())];
        for pass in &self.passes {
            let state = if pass.dirty { "changed" } else { "unchanged" };
            lines.push(format!(
                "  {} [{}] reviews: {}, open remote: {}, comments appended: {}{}",
                pass.repo,
                state,
                pass.reviews,
                pass.open_reviews,
                pass.comments_appended,
                if pass.pushed { ", pushed" } else { "" }
            ));
        }
        lines.join("\n")
    }
}

/// Open the given repositories, or discover them under the search directory.
pub fn collect_repos(search_dir: &Path, explicit: &[PathBuf]) -> Result<Vec<GitRepo>> {
    if explicit.is_empty() {
        return storage::find_repos(search_dir);
    }
    explicit.iter().map(|p| GitRepo::open(p)).collect()
}

/// Run one pass over every repository, stopping early if `stop` is raised.
pub fn mirror_all<T: ReviewTool>(
    mirror: &mut Mirror<T>,
    repos: &[GitRepo],
    stop: &AtomicBool,
) -> Result<Vec<PassSummary>> {
    let mut passes = Vec::new();
    for repo in repos {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        passes.push(mirror.mirror_repo(repo)?);
    }
    Ok(passes)
}

/// `review-mirror once`
pub fn run_once(config: &ResolvedConfig, repos: &[PathBuf]) -> Result<OnceResult> {
    let repos = collect_repos(&config.search_dir.value, repos)?;
    let mut mirror = build_mirror(config);
    let stop = AtomicBool::new(false);
    Ok(OnceResult {
        passes: mirror_all(&mut mirror, &repos, &stop)?,
    })
}

/// `review-mirror run`
///
/// Repositories are rediscovered on every iteration so new ones are picked
/// up without a restart. Iterations start at most once per sync period.
pub fn run_loop(config: &ResolvedConfig, stop: &AtomicBool) -> Result<()> {
    let mut mirror = build_mirror(config);
    let period = Duration::from_secs(config.sync_period.value);
    tracing::info!(
        search_dir = %config.search_dir.value.display(),
        period_secs = period.as_secs(),
        sync_to_remote = config.sync_to_remote.value,
        "starting mirror loop"
    );

    poll_every(period, stop, || {
        let repos = storage::find_repos(&config.search_dir.value)?;
        tracing::debug!(count = repos.len(), "discovered repositories");
        mirror_all(&mut mirror, &repos, stop).map(|_| ())
    })?;
    tracing::info!("stopping mirror loop");
    Ok(())
}

/// Run `pass` until `stop` is raised, starting at most one pass per `period`.
fn poll_every<F>(period: Duration, stop: &AtomicBool, mut pass: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        pass()?;
        sleep_until(started + period, stop);
    }
    Ok(())
}

/// Sleep until `deadline`, waking early when `stop` is raised.
fn sleep_until(deadline: Instant, stop: &AtomicBool) {
    const TICK: Duration = Duration::from_millis(200);
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(TICK.min(deadline - now));
    }
}
