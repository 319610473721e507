//! review-mirror CLI - keeps git-notes code reviews and a Differential review tool in sync.

use clap::Parser;
use review_mirror::cli::{Cli, Commands};
use review_mirror::commands::{self, CommandResult};
use review_mirror::config::resolve_config;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    init_logging(cli.verbose);
    tracing::debug!(
        commit = env!("RM_GIT_COMMIT"),
        built = env!("RM_BUILD_TIMESTAMP"),
        "review-mirror {}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run_command(cli, human) {
        tracing::error!(error = %e, "review-mirror failed");
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine readable.
fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(cli: Cli, human: bool) -> review_mirror::Result<()> {
    let overrides = commands::overrides_from(cli.config, &cli.settings);
    let config = resolve_config(&overrides)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                tracing::info!("interrupt received, finishing current repository");
                handler_stop.store(true, Ordering::SeqCst);
            })
            .map_err(|e| review_mirror::Error::Other(format!("installing signal handler: {}", e)))?;
            commands::run_loop(&config, &stop)?;
        }
        Commands::Once { repos } => {
            let result = commands::run_once(&config, &repos)?;
            output(&result, human);
        }
        Commands::Config => output(&config, human),
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: CommandResult>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
