//! depcache - lockfile-keyed dependency cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use depcache::cli::args::CacheAction;
use depcache::cli::{Cli, Commands};
use depcache::config::{Config, ConfigManager};
use depcache::error::{DepcacheError, DepcacheResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> DepcacheResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let start = match discovery_root(&cli.command) {
            Some(dir) => dir,
            None => std::env::current_dir()
                .map_err(|e| DepcacheError::io("getting current directory", e))?,
        };
        ConfigManager::find_local_config(&start)
    };

    let mut config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;
    config.apply_process_env();

    init_logging(cli.verbose, &config);
    if let Some(ref path) = local_config_path {
        debug!("Merged local config: {}", path.display());
    }

    match cli.command {
        Commands::Install(args) => depcache::cli::commands::install(args, &config).await,
        Commands::Cache(args) => depcache::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            depcache::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// Directory to start local config discovery from, when the command names one
fn discovery_root(command: &Commands) -> Option<PathBuf> {
    match command {
        Commands::Install(args) => args.project.clone(),
        Commands::Cache(args) => match &args.action {
            CacheAction::Status { project, .. } => project.clone(),
            _ => None,
        },
        Commands::Config(_) => None,
    }
}

/// Logging: 0 = warn (spinners only), 1 = info, 2+ = debug.
/// `general.verbose` raises the floor to info; `RUST_LOG` overrides both.
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose {
        0 if config.general.verbose => "info",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("depcache={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
