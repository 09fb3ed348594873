//! droidpack - Android packaging with a persistent pre-dex cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use droidpack::cli::{Cli, Commands};
use droidpack::config::{Config, ConfigManager};
use droidpack::error::{DroidpackError, DroidpackResult};
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

async fn run() -> DroidpackResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir().map_err(|e| DroidpackError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    report_config_source(cli.no_local, local_config_path);

    // Dispatch to command
    match cli.command {
        Commands::Predex(args) => droidpack::cli::commands::predex(args, &config).await,
        Commands::Package(args) => droidpack::cli::commands::package(args, &config).await,
        Commands::Cache(args) => droidpack::cli::commands::cache(args, &config).await,
        Commands::Config(args) => droidpack::cli::commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `general.verbose` raises the floor to info
fn init_logging(verbose: u8, config: &Config) {
    let level = if config.general.verbose { verbose.max(1) } else { verbose };
    let filter = match level {
        0 => EnvFilter::new("droidpack=warn"),
        1 => EnvFilter::new("droidpack=info"),
        _ => EnvFilter::new("droidpack=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn report_config_source(no_local: bool, local: Option<PathBuf>) {
    if no_local {
        debug!("Local config discovery disabled (--no-local)");
    } else if let Some(path) = local {
        debug!("Found local config: {}", path.display());
    }
}
