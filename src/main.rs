//! lfx - content-addressed cache for large artifacts
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use lfx::cli::{Cli, Commands};
use lfx::config::{Config, ConfigManager};
use lfx::error::LfxResult;
use std::process::ExitCode;
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

async fn run() -> LfxResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Fetch(args) => lfx::cli::commands::fetch(args, &config).await,
        Commands::Pointer(args) => lfx::cli::commands::pointer(args, &config).await,
        Commands::Effort(args) => lfx::cli::commands::effort(args, &config).await,
        Commands::Cache(args) => lfx::cli::commands::cache(args, &config).await,
        Commands::Config(args) => lfx::cli::commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn (bars only), 1 = info, 2+ = debug; `general.verbose` counts as -v
fn init_logging(verbose: u8, config: &Config) {
    let level = verbose.max(u8::from(config.general.verbose));
    let filter = match level {
        0 => EnvFilter::new("lfx=warn"),
        1 => EnvFilter::new("lfx=info"),
        _ => EnvFilter::new("lfx=debug"),
    };

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
