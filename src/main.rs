//! Harbor - single-build coordination and response caching
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use harbor::cli::commands::application_dir;
use harbor::cli::{Cli, Commands};
use harbor::config::{self, Config, ConfigManager};
use harbor::error::HarborResult;
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

async fn run() -> HarborResult<()> {
    let cli = Cli::parse();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // The application's harbor.toml sits next to its code
    let local_config_path = if cli.no_local {
        None
    } else {
        let app_dir = application_dir(cli.command.app_dir()).await?;
        ConfigManager::find_local_config(&app_dir)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;
    config::validate(&config)?;

    init_logging(cli.verbose, &config);
    if let Some(ref path) = local_config_path {
        debug!("Loaded local config: {}", path.display());
    }

    match cli.command {
        Commands::Build(args) => harbor::cli::commands::build(args, &config).await,
        Commands::Verify(args) => harbor::cli::commands::verify(args).await,
        Commands::Cache(args) => harbor::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            harbor::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("harbor=warn"),
        1 => EnvFilter::new("harbor=info"),
        _ => EnvFilter::new("harbor=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
