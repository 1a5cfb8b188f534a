//! Vokal CLI entry point.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vokal::cli::{commands, Cli, Commands};
use vokal::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("vokal={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    // Execute command
    match &cli.command {
        Commands::Process {
            input,
            title,
            publish,
            keep,
        } => {
            commands::run_process(input, title.clone(), *publish, *keep, settings).await?;
        }

        Commands::Schedule { dry_run } => {
            commands::run_schedule(*dry_run, settings).await?;
        }

        Commands::List => {
            commands::run_list(settings)?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings)?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings)?;
        }
    }

    Ok(())
}
