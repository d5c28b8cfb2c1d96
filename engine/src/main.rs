// Quill creative-writing engine
// Main entry point for the quill binary

use clap::Parser;
use quill_engine::cli::{Cli, Command};
use quill_engine::config::Config;
use quill_engine::handlers::{
    handle_check, handle_config, handle_doctor, handle_run, OutputFormat,
};
use quill_engine::telemetry::{init_telemetry, TelemetryOptions, LOG_FORMAT_ENV};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log beats the config level; RUST_LOG beats both
    let log_format = std::env::var(LOG_FORMAT_ENV).ok();
    init_telemetry(&TelemetryOptions::resolve(
        cli.log.as_deref(),
        &config.core.log_level,
        log_format.as_deref(),
    ));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::debug!("Quill Engine v{} ({} - {})", version, commit, timestamp);

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Handle commands
    match cli.command {
        Command::Run {
            query,
            tier,
            request,
            kb,
        } => {
            tracing::info!("Running pipeline at tier {}", tier);
            handle_run(query, tier, request, kb, &config, format).await
        }

        Command::Check {
            draft,
            request,
            tier,
            max_length,
        } => handle_check(draft, request, tier, max_length, &config, format).await,

        Command::Config { action } => {
            tracing::debug!("Config management: {:?}", action);
            handle_config(action, &config, cli.config.as_deref(), format)
        }

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
