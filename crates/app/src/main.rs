use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_pipeline::config::AppConfig;
use voice_pipeline::wiring;

/// CLI surface of the core runtime: none beyond start/stop (spec §6);
/// the surrounding tray application is out of scope here.
#[derive(Parser)]
#[command(name = "voice-pipelined", about = "Hotkey-triggered pipeline runtime")]
struct Cli {
    /// Path to the TOML pipeline configuration. Defaults to
    /// `<user config dir>/voice-pipeline/pipelines.toml`.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

fn default_config_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("voice-pipeline")
        .join("pipelines.toml")
}

#[derive(Subcommand)]
enum CliCommand {
    /// Load the configuration, start the hotkey listener, and run until
    /// interrupted. Default when no subcommand is given.
    Start,
    /// Validate the configuration without starting anything.
    Stop,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command.unwrap_or(CliCommand::Start) {
        CliCommand::Start => run(&config_path).await,
        CliCommand::Stop => {
            tracing::info!("nothing to stop: each invocation owns its own process lifetime");
            Ok(())
        }
    }
}

async fn run(config_path: &std::path::Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!(config = %config_path.display(), "loading configuration");
    let config = AppConfig::load(config_path)?;

    let registry = wiring::build_registry()?;
    let manager = std::sync::Arc::new(wiring::build_manager(registry, &config, config.max_workers)?);
    tracing::info!(pipelines = manager.list_pipelines().count(), "pipelines loaded");

    let platform_info = wiring::detect_platform();
    tracing::info!(
        display_server = ?platform_info.display_server,
        compositor = ?platform_info.compositor,
        "platform detected"
    );

    let mut listener = wiring::start_hotkey_listener(std::sync::Arc::clone(&manager), &platform_info)?;
    tracing::info!("hotkey listener started; waiting for Ctrl+C");

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutdown signal received");
    listener.stop();
    manager.shutdown(Duration::from_secs(config.shutdown_timeout_secs))?;

    tracing::info!("voice pipeline stopped gracefully");
    Ok(())
}
