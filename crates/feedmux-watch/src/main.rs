//! Terminal feed watcher - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Subscribe to feed channels and log inbound data.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FEEDMUX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the feed endpoint URL from the config file
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any connections)
    feedmux::init_crypto();

    let args = Args::parse();

    feedmux_telemetry::init_logging()?;

    info!("Starting feedmux-watch v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("FEEDMUX_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = feedmux_watch::AppConfig::from_file(&config_path)?;
    if let Some(url) = args.url {
        config.ws_url = url;
    }
    info!(ws_url = %config.ws_url, channels = config.channels.len(), "Configuration loaded");

    let app = feedmux_watch::Application::new(config);
    app.run().await?;

    Ok(())
}
