//! tickstream - real-time market data transport.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

/// Real-time market data stream with reconnection and HTTP fallback
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    tickstream_ws::init_crypto();

    let args = Args::parse();

    // Logging is configured from the file, so load it first.
    let config_path = tickstream_app::AppConfig::resolve_path(args.config);
    let config_found = std::path::Path::new(&config_path).exists();
    let config = tickstream_app::AppConfig::load(&config_path)?;

    tickstream_telemetry::init_logging_with(&config.telemetry.log_level)?;

    info!("Starting tickstream v{}", env!("CARGO_PKG_VERSION"));
    if config_found {
        info!(config_path = %config_path, "Configuration loaded");
    } else {
        warn!(config_path = %config_path, "Config file not found, using defaults");
    }
    info!(url = %config.ws_url, symbols = ?config.symbols, "Streaming configuration");

    let app = tickstream_app::Application::new(config)?;
    let summary = app.run().await?;
    info!(
        stream_messages = summary.stream_messages,
        fallback_messages = summary.fallback_messages,
        quality = %summary.quality,
        "Exited"
    );

    Ok(())
}
