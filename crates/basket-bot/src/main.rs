//! basket-bot - Entry Point
//!
//! Watches aggregate unrealized PnL and closes every open position once the
//! configured take-profit target is reached.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Take-profit auto-close bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via BASKET_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    basket_telemetry::init_logging()?;

    info!("Starting basket-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > BASKET_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("BASKET_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = basket_bot::AppConfig::from_file(&config_path)?;
    info!(
        enabled = config.monitor.enabled,
        target = %config.target,
        positions = config.simulation.positions.len(),
        "Configuration loaded"
    );

    let app = basket_bot::Application::new(config)?.with_config_path(config_path);
    app.run().await?;

    Ok(())
}
