//! # mbridge
//!
//! Bridges producer status on an MQTT bus to browser clients over
//! WebSocket, and forwards client commands back to producers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! mbridge
//!
//! # Run with custom config
//! mbridge --config /path/to/mbridge.toml
//!
//! # Run with environment variables
//! MBRIDGE_PORT=8080 MBRIDGE_MQTT_HOST=broker.local mbridge
//! ```

mod config;
mod handlers;
mod media;
mod metrics;
mod mixer;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mbridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path_arg(std::env::args().skip(1))? {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(
        "Starting mbridge on {}:{} (broker {}:{})",
        config.host,
        config.port,
        config.mqtt.host,
        config.mqtt.port
    );

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Extract `--config <path>` (or `--config=<path>`) from the arguments.
fn config_path_arg(mut args: impl Iterator<Item = String>) -> Result<Option<String>> {
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(path.to_string()));
        }
        if arg == "--config" {
            return match args.next() {
                Some(path) => Ok(Some(path)),
                None => bail!("--config requires a path"),
            };
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|s| (*s).to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_config_path_arg() {
        assert_eq!(config_path_arg(args(&[])).unwrap(), None);
        assert_eq!(
            config_path_arg(args(&["--config", "a.toml"])).unwrap(),
            Some("a.toml".to_string())
        );
        assert_eq!(
            config_path_arg(args(&["--config=b.toml"])).unwrap(),
            Some("b.toml".to_string())
        );
        assert!(config_path_arg(args(&["--config"])).is_err());
    }
}
