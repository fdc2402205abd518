//! # slipstream-relay
//!
//! Relay server binary — parses the CLI, wires up logging and metrics, and
//! runs the server until ctrl-c.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use slipstream_server::config::ServerConfig;
use slipstream_server::server::RelayServer;

/// Slipstream state-synchronization relay server.
#[derive(Parser, Debug)]
#[command(name = "slipstream-relay", about = "Slipstream state-synchronization relay server")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Minimum log level (overridden by `RUST_LOG`).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seconds between server-initiated pings.
    #[arg(long)]
    heartbeat_interval_secs: Option<u64>,

    /// Seconds without a pong before a client is disconnected.
    #[arg(long)]
    heartbeat_timeout_secs: Option<u64>,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig {
            host: self.host,
            port: self.port,
            ..ServerConfig::default()
        };
        if let Some(interval) = self.heartbeat_interval_secs {
            config.heartbeat_interval_secs = interval;
        }
        if let Some(timeout) = self.heartbeat_timeout_secs {
            config.heartbeat_timeout_secs = timeout;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    slipstream_core::logging::init_subscriber(&args.log_level);

    let metrics_handle = slipstream_server::metrics::install_recorder();
    let config = args.into_config();

    let server = RelayServer::new(config, metrics_handle);
    let (addr, serve_task) = server
        .listen()
        .await
        .context("failed to start relay server")?;
    tracing::info!(%addr, "slipstream relay up");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    server.shutdown().graceful_shutdown(vec![serve_task], None).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["slipstream-relay"]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.log_level, "info");
        assert!(cli.heartbeat_interval_secs.is_none());
    }

    #[test]
    fn cli_overrides_flow_into_config() {
        let cli = Cli::parse_from([
            "slipstream-relay",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--heartbeat-interval-secs",
            "5",
            "--heartbeat-timeout-secs",
            "15",
        ]);
        let config = cli.into_config();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.heartbeat_timeout_secs, 15);
        // untouched defaults survive
        assert_eq!(config.send_queue_depth, 256);
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["slipstream-relay", "--port", "not_a_port"]).is_err());
    }
}
