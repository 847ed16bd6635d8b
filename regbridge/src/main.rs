//! Zenoh bridge for a serial-attached microcontroller.
//!
//! Polls the device's registers over a newline-delimited text protocol and
//! publishes them to Zenoh as named channels.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use regbridge::bridge::Bridge;
use regbridge::config::RegBridgeConfig;
use regbridge::link::SerialConnector;
use regbridge::zenoh_host::ZenohHost;
use regbridge_common::{BridgeConfig, BridgeStatus};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const BRIDGE_NAME: &str = "regbridge";

/// Zenoh bridge for serial microcontroller registers.
#[derive(Parser, Debug)]
#[command(name = "regbridge")]
#[command(about = "Polls a serial microcontroller and publishes its registers to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the serial port.
    #[arg(short, long)]
    port: Option<String>,

    /// Override the baud rate.
    #[arg(short, long)]
    baud_rate: Option<u32>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<RegBridgeConfig> {
    let mut config = match &args.config {
        Some(path) => RegBridgeConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => RegBridgeConfig::default(),
    };

    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud_rate) = args.baud_rate {
        config.serial.baud_rate = baud_rate;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn wait_for_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Cannot listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    regbridge_common::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting {}", BRIDGE_NAME);
    info!(
        port = %config.serial.port,
        baud_rate = config.serial.baud_rate,
        device = %config.bridge.device,
        poll_interval_ms = config.bridge.poll_interval_ms,
        "Configuration loaded"
    );

    info!("Connecting to Zenoh...");
    let session = regbridge_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
    let session = Arc::new(session);
    info!("Connected to Zenoh");

    let definitions = config.channels.definitions();
    let channel_ids: Vec<String> = definitions.iter().map(|d| d.id.clone()).collect();
    let host = Arc::new(ZenohHost::new(
        session.clone(),
        &config.bridge,
        definitions,
    ));

    if let Err(e) = host.announce_channels().await {
        warn!(error = %e, "Failed to announce channels");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(64);

    let listener_host = host.clone();
    let listener = tokio::spawn(async move {
        if let Err(e) = listener_host.listen_commands(command_tx, shutdown_rx).await {
            error!("Command listener error: {}", e);
        }
    });

    let connector = Arc::new(SerialConnector::new(config.serial.clone()));
    let bridge = Bridge::start(host.clone(), connector, &config.bridge, command_rx)
        .await
        .context("Failed to start bridge")?;

    let metadata = serde_json::json!({
        "device": config.bridge.device,
        "port": config.serial.port,
        "channels": channel_ids,
        "encoding": config.bridge.serialization.mime_type(),
    });

    let status = BridgeStatus::running(BRIDGE_NAME, env!("CARGO_PKG_VERSION"))
        .with_metadata(metadata.clone());
    if let Err(e) = host.publish_status(&status).await {
        error!("Failed to publish bridge status: {}", e);
    }

    info!(link = %bridge.link_state(), "Bridge running");

    wait_for_signal().await;

    bridge.shutdown().await;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), listener).await;

    let status =
        BridgeStatus::offline(BRIDGE_NAME, env!("CARGO_PKG_VERSION")).with_metadata(metadata);
    let _ = host.publish_status(&status).await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("{} stopped", BRIDGE_NAME);

    Ok(())
}
