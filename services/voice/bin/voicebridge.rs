//! Main Entrypoint for the Voicebridge Voice Agent
//!
//! `voicebridge run`:
//! 1. Loads configuration from the environment.
//! 2. Opens the microphone and speaker and negotiates the realtime session.
//! 3. Answers the model's tool calls until Ctrl+C or the peer hangs up.
//!
//! `voicebridge tools` prints the tool declarations to register with the
//! model's session configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use voicebridge_core::tools::ToolDispatcher;
use voicebridge_realtime::config::Config;
use voicebridge_realtime::rtc::RtcTransportFactory;
use voicebridge_realtime::{SessionController, SessionError};
use voicebridge_voice::audio::CpalMediaBridge;

#[derive(Parser)]
#[command(version, about = "Realtime voice agent with webhook-backed tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice session and keep it running until Ctrl+C.
    Run,
    /// Print the tool declarations as JSON.
    Tools,
}

/// Listens for the `Ctrl+C` signal.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Ending session...");
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        model = %config.model,
        subscribe_relay = config.subscribe_webhook.is_some(),
        contact_relay = config.contact_webhook.is_some(),
        "Configuration loaded"
    );

    let mut controller = SessionController::from_config(
        &config,
        Arc::new(CpalMediaBridge::new()),
        Arc::new(RtcTransportFactory::new(config.ice_servers.clone())),
    );

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    match controller.start_with_cancel(&cancel).await {
        Ok(()) => {}
        Err(SessionError::Cancelled) => return Ok(()),
        Err(e) => return Err(e).context("Failed to start voice session"),
    }
    info!("Listening. Press Ctrl+C to hang up.");

    tokio::select! {
        _ = controller.run() => warn!("Session ended by the remote peer"),
        _ = cancel.cancelled() => {}
    }
    controller.stop().await;

    info!("Session closed.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Run => run().await,
        Command::Tools => {
            let definitions = ToolDispatcher::unconfigured().definitions();
            println!("{}", serde_json::to_string_pretty(&definitions)?);
            Ok(())
        }
    }
}
