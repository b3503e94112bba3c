//! WebSDR Audio Client
//!
//! Connects to a receiver's audio socket and plays it on a local output.
//!
//! Usage: `websdr-client [ws-url] [receiver-id]`. A config file may be
//! given with `WEBSDR_CLIENT_CONFIG`.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use websdr_audio_client::{
    audio::{list_output_devices, CpalBackend},
    client::{AudioClient, ClientCommand, ClientIo, ClientSnapshot},
    codec::NativeDspFactory,
    config::AppConfig,
    network::{TransportChannel, TransportConfig},
    ui::{AppState, WebServer},
};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting WebSDR audio client");

    let config_path = std::env::var_os("WEBSDR_CLIENT_CONFIG").map(PathBuf::from);
    let mut config = AppConfig::load(config_path.as_deref())?;
    let mut args = std::env::args().skip(1);
    if let Some(url) = args.next() {
        config.server.url = url;
    }
    if let Some(receiver_id) = args.next() {
        config.server.receiver_id = Some(receiver_id);
    }

    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport = TransportChannel::spawn(
        TransportConfig::new(config.server.url.clone(), config.server.connect_timeout_ms),
        event_tx,
    )?;
    tracing::info!("Connecting to {}", config.server.url);

    let client = AudioClient::new(
        CpalBackend::new(config.audio.output_device.clone()),
        NativeDspFactory,
        Box::new(transport.handle()),
        config.audio.clone(),
    )
    .with_receiver(config.server.receiver_id.clone())
    .with_user_id(config.server.user_id.clone());

    let (snapshot_tx, snapshot_rx) = watch::channel(client.snapshot());
    let (health_tx, health_rx) = watch::channel(client.health());
    let (recording_tx, recording_rx) = watch::channel(client.last_recording());
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    if config.ui.enabled {
        let state = AppState {
            snapshot: snapshot_rx.clone(),
            health: health_rx,
            recording: recording_rx,
            commands: command_tx.clone(),
        };
        let _web_handle = WebServer::new(config.ui.clone(), state).start_background();
    }

    let shutdown_tx = command_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            let _ = shutdown_tx.send(ClientCommand::Shutdown);
        }
    });

    tokio::spawn(log_stats(snapshot_rx));

    // Starting from the command line is the user gesture
    let _ = command_tx.send(ClientCommand::Resume);

    let io = ClientIo {
        events: event_rx,
        commands: command_rx,
        snapshot: snapshot_tx,
        health: health_tx,
        recording: recording_tx,
    };
    client.run(transport, io).await?;

    tracing::info!("Client stopped");
    Ok(())
}

async fn log_stats(mut snapshots: watch::Receiver<ClientSnapshot>) {
    let mut interval = tokio::time::interval(STATS_LOG_INTERVAL);
    loop {
        interval.tick().await;
        if snapshots.has_changed().is_err() {
            break;
        }
        let snap = snapshots.borrow_and_update().clone();
        let stats = &snap.stats;
        tracing::info!(
            "{:?} {} @ {:?} Hz: {} packets, {} dropped, latency {:.0}/{:.0} ms, health {:.2}{}",
            snap.status,
            snap.mode,
            snap.frequency_hz,
            stats.packets_received,
            stats.packets_dropped,
            stats.current_latency_ms,
            stats.target_latency_ms,
            stats.buffer_health,
            snap.power_db
                .map(|db| format!(", S {:.1} dB", db))
                .unwrap_or_default(),
        );
        if snap.needs_user_gesture {
            tracing::warn!("Output is suspended; POST /api/resume to start playback");
        }
    }
}
