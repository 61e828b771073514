//! Command-line participant for Wayfarer.
//!
//! Two subcommands:
//!
//! - `track`: join the relay, share this device's position and log peers as
//!   they move on a console map.
//! - `alert`: run the emergency countdown, then notify the configured
//!   contacts unless Ctrl-C cancels it.
//!
//! All settings come from the environment; see [`config`].

mod config;
mod console_map;
mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wayfarer_core::sampler::Fix;
use wayfarer_core::{
    AlertDispatcher, AlertOutcome, BatteryGauge, GpsdProvider, LiveTracker, LocationProvider,
    MapOptions, MapSurface, MapView, PeerRegistry, RelayClient, ReplayProvider, Sampler,
    TrackerHandle, WsTransport, event_channel,
};
use wayfarer_types::{AlertPayload, Handshake, ParticipantId, UserInfo};

use crate::config::{ClientConfig, LocationSource};
use crate::console_map::ConsoleMap;
use crate::error::ClientError;

/// Zoom level before the first fix arrives.
const WORLD_ZOOM: f64 = 2.0;

#[derive(Debug, Parser)]
#[command(name = "wayfarer-client", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Share this device's location and follow everyone else's.
    Track {
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
        /// How often to log the participant list.
        #[arg(long, default_value_t = 30)]
        report_every_secs: u64,
    },
    /// Send an emergency alert to the configured contacts.
    Alert {
        /// Seconds to wait, cancellable with Ctrl-C, before sending.
        #[arg(long, default_value_t = 3)]
        countdown_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env().context("loading client configuration")?;
    info!(
        relay_url = %config.relay_url,
        alert_endpoint = %config.alert_endpoint,
        map_style = %config.map_style,
        source = ?config.location_source,
        "configuration loaded"
    );

    match cli.command {
        Command::Track {
            duration_secs,
            report_every_secs,
        } => {
            track(
                &config,
                duration_secs.map(Duration::from_secs),
                Duration::from_secs(report_every_secs.max(1)),
            )
            .await
        }
        Command::Alert { countdown_secs } => {
            alert(&config, Duration::from_secs(countdown_secs)).await
        }
    }
}

// ---------------------------------------------------------------------------
// track
// ---------------------------------------------------------------------------

async fn track(
    config: &ClientConfig,
    duration: Option<Duration>,
    report_every: Duration,
) -> anyhow::Result<()> {
    let participant = config
        .participant_id
        .clone()
        .unwrap_or_else(ParticipantId::generate);
    let api_key = config.require_map_api_key()?;
    info!(participant = %participant, name = %config.display_name, "starting tracker");

    let provider = location_provider(&config.location_source)?;
    let sampler = Sampler::new(participant.clone(), provider, BatteryGauge::detect());

    let mut registry = PeerRegistry::new(participant.clone());
    let map = MapSurface::new(
        ConsoleMap::default(),
        &MapOptions {
            style: config.map_style.clone(),
            api_key: api_key.to_owned(),
            initial_view: MapView {
                longitude: 0.0,
                latitude: 0.0,
                zoom: WORLD_ZOOM,
            },
            follow_self: true,
        },
    );
    registry.subscribe(Box::new(map));

    let (sink, source) = event_channel();
    let relay = RelayClient::new(
        WsTransport::new(config.relay_url.clone(), sink),
        Handshake {
            participant_id: participant,
            display_name: config.display_name.clone(),
        },
    );
    let (tracker, handle) = LiveTracker::new(registry, relay, source, sampler, config.peer_ttl);
    let loop_task = tracker.spawn();
    let status_task = tokio::spawn(log_status_changes(handle.clone()));

    handle.connect().await.map_err(ClientError::from)?;
    handle
        .start_tracking(config.tracking.clone())
        .await
        .map_err(ClientError::from)
        .context("starting location tracking")?;

    let stop = async {
        match duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for Ctrl-C");
                }
            }
        }
    };
    tokio::pin!(stop);

    let mut report = tokio::time::interval(report_every);
    loop {
        tokio::select! {
            () = &mut stop => break,
            _ = report.tick() => report_peers(&handle).await?,
        }
    }

    info!("stopping tracker");
    handle.shutdown().await.map_err(ClientError::from)?;
    status_task.abort();
    if let Err(e) = loop_task.await {
        warn!(error = %e, "tracker task did not exit cleanly");
    }
    Ok(())
}

fn location_provider(source: &LocationSource) -> Result<Arc<dyn LocationProvider>, ClientError> {
    match source {
        LocationSource::Gpsd(addr) => Ok(Arc::new(GpsdProvider::new(addr.clone()))),
        LocationSource::Replay(path) => {
            let fixes = load_replay(path)?;
            info!(path = %path.display(), fixes = fixes.len(), "replaying recorded fixes");
            Ok(Arc::new(ReplayProvider::from_fixes(fixes)))
        }
    }
}

/// Read a JSON array of fixes.
fn load_replay(path: &Path) -> Result<Vec<Fix>, ClientError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ClientError::Replay(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ClientError::Replay(format!("{}: {e}", path.display())))
}

async fn report_peers(handle: &TrackerHandle) -> Result<(), ClientError> {
    let peers = handle.snapshot().await?;
    let connection = handle.connection_status().borrow().state;
    let tracking = handle.tracking_status().borrow().clone();
    info!(
        connection = %connection,
        tracking = ?tracking,
        participants = peers.len(),
        "status"
    );
    for entry in &peers {
        info!(
            participant = %entry.participant_id,
            you = entry.is_self,
            lat = entry.latest.latitude,
            lon = entry.latest.longitude,
            accuracy_m = entry.latest.accuracy,
            battery = ?entry.latest.battery_level,
            "peer"
        );
    }
    Ok(())
}

async fn log_status_changes(handle: TrackerHandle) {
    let mut connection = handle.connection_status();
    let mut tracking = handle.tracking_status();
    loop {
        tokio::select! {
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = connection.borrow_and_update().clone();
                match status.last_error {
                    Some(err) => warn!(state = %status.state, error = %err, "relay connection"),
                    None => info!(state = %status.state, "relay connection"),
                }
            }
            changed = tracking.changed() => {
                if changed.is_err() {
                    break;
                }
                info!(status = ?*tracking.borrow_and_update(), "tracking");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// alert
// ---------------------------------------------------------------------------

async fn alert(config: &ClientConfig, countdown: Duration) -> anyhow::Result<()> {
    if config.emergency_contacts.is_empty() {
        return Err(ClientError::Config(String::from(
            "EMERGENCY_CONTACTS must name at least one address",
        ))
        .into());
    }

    let payload = AlertPayload::new(
        UserInfo {
            name: config.display_name.clone(),
            phone: config.user_phone.clone(),
            location: config.user_location.clone(),
        },
        config.emergency_contacts.clone(),
        Utc::now(),
    );

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });

    warn!(
        countdown_secs = countdown.as_secs(),
        contacts = payload.emergency_contacts.len(),
        "emergency alert armed, press Ctrl-C to cancel"
    );
    let dispatcher = AlertDispatcher::new(config.alert_endpoint.clone());
    let outcome = dispatcher
        .send_after_countdown(&payload, countdown, cancel_rx)
        .await;
    watcher.abort();

    match outcome {
        AlertOutcome::Cancelled => info!("alert cancelled, nothing sent"),
        AlertOutcome::Dispatched(result) => {
            let delivery = result
                .map_err(ClientError::from)
                .context("sending emergency alert")?;
            if let Some(summary) = &delivery.summary {
                for result in summary.results.iter().filter(|r| !r.success) {
                    warn!(
                        contact = %result.contact,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "contact not notified"
                    );
                }
            }
            info!(
                status = delivery.status,
                partial = delivery.is_partial(),
                "alert sent"
            );
        }
    }
    Ok(())
}
