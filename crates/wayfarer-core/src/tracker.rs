//! The live tracker event loop.
//!
//! [`LiveTracker`] is the single task that owns a client's mutable state:
//! the [`PeerRegistry`], the [`RelayClient`] and the active [`SampleHandle`].
//! It processes, one at a time and in arrival order:
//!
//! - commands from any number of [`TrackerHandle`]s,
//! - transport events (tagged with their connection generation),
//! - sampler events,
//! - the optional idle-peer prune tick.
//!
//! Because nothing else touches the registry, no locking is needed.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Interval;
use tracing::{debug, info, warn};
use wayfarer_types::{ConnectionStatus, PeerEntry, TrackingConfiguration};

use crate::error::{SamplerError, TrackerError};
use crate::registry::PeerRegistry;
use crate::relay::{RelayClient, RelayTransport};
use crate::sampler::{SampleHandle, Sampler, SamplerEvent};
use crate::transport::EventSource;

/// Capacity of the command queue.
const COMMAND_BUFFER: usize = 64;

/// Transport events handled back to back before a pending command gets a
/// turn.
const TRANSPORT_BURST: usize = 64;

/// Where local position tracking currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackingStatus {
    /// Not tracking.
    #[default]
    Idle,
    /// Watch started; no fix yet.
    Acquiring,
    /// Receiving fixes.
    Active {
        /// Timestamp of the latest fix, ms since the epoch.
        last_fix_ms: i64,
    },
    /// The watch is running but the last attempt failed.
    Degraded {
        /// Description of the failure.
        error: String,
    },
    /// The platform cannot provide locations.
    Unsupported,
}

enum Command {
    Connect,
    Disconnect,
    StartTracking {
        config: TrackingConfiguration,
        reply: oneshot::Sender<Result<(), SamplerError>>,
    },
    StopTracking,
    Snapshot(oneshot::Sender<Vec<PeerEntry>>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable front end to a running [`LiveTracker`].
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    connection: watch::Receiver<ConnectionStatus>,
    tracking: watch::Receiver<TrackingStatus>,
}

impl TrackerHandle {
    /// Ask the relay client to connect.
    pub async fn connect(&self) -> Result<(), TrackerError> {
        self.send(Command::Connect).await
    }

    /// Ask the relay client to disconnect.
    pub async fn disconnect(&self) -> Result<(), TrackerError> {
        self.send(Command::Disconnect).await
    }

    /// Start (or restart) the position watch.
    ///
    /// Sampler start failures are returned here rather than through the
    /// tracking status alone.
    pub async fn start_tracking(&self, config: TrackingConfiguration) -> Result<(), TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartTracking { config, reply }).await?;
        rx.await.map_err(|_closed| TrackerError::Closed)??;
        Ok(())
    }

    /// Stop the position watch.
    pub async fn stop_tracking(&self) -> Result<(), TrackerError> {
        self.send(Command::StopTracking).await
    }

    /// Copy of the registry, ordered by participant id.
    pub async fn snapshot(&self) -> Result<Vec<PeerEntry>, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_closed| TrackerError::Closed)
    }

    /// Stop tracking, disconnect and end the loop. Waits for cleanup.
    pub async fn shutdown(&self) -> Result<(), TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown(reply)).await?;
        rx.await.map_err(|_closed| TrackerError::Closed)
    }

    /// Relay connection status updates.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.clone()
    }

    /// Tracking status updates.
    pub fn tracking_status(&self) -> watch::Receiver<TrackingStatus> {
        self.tracking.clone()
    }

    async fn send(&self, command: Command) -> Result<(), TrackerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_closed| TrackerError::Closed)
    }
}

/// The client's event loop. Create with [`LiveTracker::new`], then drive
/// [`LiveTracker::run`] on a task.
pub struct LiveTracker<T: RelayTransport> {
    registry: PeerRegistry,
    relay: RelayClient<T>,
    transport_events: EventSource,
    sampler: Sampler,
    samples: Option<SampleHandle>,
    tracking: watch::Sender<TrackingStatus>,
    commands: mpsc::Receiver<Command>,
    peer_ttl: Option<Duration>,
}

impl<T: RelayTransport + 'static> LiveTracker<T> {
    /// Assemble a tracker and the handle that controls it.
    ///
    /// `transport_events` must be the channel the relay's transport reports
    /// on. `peer_ttl` enables periodic removal of silent peers.
    pub fn new(
        registry: PeerRegistry,
        relay: RelayClient<T>,
        transport_events: EventSource,
        sampler: Sampler,
        peer_ttl: Option<Duration>,
    ) -> (Self, TrackerHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (tracking, tracking_rx) = watch::channel(TrackingStatus::Idle);
        let handle = TrackerHandle {
            commands: commands_tx,
            connection: relay.subscribe_status(),
            tracking: tracking_rx,
        };
        let tracker = Self {
            registry,
            relay,
            transport_events,
            sampler,
            samples: None,
            tracking,
            commands,
            peer_ttl,
        };
        (tracker, handle)
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shut down or until every handle is dropped.
    pub async fn run(mut self) {
        let mut prune = self.peer_ttl.map(|ttl| {
            let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        info!(participant = %self.registry.self_id(), ttl = ?self.peer_ttl, "tracker loop started");

        let mut burst: usize = 0;
        let done = loop {
            // Transport events first, so frames that arrived before a
            // command are applied before it. A long run of frames yields to
            // one queued command every TRANSPORT_BURST events.
            tokio::select! {
                biased;
                Some((id, event)) = self.transport_events.recv() => {
                    self.relay.handle(id, event, &mut self.registry);
                    burst = burst.saturating_add(1);
                    if burst >= TRANSPORT_BURST {
                        burst = 0;
                        match self.commands.try_recv() {
                            Ok(Command::Shutdown(done)) => break Some(done),
                            Ok(command) => self.on_command(command),
                            Err(TryRecvError::Disconnected) => break None,
                            Err(TryRecvError::Empty) => {}
                        }
                    }
                }
                command = self.commands.recv() => {
                    burst = 0;
                    match command {
                        Some(Command::Shutdown(done)) => break Some(done),
                        Some(command) => self.on_command(command),
                        None => break None,
                    }
                }
                Some(event) = next_sample(self.samples.as_mut()) => {
                    burst = 0;
                    self.on_sample(event);
                }
                () = tick(prune.as_mut()) => {
                    burst = 0;
                    self.prune();
                }
            }
        };

        self.stop_samples();
        self.relay.disconnect();
        info!("tracker loop stopped");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.relay.connect(),
            Command::Disconnect => self.relay.disconnect(),
            Command::StartTracking { config, reply } => {
                let _ = reply.send(self.start_tracking(&config));
            }
            Command::StopTracking => {
                self.stop_samples();
                self.tracking.send_replace(TrackingStatus::Idle);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn start_tracking(&mut self, config: &TrackingConfiguration) -> Result<(), SamplerError> {
        self.stop_samples();
        match self.sampler.start(config) {
            Ok(handle) => {
                self.samples = Some(handle);
                self.tracking.send_replace(TrackingStatus::Acquiring);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "position tracking not started");
                let status = match e {
                    SamplerError::UnsupportedPlatform => TrackingStatus::Unsupported,
                    SamplerError::Disabled => TrackingStatus::Idle,
                };
                self.tracking.send_replace(status);
                Err(e)
            }
        }
    }

    fn stop_samples(&mut self) {
        if let Some(mut handle) = self.samples.take() {
            handle.stop();
        }
    }

    fn on_sample(&mut self, event: SamplerEvent) {
        match event {
            SamplerEvent::Sample(sample) => {
                self.tracking.send_replace(TrackingStatus::Active {
                    last_fix_ms: sample.timestamp,
                });
                let outcome = self.registry.upsert(sample.clone());
                debug!(?outcome, "local position recorded");
                self.relay.send(&sample);
            }
            SamplerEvent::Error(e) => {
                debug!(error = %e, "position acquisition degraded");
                self.tracking.send_replace(TrackingStatus::Degraded {
                    error: e.to_string(),
                });
            }
        }
    }

    fn prune(&mut self) {
        let Some(ttl) = self.peer_ttl else {
            return;
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        let removed = self.registry.prune_idle(now_ms, ttl);
        if !removed.is_empty() {
            info!(count = removed.len(), "pruned idle peers");
        }
    }
}

impl<T: RelayTransport> core::fmt::Debug for LiveTracker<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LiveTracker")
            .field("registry", &self.registry)
            .field("relay", &self.relay)
            .field("tracking", &*self.tracking.borrow())
            .finish_non_exhaustive()
    }
}

async fn next_sample(samples: Option<&mut SampleHandle>) -> Option<SamplerEvent> {
    match samples {
        Some(handle) => handle.next().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::{Arc, Mutex};

    use wayfarer_types::{
        ClientEvent, ConnectionState, Handshake, ParticipantId, PositionSample, ServerEvent,
    };

    use super::*;
    use crate::battery::BatteryGauge;
    use crate::error::TransportError;
    use crate::relay::{ConnectionId, TransportEvent};
    use crate::sampler::{Fix, NoLocation, ReplayProvider};
    use crate::transport::{EventSink, event_channel};

    /// Transport that reports `Connected` immediately and records frames.
    #[derive(Clone)]
    struct LoopbackTransport {
        events: EventSink,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
    }

    impl RelayTransport for LoopbackTransport {
        fn open(&mut self, id: ConnectionId, _handshake: &Handshake) {
            self.events.send((id, TransportEvent::Connected)).unwrap();
        }

        fn close(&mut self) {}

        fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn fix(ts: i64) -> Fix {
        Fix {
            latitude: 10.0,
            longitude: 20.0,
            accuracy: 5.0,
            heading: None,
            speed: None,
            timestamp: ts,
        }
    }

    fn build(
        provider: Arc<dyn crate::sampler::LocationProvider>,
    ) -> (TrackerHandle, EventSink, Arc<Mutex<Vec<ClientEvent>>>) {
        let id = ParticipantId::new("A");
        let (sink, source) = event_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = LoopbackTransport {
            events: sink.clone(),
            sent: Arc::clone(&sent),
        };
        let relay = RelayClient::new(
            transport,
            Handshake {
                participant_id: id.clone(),
                display_name: String::from("Asha"),
            },
        );
        let sampler = Sampler::new(id.clone(), provider, BatteryGauge::Fixed(90));
        let (tracker, handle) =
            LiveTracker::new(PeerRegistry::new(id), relay, source, sampler, None);
        tracker.spawn();
        (handle, sink, sent)
    }

    #[tokio::test(start_paused = true)]
    async fn local_sample_lands_in_snapshot_and_is_sent() {
        let provider = ReplayProvider::from_fixes(vec![fix(1000)]);
        let (handle, _sink, sent) = build(Arc::new(provider));

        handle.connect().await.unwrap();
        let mut connection = handle.connection_status();
        connection
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        handle
            .start_tracking(TrackingConfiguration::default())
            .await
            .unwrap();
        let mut tracking = handle.tracking_status();
        tracking
            .wait_for(|s| matches!(s, TrackingStatus::Active { .. }))
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        let entry = snapshot.first().unwrap();
        assert!(entry.is_self);
        let mut expected = PositionSample::new(ParticipantId::new("A"), 10.0, 20.0, 5.0, 1000);
        expected.battery_level = Some(90);
        assert_eq!(entry.latest, expected);
        assert_eq!(
            *sent.lock().unwrap(),
            vec![ClientEvent::LocationUpdate(expected)]
        );

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_platform_is_reported_synchronously() {
        let (handle, _sink, _sent) = build(Arc::new(NoLocation));
        let result = handle.start_tracking(TrackingConfiguration::default()).await;
        assert_eq!(
            result,
            Err(TrackerError::Sampler(SamplerError::UnsupportedPlatform))
        );
        assert_eq!(*handle.tracking_status().borrow(), TrackingStatus::Unsupported);
    }

    #[tokio::test]
    async fn peers_flow_from_relay_into_snapshot() {
        let (handle, sink, _sent) = build(Arc::new(NoLocation));
        handle.connect().await.unwrap();
        handle
            .connection_status()
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        let roster = vec![
            PositionSample::new(ParticipantId::new("A"), 0.0, 0.0, 1.0, 1),
            PositionSample::new(ParticipantId::new("B"), 0.0, 0.0, 1.0, 2000),
        ];
        let current = ConnectionId::new(1);
        sink.send((current, TransportEvent::Event(ServerEvent::ConnectedUsers(roster))))
            .unwrap();
        let stale = PositionSample::new(ParticipantId::new("B"), 5.0, 5.0, 1.0, 1500);
        sink.send((current, TransportEvent::Event(ServerEvent::LocationUpdate(stale))))
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].participant_id.as_str(), "B");
        assert_eq!(snapshot[0].latest.timestamp, 2000);
    }

    #[tokio::test]
    async fn commands_are_not_starved_by_inbound_frames() {
        let (handle, sink, _sent) = build(Arc::new(NoLocation));
        handle.connect().await.unwrap();
        handle
            .connection_status()
            .wait_for(|s| s.state == ConnectionState::Connected)
            .await
            .unwrap();

        // Queue far more frames than one burst before asking for a snapshot.
        let current = ConnectionId::new(1);
        for ts in 1..=5_000_i64 {
            let update = PositionSample::new(ParticipantId::new("B"), 1.0, 1.0, 1.0, ts);
            sink.send((current, TransportEvent::Event(ServerEvent::LocationUpdate(update))))
                .unwrap();
        }

        let snapshot = handle.snapshot().await.unwrap();
        let seen = snapshot.first().unwrap().latest.timestamp;
        assert!(seen >= 64, "frames queued before the command were skipped");
        assert!(seen < 5_000, "snapshot waited for the whole backlog");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handle_reports_closed_after_shutdown() {
        let (handle, _sink, _sent) = build(Arc::new(NoLocation));
        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(handle.connect().await, Err(TrackerError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tracking_returns_to_idle() {
        let provider = ReplayProvider::from_fixes(vec![fix(1), fix(2)]);
        let (handle, _sink, _sent) = build(Arc::new(provider));
        handle
            .start_tracking(TrackingConfiguration::default())
            .await
            .unwrap();
        handle.stop_tracking().await.unwrap();
        let _ = handle.snapshot().await.unwrap();
        assert_eq!(*handle.tracking_status().borrow(), TrackingStatus::Idle);
    }
}
