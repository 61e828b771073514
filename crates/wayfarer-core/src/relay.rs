//! Realtime relay client.
//!
//! [`RelayClient`] is the connection state machine:
//!
//! ```text
//! Disconnected --connect()--> Connecting --Connected--> Connected
//!      ^                          |  ^                     |
//!      |                  ConnectError (stay)       Dropped / Reconnecting
//!      |                                                   v
//!      +------------------disconnect()---------------- Reconnecting
//! ```
//!
//! The I/O side lives behind [`RelayTransport`]. Every connection attempt is
//! tagged with a fresh [`ConnectionId`]; events carrying any other id are
//! late arrivals from a closed connection and are dropped without touching
//! the registry.

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use wayfarer_types::{
    ClientEvent, ConnectionState, ConnectionStatus, Handshake, ParticipantId, PositionSample,
    ServerEvent,
};

use crate::error::TransportError;
use crate::registry::PeerRegistry;

/// Generation number of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw generation number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw generation number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket is open and the handshake was accepted.
    Connected,
    /// A connection attempt failed.
    ConnectError(String),
    /// An open connection was lost.
    Dropped(String),
    /// The transport is about to retry after losing a connection.
    Reconnecting {
        /// Retry attempt number, starting at 1.
        attempt: u32,
    },
    /// A frame from the relay.
    Event(ServerEvent),
}

/// The I/O half of the relay client.
///
/// Implementations deliver [`TransportEvent`]s tagged with the
/// [`ConnectionId`] they were opened with, in the order they happened.
pub trait RelayTransport: Send {
    /// Start connecting (and reconnecting) for generation `id`.
    fn open(&mut self, id: ConnectionId, handshake: &Handshake);

    /// Tear down the current connection, if any. Idempotent.
    fn close(&mut self);

    /// Queue a frame for the relay.
    fn send(&mut self, event: ClientEvent) -> Result<(), TransportError>;
}

/// Connection state machine plus inbound event dispatch.
pub struct RelayClient<T: RelayTransport> {
    transport: T,
    handshake: Handshake,
    generation: u64,
    current: Option<ConnectionId>,
    status: watch::Sender<ConnectionStatus>,
}

impl<T: RelayTransport> RelayClient<T> {
    /// Create a disconnected client.
    pub fn new(transport: T, handshake: Handshake) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            transport,
            handshake,
            generation: 0,
            current: None,
            status,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Current state and last error.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Observe status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// The local participant's id, as sent in the handshake.
    pub const fn participant_id(&self) -> &ParticipantId {
        &self.handshake.participant_id
    }

    /// The connection generation whose events are currently accepted.
    pub const fn current_connection(&self) -> Option<ConnectionId> {
        self.current
    }

    /// Borrow the transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Begin connecting. Does nothing unless disconnected.
    pub fn connect(&mut self) {
        if self.state() != ConnectionState::Disconnected {
            debug!(state = %self.state(), "connect ignored");
            return;
        }
        self.generation = self.generation.saturating_add(1);
        let id = ConnectionId(self.generation);
        self.current = Some(id);
        info!(connection = %id, participant = %self.handshake.participant_id, "connecting to relay");
        self.set_state(ConnectionState::Connecting, None);
        self.transport.open(id, &self.handshake);
    }

    /// Close the connection from any state.
    ///
    /// Events from the closed generation are ignored from now on.
    pub fn disconnect(&mut self) {
        self.transport.close();
        if let Some(id) = self.current.take() {
            info!(connection = %id, "disconnected from relay");
        }
        self.set_state(ConnectionState::Disconnected, None);
    }

    /// Transmit a sample if connected. Returns whether it was handed off.
    pub fn send(&mut self, sample: &PositionSample) -> bool {
        if self.state() != ConnectionState::Connected {
            trace!(state = %self.state(), "dropping outbound sample while not connected");
            return false;
        }
        match self
            .transport
            .send(ClientEvent::LocationUpdate(sample.clone()))
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to queue location update");
                false
            }
        }
    }

    /// Apply one transport event.
    pub fn handle(&mut self, id: ConnectionId, event: TransportEvent, registry: &mut PeerRegistry) {
        if self.current != Some(id) {
            trace!(connection = %id, current = ?self.current, "discarding event from stale connection");
            return;
        }
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::ConnectError(message) => self.on_connect_error(message),
            TransportEvent::Dropped(reason) => self.on_dropped(reason),
            TransportEvent::Reconnecting { attempt } => self.on_reconnecting(attempt),
            TransportEvent::Event(event) => self.on_server_event(event, registry),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn on_connected(&self) {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                info!("relay connected");
                self.set_state(ConnectionState::Connected, None);
            }
            state => debug!(%state, "unexpected connected event"),
        }
    }

    fn on_connect_error(&self, message: String) {
        let state = self.state();
        match state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                warn!(error = %message, "relay connection attempt failed");
                self.set_state(state, Some(message));
            }
            _ => debug!(%state, error = %message, "connect error outside of connecting"),
        }
    }

    fn on_dropped(&self, reason: String) {
        if self.state() == ConnectionState::Connected {
            warn!(%reason, "relay connection lost");
            self.set_state(ConnectionState::Reconnecting, Some(reason));
        }
    }

    fn on_reconnecting(&self, attempt: u32) {
        match self.state() {
            ConnectionState::Connected => {
                self.set_state(ConnectionState::Reconnecting, None);
            }
            ConnectionState::Reconnecting => {}
            state => {
                debug!(%state, attempt, "reconnecting event outside of a session");
                return;
            }
        }
        debug!(attempt, "relay reconnecting");
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    fn on_server_event(&self, event: ServerEvent, registry: &mut PeerRegistry) {
        if self.state() != ConnectionState::Connected {
            trace!(event = event.name(), state = %self.state(), "ignoring frame while not connected");
            return;
        }
        match event {
            ServerEvent::LocationUpdate(sample) => Self::on_location_update(sample, registry),
            ServerEvent::ConnectedUsers(samples) => Self::on_connected_users(samples, registry),
            ServerEvent::UserDisconnected(id) => Self::on_user_disconnected(&id, registry),
        }
    }

    fn on_location_update(sample: PositionSample, registry: &mut PeerRegistry) {
        if &sample.participant_id == registry.self_id() {
            trace!("suppressing echo of own location");
            return;
        }
        let participant = sample.participant_id.clone();
        let outcome = registry.upsert(sample);
        trace!(%participant, ?outcome, "peer location update");
    }

    fn on_connected_users(samples: Vec<PositionSample>, registry: &mut PeerRegistry) {
        let total = samples.len();
        let self_id = registry.self_id().clone();
        let applied = registry.upsert_all(
            samples
                .into_iter()
                .filter(|sample| sample.participant_id != self_id),
        );
        debug!(total, applied, "received connected users");
    }

    fn on_user_disconnected(id: &ParticipantId, registry: &mut PeerRegistry) {
        if id == registry.self_id() {
            debug!("ignoring disconnect notice for self");
            return;
        }
        if registry.remove(id) {
            debug!(participant = %id, "peer left");
        }
    }

    fn set_state(&self, state: ConnectionState, last_error: Option<String>) {
        self.status.send_replace(ConnectionStatus { state, last_error });
    }
}

impl<T: RelayTransport> core::fmt::Debug for RelayClient<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RelayClient")
            .field("participant_id", &self.handshake.participant_id)
            .field("state", &self.state())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default)]
    struct Log {
        opened: Vec<ConnectionId>,
        closed: usize,
        sent: Vec<ClientEvent>,
    }

    #[derive(Clone, Default)]
    struct FakeTransport(Arc<Mutex<Log>>);

    impl RelayTransport for FakeTransport {
        fn open(&mut self, id: ConnectionId, _handshake: &Handshake) {
            self.0.lock().unwrap().opened.push(id);
        }

        fn close(&mut self) {
            let mut log = self.0.lock().unwrap();
            log.closed = log.closed.saturating_add(1);
        }

        fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
            self.0.lock().unwrap().sent.push(event);
            Ok(())
        }
    }

    fn sample(id: &str, ts: i64) -> PositionSample {
        PositionSample::new(ParticipantId::new(id), 1.0, 2.0, 3.0, ts)
    }

    fn setup() -> (RelayClient<FakeTransport>, FakeTransport, PeerRegistry) {
        let transport = FakeTransport::default();
        let client = RelayClient::new(
            transport.clone(),
            Handshake {
                participant_id: ParticipantId::new("S"),
                display_name: String::new(),
            },
        );
        (client, transport, PeerRegistry::new(ParticipantId::new("S")))
    }

    fn connected() -> (RelayClient<FakeTransport>, FakeTransport, PeerRegistry, ConnectionId) {
        let (mut client, transport, mut registry) = setup();
        client.connect();
        let id = client.current_connection().unwrap();
        client.handle(id, TransportEvent::Connected, &mut registry);
        assert_eq!(client.state(), ConnectionState::Connected);
        (client, transport, registry, id)
    }

    #[test]
    fn connect_only_from_disconnected() {
        let (mut client, transport, _) = setup();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        client.connect();
        client.connect();
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(transport.0.lock().unwrap().opened.len(), 1);
    }

    #[test]
    fn connect_error_is_recorded_and_connected_clears_it() {
        let (mut client, _, mut registry) = setup();
        client.connect();
        let id = client.current_connection().unwrap();

        client.handle(id, TransportEvent::ConnectError("refused".into()), &mut registry);
        let status = client.status();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.last_error.as_deref(), Some("refused"));

        client.handle(id, TransportEvent::Connected, &mut registry);
        assert_eq!(client.status().last_error, None);
    }

    #[test]
    fn drop_then_recover() {
        let (mut client, _, mut registry, id) = connected();
        client.handle(id, TransportEvent::Dropped("reset".into()), &mut registry);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        client.handle(id, TransportEvent::Reconnecting { attempt: 1 }, &mut registry);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        client.handle(id, TransportEvent::Connected, &mut registry);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[test]
    fn connect_error_while_reconnecting_keeps_retrying() {
        let (mut client, _, mut registry, id) = connected();
        client.handle(id, TransportEvent::Dropped("reset".into()), &mut registry);
        client.handle(id, TransportEvent::Reconnecting { attempt: 1 }, &mut registry);

        client.handle(id, TransportEvent::ConnectError("refused".into()), &mut registry);
        let status = client.status();
        assert_eq!(status.state, ConnectionState::Reconnecting);
        assert_eq!(status.last_error.as_deref(), Some("refused"));

        client.handle(id, TransportEvent::Connected, &mut registry);
        assert_eq!(
            client.status(),
            ConnectionStatus {
                state: ConnectionState::Connected,
                last_error: None,
            }
        );
    }

    #[test]
    fn disconnect_from_reconnecting_ignores_late_events() {
        let (mut client, transport, mut registry, id) = connected();
        client.handle(id, TransportEvent::Dropped("reset".into()), &mut registry);
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(transport.0.lock().unwrap().closed, 1);

        client.handle(id, TransportEvent::Connected, &mut registry);
        client.handle(
            id,
            TransportEvent::Event(ServerEvent::LocationUpdate(sample("P", 10))),
            &mut registry,
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(registry.is_empty());
    }

    #[test]
    fn events_from_previous_generation_are_discarded() {
        let (mut client, _, mut registry, old) = connected();
        client.disconnect();
        client.connect();
        let new = client.current_connection().unwrap();
        assert_ne!(old, new);
        client.handle(new, TransportEvent::Connected, &mut registry);

        client.handle(
            old,
            TransportEvent::Event(ServerEvent::LocationUpdate(sample("P", 10))),
            &mut registry,
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn send_only_while_connected() {
        let (mut client, transport, mut registry) = setup();
        assert!(!client.send(&sample("S", 1)));
        client.connect();
        assert!(!client.send(&sample("S", 1)));

        let id = client.current_connection().unwrap();
        client.handle(id, TransportEvent::Connected, &mut registry);
        assert!(client.send(&sample("S", 2)));
        assert_eq!(transport.0.lock().unwrap().sent.len(), 1);
    }

    #[test]
    fn own_echo_is_suppressed() {
        let (mut client, _, mut registry, id) = connected();
        client.handle(
            id,
            TransportEvent::Event(ServerEvent::LocationUpdate(sample("S", 10))),
            &mut registry,
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_peer_update_is_rejected() {
        let (mut client, _, mut registry, id) = connected();
        client.handle(
            id,
            TransportEvent::Event(ServerEvent::LocationUpdate(sample("B", 2000))),
            &mut registry,
        );
        let before = registry.snapshot();
        client.handle(
            id,
            TransportEvent::Event(ServerEvent::LocationUpdate(sample("B", 1500))),
            &mut registry,
        );
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn connected_users_excludes_self() {
        let (mut client, _, mut registry, id) = connected();
        let roster = vec![sample("S", 5), sample("X", 1), sample("Y", 1)];
        client.handle(
            id,
            TransportEvent::Event(ServerEvent::ConnectedUsers(roster)),
            &mut registry,
        );

        let ids: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|e| e.participant_id.to_string())
            .collect();
        assert_eq!(ids, vec!["X", "Y"]);
    }

    #[test]
    fn user_disconnected_never_removes_self() {
        let (mut client, _, mut registry, id) = connected();
        registry.upsert(sample("S", 1));
        registry.upsert(sample("P", 1));

        let leave = |who: &str| {
            TransportEvent::Event(ServerEvent::UserDisconnected(ParticipantId::new(who)))
        };
        client.handle(id, leave("S"), &mut registry);
        client.handle(id, leave("P"), &mut registry);
        client.handle(id, leave("P"), &mut registry);

        assert_eq!(registry.len(), 1);
        assert!(registry.self_entry().is_some());
    }

    #[test]
    fn frames_before_connected_are_ignored() {
        let (mut client, _, mut registry) = setup();
        client.connect();
        let id = client.current_connection().unwrap();
        client.handle(
            id,
            TransportEvent::Event(ServerEvent::LocationUpdate(sample("P", 1))),
            &mut registry,
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn status_is_observable() {
        let (mut client, _, _) = setup();
        let mut rx = client.subscribe_status();
        client.connect();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, ConnectionState::Connecting);
    }
}
