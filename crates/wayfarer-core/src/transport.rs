//! WebSocket relay transport.
//!
//! [`WsTransport`] runs one background task per connection generation. The
//! task connects, forwards outbound frames, decodes inbound frames into
//! [`ServerEvent`]s and reports everything it sees on a shared event channel,
//! tagged with its [`ConnectionId`]. When the socket drops it retries with
//! jittered exponential backoff until the generation is closed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use wayfarer_types::{
    ClientEvent, DISPLAY_NAME_PARAM, Handshake, PARTICIPANT_ID_PARAM, ServerEvent,
};

use crate::error::TransportError;
use crate::relay::{ConnectionId, RelayTransport, TransportEvent};

/// Sending half of the transport event channel.
pub type EventSink = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Receiving half of the transport event channel.
pub type EventSource = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;

/// Create the channel a transport reports on.
pub fn event_channel() -> (EventSink, EventSource) {
    mpsc::unbounded_channel()
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on the un-jittered delay.
    pub max: Duration,
    /// Fractional jitter applied either side of the delay (0.5 = ±50 %).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.5,
        }
    }
}

impl ReconnectPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(2_u32.saturating_pow(doublings))
            .min(self.max)
    }

    /// Jittered delay before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }
}

struct Session {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// tokio-tungstenite implementation of [`RelayTransport`].
pub struct WsTransport {
    relay_url: String,
    policy: ReconnectPolicy,
    events: EventSink,
    session: Option<Session>,
}

impl WsTransport {
    /// Transport for the relay at `relay_url` reporting on `events`.
    pub fn new(relay_url: impl Into<String>, events: EventSink) -> Self {
        Self {
            relay_url: relay_url.into(),
            policy: ReconnectPolicy::default(),
            events,
            session: None,
        }
    }

    /// Override the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether a connection task is running.
    pub const fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl RelayTransport for WsTransport {
    fn open(&mut self, id: ConnectionId, handshake: &Handshake) {
        self.close();

        let url = match handshake_url(&self.relay_url, handshake) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %self.relay_url, error = %e, "invalid relay url");
                let _ = self
                    .events
                    .send((id, TransportEvent::ConnectError(format!("invalid relay url: {e}"))));
                return;
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            url,
            id,
            self.policy,
            self.events.clone(),
            outbound_rx,
        ));
        self.session = Some(Session { id, outbound, task });
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(connection = %session.id, "closing relay transport");
            session.task.abort();
        }
    }

    fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::Closed)?;
        let frame =
            serde_json::to_string(&event).map_err(|e| TransportError::Encode(e.to_string()))?;
        session
            .outbound
            .send(frame)
            .map_err(|_closed| TransportError::Closed)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WsTransport")
            .field("relay_url", &self.relay_url)
            .field("policy", &self.policy)
            .field("session", &self.session.as_ref().map(|s| s.id))
            .finish_non_exhaustive()
    }
}

/// Append the handshake query parameters to the relay URL.
pub fn handshake_url(relay_url: &str, handshake: &Handshake) -> Result<Url, String> {
    let mut url = Url::parse(relay_url).map_err(|e| e.to_string())?;
    url.query_pairs_mut()
        .append_pair(PARTICIPANT_ID_PARAM, handshake.participant_id.as_str())
        .append_pair(DISPLAY_NAME_PARAM, &handshake.display_name);
    Ok(url)
}

/// Why an open connection ended.
enum Ended {
    /// The owning transport went away.
    Closed,
    /// The socket failed or the relay hung up.
    Lost(String),
}

/// Connection task for one generation. Runs until aborted or until the
/// event channel closes.
async fn run_connection(
    url: Url,
    id: ConnectionId,
    policy: ReconnectPolicy,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut attempt: u32 = 0;
    let mut has_connected = false;

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                attempt = 0;
                has_connected = true;

                let mut discarded: usize = 0;
                while outbound.try_recv().is_ok() {
                    discarded = discarded.saturating_add(1);
                }
                if discarded > 0 {
                    debug!(connection = %id, discarded, "dropped frames queued while offline");
                }

                info!(connection = %id, "relay socket open");
                if events.send((id, TransportEvent::Connected)).is_err() {
                    return;
                }

                match pump(socket, id, &events, &mut outbound).await {
                    Ended::Closed => return,
                    Ended::Lost(reason) => {
                        warn!(connection = %id, %reason, "relay socket lost");
                        if events.send((id, TransportEvent::Dropped(reason))).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(connection = %id, error = %e, "relay connect failed");
                if events
                    .send((id, TransportEvent::ConnectError(e.to_string())))
                    .is_err()
                {
                    return;
                }
            }
        }

        attempt = attempt.saturating_add(1);
        if has_connected
            && events
                .send((id, TransportEvent::Reconnecting { attempt }))
                .is_err()
        {
            return;
        }
        let delay = policy.delay(attempt);
        trace!(connection = %id, attempt, delay_ms = delay.as_millis(), "waiting before reconnect");
        tokio::time::sleep(delay).await;
    }
}

/// Shuttle frames in both directions until the socket ends.
async fn pump<S>(
    socket: S,
    id: ConnectionId,
    events: &EventSink,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> Ended
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return Ended::Closed;
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    return Ended::Lost(e.to_string());
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if events.send((id, TransportEvent::Event(event))).is_err() {
                                    return Ended::Closed;
                                }
                            }
                            Err(e) => warn!(connection = %id, error = %e, "undecodable relay frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ended::Lost(String::from("relay closed the connection"));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Ended::Lost(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use wayfarer_types::ParticipantId;

    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(4));
        assert_eq!(policy.base_delay(4), Duration::from_secs(5));
        assert_eq!(policy.base_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_half() {
        let policy = ReconnectPolicy::default();
        for attempt in 1..=6 {
            let base = policy.base_delay(attempt);
            let delay = policy.delay(attempt);
            assert!(delay >= base.mul_f64(0.5));
            assert!(delay <= base.mul_f64(1.5));
        }
    }

    #[test]
    fn no_jitter_is_exact() {
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay(2), Duration::from_secs(2));
    }

    #[test]
    fn handshake_is_encoded_in_query() {
        let handshake = Handshake {
            participant_id: ParticipantId::new("p-1"),
            display_name: String::from("Asha R"),
        };
        let url = handshake_url("ws://localhost:3001/ws/location", &handshake).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:3001/ws/location?participantId=p-1&name=Asha+R"
        );
        assert!(handshake_url("not a url", &handshake).is_err());
    }

    #[tokio::test]
    async fn send_without_session_is_closed() {
        let (sink, _source) = event_channel();
        let mut transport = WsTransport::new("ws://127.0.0.1:1/ws/location", sink);
        let sample = wayfarer_types::PositionSample::new(ParticipantId::new("A"), 0.0, 0.0, 1.0, 1);
        assert_eq!(
            transport.send(ClientEvent::LocationUpdate(sample)),
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn refused_connection_reports_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (sink, mut source) = event_channel();
        let mut transport = WsTransport::new(format!("ws://127.0.0.1:{port}/ws/location"), sink);
        let handshake = Handshake {
            participant_id: ParticipantId::new("A"),
            display_name: String::new(),
        };
        transport.open(ConnectionId::new(7), &handshake);

        let (id, event) = source.recv().await.unwrap();
        assert_eq!(id, ConnectionId::new(7));
        assert!(matches!(event, TransportEvent::ConnectError(_)));
        transport.close();
        assert!(!transport.is_open());
    }
}
