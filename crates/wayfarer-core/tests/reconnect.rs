//! Websocket transport losing its socket and coming back.
//!
//! A scripted relay accepts two sessions. The first greets with a roster
//! containing `B`, reads one frame and then drops the socket without a
//! closing handshake. The second greets with `C` and records every frame.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wayfarer_core::transport::EventSource;
use wayfarer_core::{
    ConnectionId, PeerRegistry, ReconnectPolicy, RelayClient, RelayTransport, TransportEvent,
    WsTransport, event_channel,
};
use wayfarer_types::{
    ClientEvent, ConnectionState, Handshake, ParticipantId, PositionSample, ServerEvent,
};

/// Session number and the sample received on it.
type Received = mpsc::UnboundedReceiver<(u32, PositionSample)>;

async fn spawn_flaky_relay() -> (String, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (session, peer) in [(1_u32, "B"), (2, "C")] {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

            let roster = ServerEvent::ConnectedUsers(vec![PositionSample::new(
                ParticipantId::new(peer),
                40.0,
                -73.0,
                5.0,
                1,
            )]);
            socket
                .send(Message::Text(serde_json::to_string(&roster).unwrap()))
                .await
                .unwrap();

            while let Some(Ok(Message::Text(text))) = socket.next().await {
                let event: ClientEvent = serde_json::from_str(&text).unwrap();
                let ClientEvent::LocationUpdate(sample) = event;
                let _ = tx.send((session, sample));
                if session == 1 {
                    break;
                }
            }
            // Dropping the first session here resets it mid-stream.
        }
    });

    (format!("ws://{addr}/ws/location"), rx)
}

fn handshake() -> Handshake {
    Handshake {
        participant_id: ParticipantId::new("A"),
        display_name: String::from("Asha"),
    }
}

fn own_sample(ts: i64) -> PositionSample {
    PositionSample::new(ParticipantId::new("A"), 40.7, -73.9, 4.0, ts)
}

fn quick_policy(initial: Duration) -> ReconnectPolicy {
    ReconnectPolicy {
        initial,
        max: initial,
        jitter: 0.0,
    }
}

/// Apply transport events until `done` holds, recording each new state.
async fn drive_until(
    relay: &mut RelayClient<WsTransport>,
    source: &mut EventSource,
    registry: &mut PeerRegistry,
    states: &mut Vec<ConnectionState>,
    done: impl Fn(&RelayClient<WsTransport>, &PeerRegistry) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done(relay, registry) {
            let (id, event) = source.recv().await.unwrap();
            relay.handle(id, event, registry);
            if states.last() != Some(&relay.state()) {
                states.push(relay.state());
            }
        }
    })
    .await
    .unwrap();
}

async fn next_event(source: &mut EventSource, wanted: impl Fn(&TransportEvent) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let (_, event) = source.recv().await.unwrap();
            if wanted(&event) {
                return;
            }
        }
    })
    .await
    .unwrap();
}

async fn next_received(received: &mut Received) -> (u32, i64) {
    let (session, sample) = tokio::time::timeout(Duration::from_secs(10), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sample.participant_id.as_str(), "A");
    (session, sample.timestamp)
}

fn has_peer(registry: &PeerRegistry, id: &str) -> bool {
    registry.get(&ParticipantId::new(id)).is_some()
}

#[tokio::test]
async fn client_recovers_after_socket_loss_and_reseeds_roster() {
    let (url, mut received) = spawn_flaky_relay().await;
    let (sink, mut source) = event_channel();
    let transport = WsTransport::new(url, sink).with_policy(quick_policy(Duration::from_millis(100)));
    let mut relay = RelayClient::new(transport, handshake());
    let mut registry = PeerRegistry::new(ParticipantId::new("A"));
    let mut states = Vec::new();

    relay.connect();
    states.push(relay.state());

    drive_until(&mut relay, &mut source, &mut registry, &mut states, |_, r| {
        has_peer(r, "B")
    })
    .await;
    assert!(relay.send(&own_sample(1)));

    drive_until(&mut relay, &mut source, &mut registry, &mut states, |c, _| {
        c.state() == ConnectionState::Reconnecting
    })
    .await;
    assert!(relay.status().last_error.is_some());
    assert!(!relay.send(&own_sample(2)), "sent while reconnecting");

    drive_until(&mut relay, &mut source, &mut registry, &mut states, |c, r| {
        c.state() == ConnectionState::Connected && has_peer(r, "C")
    })
    .await;
    assert_eq!(relay.status().last_error, None);
    assert!(relay.send(&own_sample(3)));

    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Connected,
        ]
    );

    // The roster is additive: B from the first session stays until the
    // relay announces its departure.
    let ids: Vec<String> = registry
        .snapshot()
        .into_iter()
        .map(|e| e.participant_id.to_string())
        .collect();
    assert_eq!(ids, vec!["B", "C"]);

    assert_eq!(next_received(&mut received).await, (1, 1));
    assert_eq!(next_received(&mut received).await, (2, 3));

    relay.disconnect();
}

#[tokio::test]
async fn frames_queued_during_backoff_are_discarded() {
    let (url, mut received) = spawn_flaky_relay().await;
    let (sink, mut source) = event_channel();
    let mut transport =
        WsTransport::new(url, sink).with_policy(quick_policy(Duration::from_millis(300)));

    transport.open(ConnectionId::new(1), &handshake());
    next_event(&mut source, |e| *e == TransportEvent::Connected).await;
    transport
        .send(ClientEvent::LocationUpdate(own_sample(1)))
        .unwrap();

    next_event(&mut source, |e| matches!(e, TransportEvent::Dropped(_))).await;
    // The socket is gone but the generation is still open, so the frame is
    // accepted into the queue.
    transport
        .send(ClientEvent::LocationUpdate(own_sample(2)))
        .unwrap();

    next_event(&mut source, |e| *e == TransportEvent::Connected).await;
    transport
        .send(ClientEvent::LocationUpdate(own_sample(3)))
        .unwrap();

    assert_eq!(next_received(&mut received).await, (1, 1));
    assert_eq!(next_received(&mut received).await, (2, 3));

    transport.close();
}
