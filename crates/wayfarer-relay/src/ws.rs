//! `WebSocket` handler for location relaying.
//!
//! Clients connect to `GET /ws/location?participantId=..&name=..`. On join
//! the server sends `connectedUsers` with the known positions of everyone
//! else. Each inbound `locationUpdate` is stamped, validated, remembered and
//! broadcast to every other connection. When the socket closes the
//! connection leaves the roster.
//!
//! If a client falls behind, lagged messages are skipped and the client
//! resumes from the most recent frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use wayfarer_types::{ClientEvent, Handshake, ServerEvent};

use crate::error::RelayError;
use crate::state::{AppState, ConnectionKey};

/// Upgrade an HTTP request to a relay connection.
///
/// # Route
///
/// `GET /ws/location`
pub async fn ws_location(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, RelayError> {
    if handshake.participant_id.is_empty() {
        return Err(RelayError::MissingParameter(wayfarer_types::PARTICIPANT_ID_PARAM));
    }
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, state, handshake)))
}

/// Serialize and send one frame. Returns `false` once the socket is gone.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize {}: {e}", event.name());
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, handshake: Handshake) {
    let joined = state
        .join(handshake.participant_id, handshake.display_name)
        .await;
    let key = joined.key;
    let mut rx = joined.rx;

    if send_event(&mut socket, &ServerEvent::ConnectedUsers(joined.roster)).await {
        relay_loop(&mut socket, &state, key, &mut rx).await;
    }

    state.leave(key).await;
}

async fn relay_loop(
    socket: &mut WebSocket,
    state: &AppState,
    key: ConnectionKey,
    rx: &mut tokio::sync::broadcast::Receiver<crate::state::Relayed>,
) {
    loop {
        tokio::select! {
            // A frame from another connection.
            result = rx.recv() => {
                match result {
                    Ok(relayed) if relayed.origin == key => {}
                    Ok(relayed) => {
                        if !send_event(socket, &relayed.event).await {
                            debug!(connection = key, "WebSocket client disconnected (send failed)");
                            return;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(connection = key, skipped = n, "WebSocket client lagged, skipping ahead");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed, shutting down WebSocket");
                        return;
                    }
                }
            }
            // A frame from this client.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(ClientEvent::LocationUpdate(sample)) => {
                                state.record(key, sample).await;
                            }
                            Err(e) => debug!(connection = key, "ignoring undecodable frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection = key, "WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(connection = key, "WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(connection = key, "WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
