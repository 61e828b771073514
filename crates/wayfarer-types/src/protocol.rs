//! Relay wire protocol.
//!
//! Every websocket text frame carries one JSON object of the form
//! `{"event": "<name>", "data": <payload>}`. Connection lifecycle
//! (connect, disconnect, reconnect) is a transport concern and never
//! appears as a frame.
//!
//! | Direction | Event | Payload |
//! |-----------|-------|---------|
//! | client -> relay | `locationUpdate` | [`PositionSample`] |
//! | relay -> client | `locationUpdate` | [`PositionSample`] from another participant |
//! | relay -> client | `connectedUsers` | roster of [`PositionSample`] |
//! | relay -> client | `userDisconnected` | [`ParticipantId`] |

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::ParticipantId;
use crate::location::PositionSample;

/// Query parameter carrying the participant id on the websocket handshake.
pub const PARTICIPANT_ID_PARAM: &str = "participantId";

/// Query parameter carrying the display name on the websocket handshake.
pub const DISPLAY_NAME_PARAM: &str = "name";

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum ClientEvent {
    /// The sender's latest position.
    LocationUpdate(PositionSample),
}

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum ServerEvent {
    /// Another participant moved.
    LocationUpdate(PositionSample),
    /// Last known positions of everyone already connected, sent on join.
    ConnectedUsers(Vec<PositionSample>),
    /// A participant left the relay.
    UserDisconnected(ParticipantId),
}

impl ServerEvent {
    /// Short event name for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LocationUpdate(_) => "locationUpdate",
            Self::ConnectedUsers(_) => "connectedUsers",
            Self::UserDisconnected(_) => "userDisconnected",
        }
    }
}

/// Connection-time metadata sent as handshake query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Handshake {
    /// Identity of the connecting session.
    pub participant_id: ParticipantId,
    /// Human-readable name shown to other participants.
    #[serde(rename = "name", default)]
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_uses_event_data_envelope() {
        let sample = PositionSample::new(ParticipantId::new("A"), 1.0, 2.0, 3.0, 4);
        let json = serde_json::to_value(ClientEvent::LocationUpdate(sample)).unwrap_or_default();
        assert_eq!(json["event"], "locationUpdate");
        assert_eq!(json["data"]["participantId"], "A");
    }

    #[test]
    fn server_events_parse_from_wire() {
        let raw = r#"{"event":"userDisconnected","data":"B"}"#;
        let parsed: Result<ServerEvent, _> = serde_json::from_str(raw);
        assert!(matches!(parsed, Ok(ServerEvent::UserDisconnected(ref id)) if id.as_str() == "B"));

        let raw = r#"{"event":"connectedUsers","data":[]}"#;
        let parsed: Result<ServerEvent, _> = serde_json::from_str(raw);
        assert!(matches!(parsed, Ok(ServerEvent::ConnectedUsers(ref v)) if v.is_empty()));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let raw = r#"{"event":"teleport","data":{}}"#;
        let parsed: Result<ServerEvent, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn handshake_reads_name_param() {
        let raw = r#"{"participantId":"C","name":"Carol"}"#;
        let parsed: Result<Handshake, _> = serde_json::from_str(raw);
        assert_eq!(
            parsed.ok().map(|h| h.display_name),
            Some(String::from("Carol"))
        );
    }
}
