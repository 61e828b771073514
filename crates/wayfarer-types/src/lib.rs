//! Shared type definitions for Wayfarer live location sharing.
//!
//! This crate is the single source of truth for everything that crosses a
//! process boundary: position samples, the relay wire protocol, and the
//! emergency alert payload. Types flow to `TypeScript` via `ts-rs` for the
//! browser front-end.
//!
//! # Modules
//!
//! - [`ids`] -- Participant identity
//! - [`location`] -- Samples, peer entries, connection status, tracking config
//! - [`protocol`] -- Relay frames and handshake parameters
//! - [`alert`] -- Emergency alert payload and endpoint response

pub mod alert;
pub mod ids;
pub mod location;
pub mod protocol;

// Re-export all public types at crate root for convenience.
pub use alert::{AlertPayload, AlertResponse, ContactResult, Severity, UserInfo};
pub use ids::ParticipantId;
pub use location::{
    ConnectionState, ConnectionStatus, PeerEntry, PositionSample, TrackingConfiguration,
};
pub use protocol::{ClientEvent, DISPLAY_NAME_PARAM, Handshake, PARTICIPANT_ID_PARAM, ServerEvent};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::ids::ParticipantId::export_all();

        let _ = crate::location::PositionSample::export_all();
        let _ = crate::location::PeerEntry::export_all();
        let _ = crate::location::ConnectionState::export_all();
        let _ = crate::location::ConnectionStatus::export_all();
        let _ = crate::location::TrackingConfiguration::export_all();

        let _ = crate::protocol::ClientEvent::export_all();
        let _ = crate::protocol::ServerEvent::export_all();
        let _ = crate::protocol::Handshake::export_all();

        let _ = crate::alert::Severity::export_all();
        let _ = crate::alert::UserInfo::export_all();
        let _ = crate::alert::AlertPayload::export_all();
        let _ = crate::alert::ContactResult::export_all();
        let _ = crate::alert::AlertResponse::export_all();
    }
}
