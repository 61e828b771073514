//! Location-domain types shared by the client core and the relay.
//!
//! Covers [`PositionSample`] (one geolocation fix from one participant),
//! [`PeerEntry`] (the registry's view of a participant), the relay
//! connection status, and the sampler's [`TrackingConfiguration`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::ParticipantId;

// ---------------------------------------------------------------------------
// PositionSample
// ---------------------------------------------------------------------------

/// A single position fix reported by a participant.
///
/// Coordinates are WGS84 degrees. `timestamp` is milliseconds since the Unix
/// epoch and never decreases for a given participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PositionSample {
    /// Participant that produced this fix.
    pub participant_id: ParticipantId,
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy: f64,
    /// Direction of travel in degrees clockwise from true north.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Ground speed in metres per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Device battery charge in percent (0-100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
}

impl PositionSample {
    /// Build a sample with only the mandatory fields set.
    pub const fn new(
        participant_id: ParticipantId,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            participant_id,
            latitude,
            longitude,
            accuracy,
            heading: None,
            speed: None,
            timestamp,
            battery_level: None,
        }
    }

    /// Check that the sample describes a real point on the globe.
    ///
    /// Rejects non-finite or out-of-range coordinates, negative or non-finite
    /// accuracy, battery levels above 100, and empty participant ids.
    pub fn is_valid(&self) -> bool {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lon_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        let accuracy_ok = self.accuracy.is_finite() && self.accuracy >= 0.0;
        let heading_ok = self.heading.is_none_or(f64::is_finite);
        let speed_ok = self.speed.is_none_or(f64::is_finite);
        let battery_ok = self.battery_level.is_none_or(|level| level <= 100);
        lat_ok
            && lon_ok
            && accuracy_ok
            && heading_ok
            && speed_ok
            && battery_ok
            && !self.participant_id.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PeerEntry
// ---------------------------------------------------------------------------

/// The registry's record for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PeerEntry {
    /// Registry key.
    pub participant_id: ParticipantId,
    /// Most recent accepted sample.
    pub latest: PositionSample,
    /// True only for the local participant's own entry.
    pub is_self: bool,
}

// ---------------------------------------------------------------------------
// Connection status
// ---------------------------------------------------------------------------

/// Lifecycle state of the relay connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connection established and acknowledged by the relay.
    Connected,
    /// Connection was lost; the transport is retrying.
    Reconnecting,
}

impl core::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Connection state plus the most recent connection error, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Human-readable description of the last connect error.
    ///
    /// Cleared when a connection succeeds.
    pub last_error: Option<String>,
}

// ---------------------------------------------------------------------------
// TrackingConfiguration
// ---------------------------------------------------------------------------

/// Default update interval hint handed to the location provider.
const DEFAULT_UPDATE_INTERVAL_MS: u64 = 5_000;

/// Default time to wait for a fix before reporting a timeout.
const DEFAULT_ACQUISITION_TIMEOUT_MS: u64 = 10_000;

/// How the geolocation sampler should be configured.
///
/// The durations are hints for the location provider, not real-time
/// guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct TrackingConfiguration {
    /// Whether tracking is switched on at all.
    pub enabled: bool,
    /// Prefer precision over battery life.
    pub high_accuracy: bool,
    /// Desired spacing between fixes, in milliseconds.
    pub update_interval_hint_ms: u64,
    /// Oldest cached fix the provider may hand back, in milliseconds.
    ///
    /// Zero means only fresh fixes are acceptable.
    pub max_sample_age_ms: u64,
    /// How long to wait for a fix before reporting a timeout, in milliseconds.
    pub acquisition_timeout_ms: u64,
}

impl TrackingConfiguration {
    /// Update interval hint as a [`Duration`].
    pub const fn update_interval_hint(&self) -> Duration {
        Duration::from_millis(self.update_interval_hint_ms)
    }

    /// Maximum accepted fix age as a [`Duration`].
    pub const fn max_sample_age(&self) -> Duration {
        Duration::from_millis(self.max_sample_age_ms)
    }

    /// Acquisition timeout as a [`Duration`].
    pub const fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }
}

impl Default for TrackingConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            high_accuracy: true,
            update_interval_hint_ms: DEFAULT_UPDATE_INTERVAL_MS,
            max_sample_age_ms: 0,
            acquisition_timeout_ms: DEFAULT_ACQUISITION_TIMEOUT_MS,
        }
    }
}
