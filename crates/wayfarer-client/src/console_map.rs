//! A map backend that draws to the log.
//!
//! Stands in for a tile renderer on headless devices: every marker
//! operation becomes a structured tracing event.

use tracing::{debug, info};
use wayfarer_core::{MapOptions, MapView, MarkerBackend};
use wayfarer_types::{ParticipantId, PeerEntry};

/// Marker handle: the participant it belongs to and where it was last drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleMarker {
    participant: ParticipantId,
    latitude: f64,
    longitude: f64,
}

/// Logs marker and camera changes.
#[derive(Debug, Default)]
pub struct ConsoleMap {
    style: String,
}

impl MarkerBackend for ConsoleMap {
    type Marker = ConsoleMarker;

    fn initialize(&mut self, options: &MapOptions) {
        self.style.clone_from(&options.style);
        info!(style = %self.style, follow_self = options.follow_self, "map initialised");
    }

    fn create(&mut self, entry: &PeerEntry, label: &str) -> ConsoleMarker {
        info!(
            participant = %entry.participant_id,
            lat = entry.latest.latitude,
            lon = entry.latest.longitude,
            label,
            "marker placed"
        );
        ConsoleMarker {
            participant: entry.participant_id.clone(),
            latitude: entry.latest.latitude,
            longitude: entry.latest.longitude,
        }
    }

    fn update(&mut self, marker: &mut ConsoleMarker, entry: &PeerEntry, label: &str) {
        debug!(
            participant = %marker.participant,
            from_lat = marker.latitude,
            from_lon = marker.longitude,
            lat = entry.latest.latitude,
            lon = entry.latest.longitude,
            label,
            "marker moved"
        );
        marker.latitude = entry.latest.latitude;
        marker.longitude = entry.latest.longitude;
    }

    fn destroy(&mut self, marker: ConsoleMarker) {
        info!(participant = %marker.participant, "marker removed");
    }

    fn fly_to(&mut self, view: MapView) {
        debug!(
            style = %self.style,
            lat = view.latitude,
            lon = view.longitude,
            zoom = view.zoom,
            "camera moved"
        );
    }
}
