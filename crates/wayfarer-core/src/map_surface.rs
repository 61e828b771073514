//! Map surface adapter.
//!
//! The rendering library (tiles, markers, popups) is an external
//! collaborator. The core talks to it only through [`MarkerBackend`], a set
//! of create/update/destroy callbacks. [`MapSurface`] owns the mapping from
//! participant to marker handle and keeps it in sync with the peer registry
//! by subscribing as its [`RegistryObserver`].
//!
//! The core never holds a rendering handle itself.

use std::collections::HashMap;

use tracing::{debug, warn};
use wayfarer_types::{ParticipantId, PeerEntry};

use crate::registry::{RegistryChange, RegistryObserver};

/// Zoom level used when the camera follows the local participant.
pub const FOLLOW_ZOOM: f64 = 14.0;

/// A camera position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    /// Longitude of the view centre.
    pub longitude: f64,
    /// Latitude of the view centre.
    pub latitude: f64,
    /// Zoom level.
    pub zoom: f64,
}

/// How the rendering library should be initialised.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    /// Style identifier understood by the rendering library.
    pub style: String,
    /// API key for the tile/geocoding provider.
    pub api_key: String,
    /// Camera position before the first fix arrives.
    pub initial_view: MapView,
    /// Re-centre the camera on every local fix.
    pub follow_self: bool,
}

/// Callbacks into the rendering library.
///
/// Implementations own whatever native handle type the library uses.
pub trait MarkerBackend: Send {
    /// Native marker handle.
    type Marker: Send;

    /// Prepare the map for drawing.
    fn initialize(&mut self, options: &MapOptions);

    /// Place a new marker for `entry`.
    fn create(&mut self, entry: &PeerEntry, label: &str) -> Self::Marker;

    /// Move an existing marker to `entry`'s latest position.
    fn update(&mut self, marker: &mut Self::Marker, entry: &PeerEntry, label: &str);

    /// Remove a marker from the map.
    fn destroy(&mut self, marker: Self::Marker);

    /// Move the camera.
    fn fly_to(&mut self, view: MapView) {
        let _ = view;
    }
}

/// Owns marker handles and mirrors registry changes onto the backend.
pub struct MapSurface<B: MarkerBackend> {
    backend: B,
    markers: HashMap<ParticipantId, B::Marker>,
    follow_self: bool,
}

impl<B: MarkerBackend> MapSurface<B> {
    /// Initialise the backend and start with no markers.
    pub fn new(mut backend: B, options: &MapOptions) -> Self {
        backend.initialize(options);
        backend.fly_to(options.initial_view);
        Self {
            backend,
            markers: HashMap::new(),
            follow_self: options.follow_self,
        }
    }

    /// Number of markers currently on the map.
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Whether a marker exists for `id`.
    pub fn has_marker(&self, id: &ParticipantId) -> bool {
        self.markers.contains_key(id)
    }

    /// Borrow the backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    fn place(&mut self, entry: &PeerEntry) {
        let label = marker_label(entry);
        match self.markers.get_mut(&entry.participant_id) {
            Some(marker) => self.backend.update(marker, entry, &label),
            None => {
                let marker = self.backend.create(entry, &label);
                self.markers.insert(entry.participant_id.clone(), marker);
            }
        }

        if entry.is_self && self.follow_self {
            self.backend.fly_to(MapView {
                longitude: entry.latest.longitude,
                latitude: entry.latest.latitude,
                zoom: FOLLOW_ZOOM,
            });
        }
    }
}

impl<B: MarkerBackend> RegistryObserver for MapSurface<B> {
    fn on_change(&mut self, change: &RegistryChange) {
        match change {
            RegistryChange::Added(entry) | RegistryChange::Updated(entry) => self.place(entry),
            RegistryChange::Removed(id) => match self.markers.remove(id) {
                Some(marker) => {
                    debug!(participant = %id, "removing marker");
                    self.backend.destroy(marker);
                }
                None => warn!(participant = %id, "no marker to remove"),
            },
        }
    }
}

/// Popup text for a marker.
///
/// The local participant is labelled "You"; peers show their id, accuracy
/// and battery when known.
pub fn marker_label(entry: &PeerEntry) -> String {
    let who = if entry.is_self {
        String::from("You")
    } else {
        entry.participant_id.to_string()
    };
    let mut label = format!("{who} (\u{b1}{:.0} m)", entry.latest.accuracy);
    if let Some(level) = entry.latest.battery_level {
        label.push_str(&format!(", battery {level}%"));
    }
    label
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::{Arc, Mutex};

    use wayfarer_types::PositionSample;

    use super::*;
    use crate::registry::PeerRegistry;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Init(String),
        Create(String),
        Update(String),
        Destroy(u32),
        Fly(f64, f64),
    }

    #[derive(Clone, Default)]
    struct FakeBackend {
        calls: Arc<Mutex<Vec<Call>>>,
        next: u32,
    }

    impl MarkerBackend for FakeBackend {
        type Marker = u32;

        fn initialize(&mut self, options: &MapOptions) {
            self.calls.lock().unwrap().push(Call::Init(options.style.clone()));
        }

        fn create(&mut self, entry: &PeerEntry, _label: &str) -> u32 {
            self.next = self.next.saturating_add(1);
            self.calls
                .lock()
                .unwrap()
                .push(Call::Create(entry.participant_id.to_string()));
            self.next
        }

        fn update(&mut self, _marker: &mut u32, entry: &PeerEntry, _label: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Update(entry.participant_id.to_string()));
        }

        fn destroy(&mut self, marker: u32) {
            self.calls.lock().unwrap().push(Call::Destroy(marker));
        }

        fn fly_to(&mut self, view: MapView) {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Fly(view.longitude, view.latitude));
        }
    }

    fn options() -> MapOptions {
        MapOptions {
            style: String::from("radar-default-v1"),
            api_key: String::from("key"),
            initial_view: MapView {
                longitude: -73.9911,
                latitude: 40.7342,
                zoom: FOLLOW_ZOOM,
            },
            follow_self: true,
        }
    }

    fn sample(id: &str, ts: i64) -> PositionSample {
        PositionSample::new(ParticipantId::new(id), 10.0, 20.0, 5.0, ts)
    }

    #[test]
    fn markers_follow_registry_changes() {
        let backend = FakeBackend::default();
        let calls = Arc::clone(&backend.calls);
        let mut registry = PeerRegistry::new(ParticipantId::new("me"));
        registry.subscribe(Box::new(MapSurface::new(backend, &options())));

        registry.upsert(sample("peer", 1));
        registry.upsert(sample("peer", 2));
        registry.upsert(sample("peer", 1));
        registry.remove(&ParticipantId::new("peer"));

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                Call::Init(String::from("radar-default-v1")),
                Call::Fly(-73.9911, 40.7342),
                Call::Create(String::from("peer")),
                Call::Update(String::from("peer")),
                Call::Destroy(1),
            ]
        );
    }

    #[test]
    fn camera_follows_self() {
        let backend = FakeBackend::default();
        let calls = Arc::clone(&backend.calls);
        let mut surface = MapSurface::new(backend, &options());

        let entry = PeerEntry {
            participant_id: ParticipantId::new("me"),
            latest: sample("me", 1),
            is_self: true,
        };
        surface.on_change(&RegistryChange::Added(entry));

        assert_eq!(surface.marker_count(), 1);
        assert!(surface.has_marker(&ParticipantId::new("me")));
        assert_eq!(calls.lock().unwrap().last(), Some(&Call::Fly(20.0, 10.0)));
    }

    #[test]
    fn labels_describe_entry() {
        let mut latest = sample("peer", 1);
        latest.battery_level = Some(57);
        let peer = PeerEntry {
            participant_id: ParticipantId::new("peer"),
            latest,
            is_self: false,
        };
        assert_eq!(marker_label(&peer), "peer (\u{b1}5 m), battery 57%");

        let me = PeerEntry {
            participant_id: ParticipantId::new("me"),
            latest: sample("me", 1),
            is_self: true,
        };
        assert!(marker_label(&me).starts_with("You"));
    }
}
