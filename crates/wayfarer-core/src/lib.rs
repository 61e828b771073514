//! Client core for Wayfarer live location sharing.
//!
//! Everything a participant's device runs between the platform location
//! API, the realtime relay and the map:
//!
//! - [`sampler`] -- Position watch over a [`sampler::LocationProvider`]
//! - [`battery`] -- Best-effort battery level reads
//! - [`gpsd`] -- gpsd-backed location provider
//! - [`registry`] -- Per-client participant -> last position map
//! - [`relay`] -- Relay connection state machine and inbound dispatch
//! - [`transport`] -- WebSocket transport with reconnect backoff
//! - [`map_surface`] -- Marker lifecycle against a rendering backend
//! - [`tracker`] -- The single event loop tying the above together
//! - [`dispatch`] -- Emergency alert delivery
//! - [`error`] -- Error types

pub mod battery;
pub mod dispatch;
pub mod error;
pub mod gpsd;
pub mod map_surface;
pub mod registry;
pub mod relay;
pub mod sampler;
pub mod tracker;
pub mod transport;

pub use battery::BatteryGauge;
pub use dispatch::{AlertDispatcher, AlertOutcome, DEFAULT_COUNTDOWN, Delivery};
pub use error::{AcquisitionError, DispatchError, SamplerError, TrackerError, TransportError};
pub use gpsd::GpsdProvider;
pub use map_surface::{FOLLOW_ZOOM, MapOptions, MapSurface, MapView, MarkerBackend};
pub use registry::{PeerRegistry, RegistryChange, RegistryObserver, UpsertOutcome};
pub use relay::{ConnectionId, RelayClient, RelayTransport, TransportEvent};
pub use sampler::{
    Fix, LocationProvider, NoLocation, ReplayProvider, SampleHandle, Sampler, SamplerEvent,
    WatchOptions,
};
pub use tracker::{LiveTracker, TrackerHandle, TrackingStatus};
pub use transport::{ReconnectPolicy, WsTransport, event_channel};
