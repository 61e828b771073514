//! Error types for the client core.
//!
//! Sampler and relay failures are absorbed into status fields by the
//! tracker loop; only [`SamplerError`] on `start`, [`DispatchError`], and
//! [`TrackerError`] ever reach the caller.

/// Why the geolocation sampler could not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    /// The platform has no location capability.
    #[error("location capability is not available on this platform")]
    UnsupportedPlatform,

    /// Tracking is switched off in the configuration.
    #[error("tracking is disabled in the configuration")]
    Disabled,
}

/// A transient failure reading a position.
///
/// The underlying watch keeps running; the next fix recovers automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    /// The user or OS denied access to location.
    #[error("location permission denied")]
    PermissionDenied,

    /// The provider could not determine a position.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// No fix arrived within the acquisition timeout.
    #[error("timed out waiting for a position fix")]
    Timeout,
}

/// Failure handing a frame to the relay transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No connection task is running.
    #[error("transport is closed")]
    Closed,

    /// The frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
}

/// Terminal outcome of a failed alert dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The endpoint answered with a non-2xx status.
    #[error("alert delivery failed with HTTP {status}: {body}")]
    DeliveryFailed {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Response body, if readable.
        body: String,
    },

    /// The request never produced an HTTP response.
    #[error("alert transport error: {0}")]
    Transport(String),
}

/// Failure talking to a running tracker loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// The tracker loop has shut down.
    #[error("tracker loop is no longer running")]
    Closed,

    /// The sampler refused to start.
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}
