//! Error types for the client binary.

use wayfarer_core::{DispatchError, TrackerError};

/// Errors that can occur while running the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A replay file could not be read or parsed.
    #[error("replay file error: {0}")]
    Replay(String),

    /// The tracker loop failed or refused a command.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// The alert could not be delivered.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
