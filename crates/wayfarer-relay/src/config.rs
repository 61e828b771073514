//! Relay configuration.
//!
//! Loaded once at startup from environment variables:
//!
//! - `RELAY_HOST` -- bind address (default `0.0.0.0`)
//! - `RELAY_PORT` -- TCP port (default `3001`)
//! - `RELAY_BROADCAST_CAPACITY` -- fan-out buffer per subscriber (default 256)

use crate::server::{ServerConfig, ServerError};
use crate::state::DEFAULT_BROADCAST_CAPACITY;

/// Default relay port.
pub const DEFAULT_PORT: u16 = 3001;

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Where to listen.
    pub server: ServerConfig,
    /// Broadcast channel capacity.
    pub broadcast_capacity: usize,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let host = lookup("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".to_owned());

        let port: u16 = lookup("RELAY_PORT")
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid RELAY_PORT: {e}")))?;

        let broadcast_capacity: usize = lookup("RELAY_BROADCAST_CAPACITY")
            .unwrap_or_else(|| DEFAULT_BROADCAST_CAPACITY.to_string())
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid RELAY_BROADCAST_CAPACITY: {e}")))?;
        if broadcast_capacity == 0 {
            return Err(ServerError::Config(
                "RELAY_BROADCAST_CAPACITY must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            server: ServerConfig { host, port },
            broadcast_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_HOST", "127.0.0.1"),
            ("RELAY_PORT", "9000"),
            ("RELAY_BROADCAST_CAPACITY", "16"),
        ]))
        .unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.broadcast_capacity, 16);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(RelayConfig::from_lookup(lookup(&[("RELAY_PORT", "http")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[("RELAY_BROADCAST_CAPACITY", "0")])).is_err());
    }
}
