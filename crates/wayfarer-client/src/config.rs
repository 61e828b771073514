//! Client configuration.
//!
//! Loaded once at startup from environment variables. Everything has a
//! default except `MAP_API_KEY`, which only `track` needs.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `RELAY_URL` | `ws://localhost:3001/ws/location` |
//! | `MAP_STYLE` | `radar-default-v1` |
//! | `MAP_API_KEY` | unset (required by `track`) |
//! | `DISPLAY_NAME` | `Anonymous` |
//! | `PARTICIPANT_ID` | generated per run |
//! | `ALERT_ENDPOINT` | `http://localhost:3001/api/emergency` |
//! | `REPLAY_FILE` | unset (use gpsd) |
//! | `GPSD_ADDR` | `127.0.0.1:2947` |
//! | `TRACKING_ENABLED` | `true` |
//! | `TRACKING_HIGH_ACCURACY` | `true` |
//! | `TRACKING_INTERVAL_MS` | `5000` |
//! | `TRACKING_MAX_AGE_MS` | `0` |
//! | `TRACKING_TIMEOUT_MS` | `10000` |
//! | `PEER_TTL_SECS` | unset (peers never expire) |
//! | `EMERGENCY_CONTACTS` | empty, comma-separated |
//! | `USER_PHONE` | unset |
//! | `USER_LOCATION` | unset |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use wayfarer_core::gpsd::DEFAULT_GPSD_ADDR;
use wayfarer_types::{ParticipantId, TrackingConfiguration};

use crate::error::ClientError;

/// Where local fixes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationSource {
    /// A gpsd daemon at `host:port`.
    Gpsd(String),
    /// A JSON file of recorded fixes.
    Replay(PathBuf),
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay websocket URL.
    pub relay_url: String,
    /// Map style identifier.
    pub map_style: String,
    /// Map provider API key.
    pub map_api_key: Option<String>,
    /// Name shown to other participants.
    pub display_name: String,
    /// Fixed participant id, if configured.
    pub participant_id: Option<ParticipantId>,
    /// Emergency notification endpoint.
    pub alert_endpoint: String,
    /// Position source.
    pub location_source: LocationSource,
    /// Sampler options.
    pub tracking: TrackingConfiguration,
    /// Remove peers silent for longer than this.
    pub peer_ttl: Option<Duration>,
    /// Addresses to notify on an alert.
    pub emergency_contacts: Vec<String>,
    /// The user's phone number.
    pub user_phone: Option<String>,
    /// Free-form description of where the user is.
    pub user_location: Option<String>,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let location_source = match var("REPLAY_FILE") {
            Some(path) => LocationSource::Replay(PathBuf::from(path)),
            None => LocationSource::Gpsd(
                var("GPSD_ADDR").unwrap_or_else(|| DEFAULT_GPSD_ADDR.to_owned()),
            ),
        };

        let defaults = TrackingConfiguration::default();
        let tracking = TrackingConfiguration {
            enabled: parse_or(var("TRACKING_ENABLED"), "TRACKING_ENABLED", defaults.enabled)?,
            high_accuracy: parse_or(
                var("TRACKING_HIGH_ACCURACY"),
                "TRACKING_HIGH_ACCURACY",
                defaults.high_accuracy,
            )?,
            update_interval_hint_ms: parse_or(
                var("TRACKING_INTERVAL_MS"),
                "TRACKING_INTERVAL_MS",
                defaults.update_interval_hint_ms,
            )?,
            max_sample_age_ms: parse_or(
                var("TRACKING_MAX_AGE_MS"),
                "TRACKING_MAX_AGE_MS",
                defaults.max_sample_age_ms,
            )?,
            acquisition_timeout_ms: parse_or(
                var("TRACKING_TIMEOUT_MS"),
                "TRACKING_TIMEOUT_MS",
                defaults.acquisition_timeout_ms,
            )?,
        };

        let peer_ttl = var("PEER_TTL_SECS")
            .map(|raw| parse::<u64>(&raw, "PEER_TTL_SECS"))
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let emergency_contacts = var("EMERGENCY_CONTACTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            relay_url: var("RELAY_URL")
                .unwrap_or_else(|| "ws://localhost:3001/ws/location".to_owned()),
            map_style: var("MAP_STYLE").unwrap_or_else(|| "radar-default-v1".to_owned()),
            map_api_key: var("MAP_API_KEY"),
            display_name: var("DISPLAY_NAME").unwrap_or_else(|| "Anonymous".to_owned()),
            participant_id: var("PARTICIPANT_ID").map(ParticipantId::new),
            alert_endpoint: var("ALERT_ENDPOINT")
                .unwrap_or_else(|| "http://localhost:3001/api/emergency".to_owned()),
            location_source,
            tracking,
            peer_ttl,
            emergency_contacts,
            user_phone: var("USER_PHONE"),
            user_location: var("USER_LOCATION"),
        })
    }

    /// The map API key, or an error naming the missing variable.
    pub fn require_map_api_key(&self) -> Result<&str, ClientError> {
        self.map_api_key
            .as_deref()
            .ok_or_else(|| ClientError::Config("MAP_API_KEY is required to track".to_owned()))
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T, ClientError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ClientError::Config(format!("invalid {key}: {e}")))
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ClientError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.map_or(Ok(default), |raw| parse(&raw, key))
}
