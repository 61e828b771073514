//! gpsd location provider.
//!
//! Connects to a gpsd daemon over TCP, enables JSON watch mode and turns
//! TPV (time-position-velocity) reports into [`Fix`]es. Connection failures
//! are reported as [`AcquisitionError::PositionUnavailable`] and retried
//! after a fixed delay; the stream itself never ends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::AcquisitionError;
use crate::sampler::{Fix, FixStream, LocationProvider, WatchOptions};

/// Default gpsd address.
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

/// Command that switches gpsd into JSON streaming mode.
const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// Default pause between reconnect attempts.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Reads fixes from a gpsd daemon.
#[derive(Debug, Clone)]
pub struct GpsdProvider {
    addr: String,
    reconnect_delay: Duration,
}

impl GpsdProvider {
    /// Provider for the daemon at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Override the pause between reconnect attempts.
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// The daemon address.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Default for GpsdProvider {
    fn default() -> Self {
        Self::new(DEFAULT_GPSD_ADDR)
    }
}

enum Link {
    Offline { retry: bool },
    Online(Lines<BufReader<TcpStream>>),
}

struct GpsdWatch {
    addr: String,
    reconnect_delay: Duration,
    maximum_age: Duration,
    link: Link,
}

impl GpsdWatch {
    async fn open(&self) -> std::io::Result<Lines<BufReader<TcpStream>>> {
        let mut socket = TcpStream::connect(&self.addr).await?;
        socket.write_all(WATCH_COMMAND).await?;
        Ok(BufReader::new(socket).lines())
    }

    async fn next_fix(&mut self) -> Result<Fix, AcquisitionError> {
        loop {
            match &mut self.link {
                Link::Offline { retry } => {
                    if *retry {
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                    match self.open().await {
                        Ok(lines) => {
                            info!(addr = %self.addr, "connected to gpsd");
                            self.link = Link::Online(lines);
                        }
                        Err(e) => {
                            warn!(addr = %self.addr, error = %e, "gpsd connection failed");
                            self.link = Link::Offline { retry: true };
                            return Err(AcquisitionError::PositionUnavailable(format!(
                                "gpsd at {}: {e}",
                                self.addr
                            )));
                        }
                    }
                }
                Link::Online(lines) => match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(fix) = parse_tpv(&line) else {
                            continue;
                        };
                        if self.is_too_old(&fix) {
                            debug!(timestamp = fix.timestamp, "discarding stale gpsd fix");
                            continue;
                        }
                        return Ok(fix);
                    }
                    Ok(None) => {
                        warn!(addr = %self.addr, "gpsd closed the connection");
                        self.link = Link::Offline { retry: true };
                    }
                    Err(e) => {
                        warn!(addr = %self.addr, error = %e, "gpsd read failed");
                        self.link = Link::Offline { retry: true };
                    }
                },
            }
        }
    }

    /// A zero maximum age accepts whatever gpsd reports as current.
    fn is_too_old(&self, fix: &Fix) -> bool {
        if self.maximum_age.is_zero() {
            return false;
        }
        let max_age_ms = i64::try_from(self.maximum_age.as_millis()).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_sub(fix.timestamp) > max_age_ms
    }
}

impl LocationProvider for GpsdProvider {
    fn name(&self) -> &str {
        "gpsd"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn watch(&self, options: &WatchOptions) -> FixStream {
        let watch = GpsdWatch {
            addr: self.addr.clone(),
            reconnect_delay: self.reconnect_delay,
            maximum_age: options.maximum_age,
            link: Link::Offline { retry: false },
        };
        stream::unfold(watch, |mut watch| async move {
            let item = watch.next_fix().await;
            Some((item, watch))
        })
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// TPV parsing
// ---------------------------------------------------------------------------

/// The subset of a gpsd report we care about.
#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    eph: Option<f64>,
    #[serde(default)]
    epx: Option<f64>,
    #[serde(default)]
    epy: Option<f64>,
    #[serde(default)]
    track: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
}

/// Parse one line of gpsd JSON output.
///
/// Returns `None` for non-TPV reports, reports without a 2D/3D fix, and
/// malformed lines. Reports without a time are stamped with the current
/// wall clock.
pub fn parse_tpv(line: &str) -> Option<Fix> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }

    let accuracy = report
        .eph
        .or_else(|| match (report.epx, report.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        })
        .unwrap_or(0.0);
    let timestamp = report
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map_or_else(|| Utc::now().timestamp_millis(), |t| t.timestamp_millis());

    Some(Fix {
        latitude: report.lat?,
        longitude: report.lon?,
        accuracy,
        heading: report.track,
        speed: report.speed,
        timestamp,
    })
}
