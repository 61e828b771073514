//! Geolocation sampler.
//!
//! Wraps a platform position-watch primitive ([`LocationProvider`]) and turns
//! it into a lazy, infinite, restartable stream of [`SamplerEvent`]s:
//!
//! - nothing is read until the [`SampleHandle`] is polled, and at most one
//!   fix is in flight at a time;
//! - every sample carries a best-effort battery level;
//! - timestamps never go backwards within one handle;
//! - transient failures are surfaced as [`SamplerEvent::Error`] while the
//!   watch keeps running;
//! - [`SampleHandle::stop`] drops the underlying subscription and may be
//!   called any number of times.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info};
use wayfarer_types::{ParticipantId, PositionSample, TrackingConfiguration};

use crate::battery::BatteryGauge;
use crate::error::{AcquisitionError, SamplerError};

/// Upper bound on a battery read attached to one sample.
pub const BATTERY_READ_LIMIT: Duration = Duration::from_millis(250);

/// A raw fix from a location provider, before identity and battery are
/// attached.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in metres.
    pub accuracy: f64,
    /// Heading in degrees from true north.
    #[serde(default)]
    pub heading: Option<f64>,
    /// Speed in metres per second.
    #[serde(default)]
    pub speed: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Options handed to the provider when a watch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Prefer precision over battery.
    pub high_accuracy: bool,
    /// Desired spacing between fixes.
    pub update_interval: Duration,
    /// Oldest acceptable cached fix; zero means fresh fixes only.
    pub maximum_age: Duration,
    /// How long to wait for a fix before reporting a timeout.
    pub timeout: Duration,
}

impl From<&TrackingConfiguration> for WatchOptions {
    fn from(config: &TrackingConfiguration) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            update_interval: config.update_interval_hint(),
            maximum_age: config.max_sample_age(),
            timeout: config.acquisition_timeout(),
        }
    }
}

/// Stream of fixes or transient errors from a provider.
pub type FixStream = BoxStream<'static, Result<Fix, AcquisitionError>>;

/// A platform's continuous position-watch primitive.
pub trait LocationProvider: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Whether the platform has any location capability.
    fn is_supported(&self) -> bool;

    /// Begin watching. The stream runs until dropped.
    fn watch(&self, options: &WatchOptions) -> FixStream;
}

/// One element of the sampler stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerEvent {
    /// A new local position.
    Sample(PositionSample),
    /// A transient failure; the watch continues.
    Error(AcquisitionError),
}

/// Produces sample streams for the local participant.
#[derive(Clone)]
pub struct Sampler {
    participant_id: ParticipantId,
    provider: Arc<dyn LocationProvider>,
    battery: BatteryGauge,
}

impl Sampler {
    /// Create a sampler for `participant_id` over `provider`.
    pub fn new(
        participant_id: ParticipantId,
        provider: Arc<dyn LocationProvider>,
        battery: BatteryGauge,
    ) -> Self {
        Self {
            participant_id,
            provider,
            battery,
        }
    }

    /// Start a watch.
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError::UnsupportedPlatform`] when the provider has no
    /// location capability and [`SamplerError::Disabled`] when tracking is
    /// switched off. Both are reported before any I/O happens.
    pub fn start(&self, config: &TrackingConfiguration) -> Result<SampleHandle, SamplerError> {
        if !self.provider.is_supported() {
            return Err(SamplerError::UnsupportedPlatform);
        }
        if !config.enabled {
            return Err(SamplerError::Disabled);
        }

        let options = WatchOptions::from(config);
        info!(
            provider = self.provider.name(),
            high_accuracy = options.high_accuracy,
            interval_ms = options.update_interval.as_millis(),
            timeout_ms = options.timeout.as_millis(),
            "starting position watch"
        );

        let state = WatchState {
            fixes: self.provider.watch(&options),
            participant_id: self.participant_id.clone(),
            battery: self.battery.clone(),
            timeout: options.timeout,
            last_timestamp: None,
        };
        let events = stream::unfold(state, |mut state| async move {
            let event = state.next_event().await?;
            Some((event, state))
        });

        Ok(SampleHandle {
            events: Some(events.boxed()),
        })
    }
}

impl core::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sampler")
            .field("participant_id", &self.participant_id)
            .field("provider", &self.provider.name())
            .field("battery", &self.battery)
            .finish()
    }
}

/// Per-watch state threaded through the sample stream.
struct WatchState {
    fixes: FixStream,
    participant_id: ParticipantId,
    battery: BatteryGauge,
    timeout: Duration,
    last_timestamp: Option<i64>,
}

impl WatchState {
    /// Wait for the next fix or error. `None` only if the provider ends.
    async fn next_event(&mut self) -> Option<SamplerEvent> {
        let next = if self.timeout.is_zero() {
            self.fixes.next().await
        } else {
            match tokio::time::timeout(self.timeout, self.fixes.next()).await {
                Ok(next) => next,
                Err(_) => return Some(SamplerEvent::Error(AcquisitionError::Timeout)),
            }
        };

        match next? {
            Ok(fix) => Some(SamplerEvent::Sample(self.attach(fix).await)),
            Err(e) => {
                debug!(error = %e, "position acquisition failed");
                Some(SamplerEvent::Error(e))
            }
        }
    }

    async fn attach(&mut self, fix: Fix) -> PositionSample {
        let timestamp = self
            .last_timestamp
            .map_or(fix.timestamp, |last| fix.timestamp.max(last));
        self.last_timestamp = Some(timestamp);

        PositionSample {
            participant_id: self.participant_id.clone(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            heading: fix.heading,
            speed: fix.speed,
            timestamp,
            battery_level: self.battery.read_within(BATTERY_READ_LIMIT).await,
        }
    }
}

/// A running watch.
///
/// Implements [`Stream`]; polling it drives the underlying provider.
pub struct SampleHandle {
    events: Option<BoxStream<'static, SamplerEvent>>,
}

impl SampleHandle {
    /// Cancel the underlying subscription. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.events.take().is_some() {
            debug!("position watch stopped");
        }
    }

    /// Whether the watch is still running.
    pub const fn is_active(&self) -> bool {
        self.events.is_some()
    }
}

impl Stream for SampleHandle {
    type Item = SamplerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(events) = self.events.as_mut() else {
            return Poll::Ready(None);
        };
        match events.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                self.events = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl core::fmt::Debug for SampleHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SampleHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// A platform with no location capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn name(&self) -> &str {
        "none"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn watch(&self, _options: &WatchOptions) -> FixStream {
        stream::empty().boxed()
    }
}

/// Replays a fixed script of fixes and errors.
///
/// Items are released one per interval (the provider's own interval, or the
/// watch's update interval hint). Once the script is exhausted the watch
/// stays open without producing anything, like a stationary device.
#[derive(Debug, Clone, Default)]
pub struct ReplayProvider {
    script: Vec<Result<Fix, AcquisitionError>>,
    interval: Option<Duration>,
}

impl ReplayProvider {
    /// Replay `script` at the watch's update interval.
    pub const fn new(script: Vec<Result<Fix, AcquisitionError>>) -> Self {
        Self {
            script,
            interval: None,
        }
    }

    /// Replay a list of fixes with no errors.
    pub fn from_fixes(fixes: Vec<Fix>) -> Self {
        Self::new(fixes.into_iter().map(Ok).collect())
    }

    /// Override the release interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl LocationProvider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn watch(&self, options: &WatchOptions) -> FixStream {
        let interval = self.interval.unwrap_or(options.update_interval);
        let script = stream::iter(self.script.clone()).then(move |item| async move {
            tokio::time::sleep(interval).await;
            item
        });
        script.chain(stream::pending()).boxed()
    }
}
