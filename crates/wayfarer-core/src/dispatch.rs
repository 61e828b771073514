//! Emergency alert dispatcher.
//!
//! One HTTP POST per alert to the notification endpoint, no retry. The
//! dispatcher is stateless: it keeps no history of past alerts.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, warn};
use wayfarer_types::{AlertPayload, AlertResponse};

use crate::error::DispatchError;

/// Delay the user gets to cancel an alert after pressing the button.
pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(3);

/// HTTP status the endpoint uses for partial delivery.
const MULTI_STATUS: u16 = 207;

/// A successful (2xx) endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// HTTP status code.
    pub status: u16,
    /// Per-contact summary, when the endpoint returned one.
    pub summary: Option<AlertResponse>,
}

impl Delivery {
    /// Whether only some contacts were notified.
    pub fn is_partial(&self) -> bool {
        self.status == MULTI_STATUS || self.summary.as_ref().is_some_and(AlertResponse::is_partial)
    }
}

/// Result of a cancellable dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    /// The countdown was cancelled; nothing was sent.
    Cancelled,
    /// The countdown elapsed and the alert was sent.
    Dispatched(Result<Delivery, DispatchError>),
}

/// Posts alert payloads to the notification endpoint.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl AlertDispatcher {
    /// Dispatcher posting to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Dispatcher using a preconfigured HTTP client.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// The notification endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one alert.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DeliveryFailed`] for a non-2xx answer and
    /// [`DispatchError::Transport`] when no answer arrived at all.
    pub async fn send_alert(&self, payload: &AlertPayload) -> Result<Delivery, DispatchError> {
        info!(
            endpoint = %self.endpoint,
            contacts = payload.emergency_contacts.len(),
            severity = %payload.severity,
            "dispatching emergency alert"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "alert request failed");
                DispatchError::Transport(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read response body".to_owned());

        if !status.is_success() {
            error!(status = status.as_u16(), %body, "alert delivery failed");
            return Err(DispatchError::DeliveryFailed {
                status: status.as_u16(),
                body,
            });
        }

        let delivery = Delivery {
            status: status.as_u16(),
            summary: serde_json::from_str(&body).ok(),
        };
        if delivery.is_partial() {
            warn!(status = delivery.status, "alert only partially delivered");
        } else {
            info!(status = delivery.status, "alert delivered");
        }
        Ok(delivery)
    }

    /// Wait out `countdown`, then send, unless `cancel` fires first.
    ///
    /// Dropping the cancel sender without sending does not cancel.
    pub async fn send_after_countdown(
        &self,
        payload: &AlertPayload,
        countdown: Duration,
        cancel: oneshot::Receiver<()>,
    ) -> AlertOutcome {
        let deadline = tokio::time::sleep(countdown);
        tokio::pin!(deadline);

        let cancelled = tokio::select! {
            biased;
            signal = cancel => signal.is_ok(),
            () = &mut deadline => false,
        };
        if cancelled {
            info!("emergency alert cancelled during countdown");
            return AlertOutcome::Cancelled;
        }

        deadline.await;
        AlertOutcome::Dispatched(self.send_alert(payload).await)
    }
}
