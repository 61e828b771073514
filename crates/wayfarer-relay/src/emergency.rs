//! Emergency notification endpoint.
//!
//! `POST /api/emergency` accepts an [`AlertPayload`], validates it,
//! notifies every contact concurrently and reports per-contact results:
//!
//! | Outcome | Status |
//! |---------|--------|
//! | every contact notified | 200 |
//! | some contacts notified | 207 |
//! | nobody notified | 500 |
//! | malformed or invalid payload | 400 |
//! | any method but POST | 405 |
//!
//! Delivery itself (e-mail, SMS) is behind [`ContactNotifier`].

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;
use wayfarer_types::{AlertPayload, AlertResponse, ContactResult, Severity};

use crate::error::RelayError;
use crate::state::AppState;

/// A rendered notification for one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Recipient address.
    pub contact: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// Alert priority, for transports that support it.
    pub severity: Severity,
}

/// Delivers notices to contacts.
///
/// Returns a message id on success and a reason on failure.
pub trait ContactNotifier: Send + Sync {
    /// Deliver one notice.
    fn notify<'a>(&'a self, notice: &'a Notice) -> BoxFuture<'a, Result<String, String>>;
}

/// Notifier that writes each notice to the log and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ContactNotifier for LogNotifier {
    fn notify<'a>(&'a self, notice: &'a Notice) -> BoxFuture<'a, Result<String, String>> {
        let message_id = format!("<{}@wayfarer.local>", Uuid::new_v4());
        warn!(
            contact = %notice.contact,
            subject = %notice.subject,
            severity = %notice.severity,
            %message_id,
            "emergency notice"
        );
        Box::pin(future::ready(Ok(message_id)))
    }
}

/// Subject line for an alert.
pub fn render_subject(payload: &AlertPayload) -> String {
    format!(
        "\u{1f6a8} EMERGENCY ALERT - {} Priority - {}",
        payload.severity, payload.user_info.name
    )
}

/// Plain-text body for an alert.
pub fn render_text(payload: &AlertPayload) -> String {
    let phone = payload.user_info.phone.as_deref().unwrap_or("Not provided");
    let location = payload.location.as_deref().unwrap_or("Not specified");
    format!(
        "\u{1f6a8} EMERGENCY ALERT \u{1f6a8}\n\
         IMMEDIATE ASSISTANCE REQUIRED\n\
         \n\
         Priority: {severity}\n\
         Person: {name}\n\
         Phone: {phone}\n\
         Location: {location}\n\
         Time: {time}\n\
         \n\
         Message: {message}\n\
         \n\
         This is an automated emergency alert. Please respond immediately.\n",
        severity = payload.severity,
        name = payload.user_info.name,
        time = format_time(payload.timestamp),
        message = payload.message,
    )
}

fn format_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Notify every contact concurrently, preserving payload order.
pub async fn notify_all(notifier: &dyn ContactNotifier, payload: &AlertPayload) -> Vec<ContactResult> {
    let subject = render_subject(payload);
    let text = render_text(payload);
    let notices: Vec<Notice> = payload
        .emergency_contacts
        .iter()
        .map(|contact| Notice {
            contact: contact.clone(),
            subject: subject.clone(),
            text: text.clone(),
            severity: payload.severity,
        })
        .collect();

    let deliveries = notices.iter().map(|notice| async move {
        match notifier.notify(notice).await {
            Ok(message_id) => ContactResult {
                contact: notice.contact.clone(),
                success: true,
                message_id: Some(message_id),
                error: None,
            },
            Err(reason) => {
                error!(contact = %notice.contact, %reason, "failed to notify contact");
                ContactResult {
                    contact: notice.contact.clone(),
                    success: false,
                    message_id: None,
                    error: Some(reason),
                }
            }
        }
    });
    future::join_all(deliveries).await
}

/// Handle an emergency alert.
///
/// # Route
///
/// `POST /api/emergency`
pub async fn post_emergency(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, RelayError> {
    let payload: AlertPayload =
        serde_json::from_slice(&body).map_err(|e| RelayError::InvalidBody(e.to_string()))?;
    payload.validate()?;

    let results = notify_all(state.notifier(), &payload).await;
    let response = AlertResponse::from_results(payload.timestamp, results);

    info!(
        user = %payload.user_info.name,
        location = payload.location.as_deref().unwrap_or("unspecified"),
        notified = response.notified,
        failed = response.failed,
        "emergency alert processed"
    );

    let status = if response.notified == 0 {
        StatusCode::INTERNAL_SERVER_ERROR
    } else if response.failed > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

/// Any method other than POST on the emergency route.
pub async fn method_not_allowed() -> RelayError {
    RelayError::MethodNotAllowed
}
