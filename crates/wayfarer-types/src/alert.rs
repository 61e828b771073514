//! Emergency alert payload and the notification endpoint's response.
//!
//! The client packages an [`AlertPayload`] and POSTs it once to the
//! notification endpoint. The endpoint notifies every emergency contact and
//! answers with an [`AlertResponse`] summarising per-contact delivery.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use validator::{Validate, ValidateEmail, ValidationError};

/// Priority attached to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export, export_to = "bindings/")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs attention soon.
    Medium,
    /// Needs immediate attention. Used by the emergency button.
    #[default]
    High,
    /// Life-threatening.
    Critical,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// Static details about the person raising the alert.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct UserInfo {
    /// Full name.
    #[validate(length(min = 1, message = "user name is required"))]
    pub name: String,
    /// Contact phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Free-form description of where the user is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Body of the emergency POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AlertPayload {
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Who raised it.
    #[validate(nested)]
    pub user_info: UserInfo,
    /// E-mail addresses to notify.
    #[validate(
        length(min = 1, message = "at least one emergency contact is required"),
        custom(function = "validate_contacts")
    )]
    pub emergency_contacts: Vec<String>,
    /// Where the alert was raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Alert priority.
    #[serde(default)]
    pub severity: Severity,
    /// Human-readable alert text.
    #[validate(length(min = 1, message = "message is required"))]
    pub message: String,
}

impl AlertPayload {
    /// Build the payload the emergency button sends.
    ///
    /// Severity is [`Severity::High`] and the message names the user and
    /// their location.
    pub fn new(user_info: UserInfo, emergency_contacts: Vec<String>, now: DateTime<Utc>) -> Self {
        let place = user_info
            .location
            .clone()
            .unwrap_or_else(|| String::from("an unknown location"));
        let message = format!(
            "EMERGENCY ALERT: {} has activated the emergency button at {place}. \
             Immediate assistance required.",
            user_info.name
        );
        Self {
            timestamp: now,
            location: user_info.location.clone(),
            user_info,
            emergency_contacts,
            severity: Severity::High,
            message,
        }
    }
}

/// Every contact must be a syntactically valid e-mail address.
fn validate_contacts(contacts: &[String]) -> Result<(), ValidationError> {
    match contacts.iter().find(|c| !c.validate_email()) {
        None => Ok(()),
        Some(bad) => {
            let mut err = ValidationError::new("email");
            err.message = Some(Cow::Owned(format!("invalid contact address: {bad}")));
            Err(err)
        }
    }
}

/// Delivery result for one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ContactResult {
    /// Contact address.
    pub contact: String,
    /// Whether the notification was handed off.
    pub success: bool,
    /// Identifier assigned by the delivery backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body returned by the notification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AlertResponse {
    /// True when at least one contact was notified.
    pub success: bool,
    /// Timestamp echoed from the payload.
    pub timestamp: DateTime<Utc>,
    /// Contacts notified.
    pub notified: usize,
    /// Contacts that could not be notified.
    pub failed: usize,
    /// Contacts in the payload.
    pub total_contacts: usize,
    /// Per-contact results, in payload order.
    pub results: Vec<ContactResult>,
    /// Set when delivery was partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Set when nobody could be notified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AlertResponse {
    /// Summarise per-contact results.
    pub fn from_results(timestamp: DateTime<Utc>, results: Vec<ContactResult>) -> Self {
        let total_contacts = results.len();
        let notified = results.iter().filter(|r| r.success).count();
        let failed = total_contacts.saturating_sub(notified);
        let warning = (notified > 0 && failed > 0)
            .then(|| format!("Failed to notify {failed} out of {total_contacts} contacts"));
        let error = (notified == 0)
            .then(|| String::from("Failed to send emergency alert to any contacts"));
        Self {
            success: notified > 0,
            timestamp,
            notified,
            failed,
            total_contacts,
            results,
            warning,
            error,
        }
    }

    /// True when some, but not all, contacts were notified.
    pub const fn is_partial(&self) -> bool {
        self.notified > 0 && self.failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserInfo {
        UserInfo {
            name: String::from("Asha Rao"),
            phone: Some(String::from("+91-555-0100")),
            location: Some(String::from("Charminar")),
        }
    }

    #[test]
    fn payload_message_names_user_and_place() {
        let payload = AlertPayload::new(user(), vec![String::from("a@example.com")], Utc::now());
        assert_eq!(payload.severity, Severity::High);
        assert!(payload.message.contains("Asha Rao"));
        assert!(payload.message.contains("Charminar"));
        assert_eq!(payload.location.as_deref(), Some("Charminar"));
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn payload_requires_contacts_and_name() {
        let mut payload = AlertPayload::new(user(), Vec::new(), Utc::now());
        assert!(payload.validate().is_err());

        payload.emergency_contacts = vec![String::from("not-an-address")];
        assert!(payload.validate().is_err());

        payload.emergency_contacts = vec![String::from("ok@example.com")];
        payload.user_info.name.clear();
        assert!(payload.validate().is_err());
    }

    #[test]
    fn payload_wire_shape() {
        let payload = AlertPayload::new(user(), vec![String::from("a@example.com")], Utc::now());
        let json = serde_json::to_value(&payload).unwrap_or_default();
        assert_eq!(json["severity"], "HIGH");
        assert_eq!(json["userInfo"]["name"], "Asha Rao");
        assert_eq!(json["emergencyContacts"][0], "a@example.com");
    }

    #[test]
    fn response_summary_counts() {
        let ok = ContactResult {
            contact: String::from("a@example.com"),
            success: true,
            message_id: Some(String::from("m1")),
            error: None,
        };
        let failed = ContactResult {
            contact: String::from("b@example.com"),
            success: false,
            message_id: None,
            error: Some(String::from("mailbox full")),
        };

        let partial = AlertResponse::from_results(Utc::now(), vec![ok.clone(), failed.clone()]);
        assert!(partial.success);
        assert!(partial.is_partial());
        assert!(partial.warning.is_some());
        assert!(partial.error.is_none());

        let none = AlertResponse::from_results(Utc::now(), vec![failed]);
        assert!(!none.success);
        assert!(none.error.is_some());

        let all = AlertResponse::from_results(Utc::now(), vec![ok]);
        assert!(all.success);
        assert!(!all.is_partial());
        assert_eq!(all.total_contacts, 1);
    }
}
