//! Participant identity.
//!
//! A participant is one connected session in the live location relay. Its
//! identifier is an opaque string: clients generate their own on startup and
//! the relay never verifies uniqueness, so ids received from the wire are
//! accepted as-is.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Prefix used for locally generated participant ids.
const GENERATED_PREFIX: &str = "p-";

/// Opaque identifier of a relay participant.
///
/// Serialized as a bare JSON string. Ordering is lexicographic, which gives
/// the peer registry a stable snapshot order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export, export_to = "bindings/")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh session identifier.
    ///
    /// Uses UUID v7, so the id carries a millisecond time component followed
    /// by random bits. Collisions within one relay are possible only in
    /// theory.
    pub fn generate() -> Self {
        Self(format!("{GENERATED_PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never valid on the wire).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = ParticipantId::generate();
        let b = ParticipantId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(GENERATED_PREFIX));
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = ParticipantId::new("alice");
        let json = serde_json::to_string(&id).ok();
        assert_eq!(json.as_deref(), Some("\"alice\""));
    }

    #[test]
    fn display_matches_inner() {
        let id = ParticipantId::from("bob");
        assert_eq!(id.to_string(), "bob");
        assert!(!id.is_empty());
        assert!(ParticipantId::new("").is_empty());
    }
}
