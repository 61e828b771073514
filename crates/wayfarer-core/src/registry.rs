//! Peer registry: participant id -> last known position.
//!
//! Each client owns exactly one [`PeerRegistry`]. It is mutated only from the
//! tracker loop (relay inbound events and the sampler's self-update path),
//! so it needs no locking.
//!
//! # Invariants
//!
//! - A sample whose timestamp is older than or equal to the stored one for
//!   the same participant is rejected. The first sample for an id is always
//!   accepted.
//! - Every successful mutation is reported to the single subscribed
//!   [`RegistryObserver`] exactly once.
//! - Snapshots are ordered by participant id, so they are stable across
//!   calls with no intervening mutation.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, trace};
use wayfarer_types::{ParticipantId, PeerEntry, PositionSample};

/// A single logical change to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryChange {
    /// First sample for a participant.
    Added(PeerEntry),
    /// Newer sample for a known participant.
    Updated(PeerEntry),
    /// Participant removed.
    Removed(ParticipantId),
}

impl RegistryChange {
    /// The participant this change concerns.
    pub const fn participant_id(&self) -> &ParticipantId {
        match self {
            Self::Added(entry) | Self::Updated(entry) => &entry.participant_id,
            Self::Removed(id) => id,
        }
    }
}

/// The one consumer of registry changes (normally the map surface).
pub trait RegistryObserver: Send {
    /// Called once per successful mutation, after it has been applied.
    fn on_change(&mut self, change: &RegistryChange);
}

/// What `upsert` did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New participant entry created.
    Inserted,
    /// Existing entry replaced by a newer sample.
    Updated,
    /// Sample was not newer than the stored one; registry unchanged.
    Stale,
    /// Sample failed validation; registry unchanged.
    Invalid,
}

impl UpsertOutcome {
    /// Whether the registry changed.
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

/// The authoritative per-client mapping from participant to position.
pub struct PeerRegistry {
    self_id: ParticipantId,
    entries: BTreeMap<ParticipantId, PeerEntry>,
    observer: Option<Box<dyn RegistryObserver>>,
}

impl PeerRegistry {
    /// Create an empty registry for the given local participant.
    pub const fn new(self_id: ParticipantId) -> Self {
        Self {
            self_id,
            entries: BTreeMap::new(),
            observer: None,
        }
    }

    /// The local participant's id.
    pub const fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    /// Install the change subscriber, replacing any previous one.
    ///
    /// Returns the previous subscriber, if there was one.
    pub fn subscribe(
        &mut self,
        observer: Box<dyn RegistryObserver>,
    ) -> Option<Box<dyn RegistryObserver>> {
        self.observer.replace(observer)
    }

    /// Insert or update the entry for `sample.participant_id`.
    ///
    /// Stale and invalid samples leave the registry untouched.
    pub fn upsert(&mut self, sample: PositionSample) -> UpsertOutcome {
        if !sample.is_valid() {
            debug!(participant = %sample.participant_id, "rejecting invalid sample");
            return UpsertOutcome::Invalid;
        }

        let stored = self
            .entries
            .get(&sample.participant_id)
            .map(|existing| existing.latest.timestamp);
        if let Some(stored) = stored.filter(|stored| *stored >= sample.timestamp) {
            trace!(
                participant = %sample.participant_id,
                stored,
                incoming = sample.timestamp,
                "rejecting stale sample"
            );
            return UpsertOutcome::Stale;
        }

        let id = sample.participant_id.clone();
        let entry = PeerEntry {
            is_self: id == self.self_id,
            participant_id: id.clone(),
            latest: sample,
        };
        let (outcome, change) = match self.entries.insert(id, entry.clone()) {
            None => (UpsertOutcome::Inserted, RegistryChange::Added(entry)),
            Some(_) => (UpsertOutcome::Updated, RegistryChange::Updated(entry)),
        };
        self.notify(&change);
        outcome
    }

    /// Apply a batch of samples; returns how many were applied.
    pub fn upsert_all(&mut self, samples: impl IntoIterator<Item = PositionSample>) -> usize {
        samples
            .into_iter()
            .map(|sample| self.upsert(sample))
            .filter(|outcome| outcome.is_applied())
            .count()
    }

    /// Remove a participant. Returns `false` if it was not present.
    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        if self.entries.remove(id).is_none() {
            return false;
        }
        self.notify(&RegistryChange::Removed(id.clone()));
        true
    }

    /// Remove every non-self entry whose latest sample is older than
    /// `max_idle` relative to `now_ms`.
    ///
    /// Returns the ids that were removed.
    pub fn prune_idle(&mut self, now_ms: i64, max_idle: Duration) -> Vec<ParticipantId> {
        let max_idle_ms = i64::try_from(max_idle.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(max_idle_ms);
        let idle: Vec<ParticipantId> = self
            .entries
            .values()
            .filter(|entry| !entry.is_self && entry.latest.timestamp < cutoff)
            .map(|entry| entry.participant_id.clone())
            .collect();
        for id in &idle {
            self.remove(id);
        }
        idle
    }

    /// Copy of every entry, ordered by participant id.
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.entries.values().cloned().collect()
    }

    /// Look up one entry.
    pub fn get(&self, id: &ParticipantId) -> Option<&PeerEntry> {
        self.entries.get(id)
    }

    /// The local participant's entry, once a fix has been recorded.
    pub fn self_entry(&self) -> Option<&PeerEntry> {
        self.entries.get(&self.self_id)
    }

    /// Number of entries, including self.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn notify(&mut self, change: &RegistryChange) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_change(change);
        }
    }
}

impl core::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("self_id", &self.self_id)
            .field("entries", &self.entries.len())
            .field("observed", &self.observer.is_some())
            .finish()
    }
}
