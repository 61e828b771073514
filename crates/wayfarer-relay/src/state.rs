//! Shared relay state.
//!
//! The relay keeps one roster entry per live websocket connection, keyed by
//! a server-assigned [`ConnectionKey`]. Two connections may carry the same
//! participant id (two tabs, a reconnect racing the old socket); they are
//! tracked independently and `userDisconnected` is only announced when the
//! last of them leaves.
//!
//! Frames fan out through a [`broadcast`] channel. Each [`Relayed`] message
//! records the connection it came from so the originator can skip it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use wayfarer_types::{ParticipantId, PositionSample, ServerEvent};

use crate::emergency::{ContactNotifier, LogNotifier};

/// Default broadcast channel capacity.
///
/// A subscriber that falls further behind than this receives
/// [`broadcast::error::RecvError::Lagged`] and skips ahead.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Server-assigned identity of one websocket connection.
pub type ConnectionKey = u64;

/// A frame on its way to every connection except `origin`.
#[derive(Debug, Clone)]
pub struct Relayed {
    /// The connection that caused the frame.
    pub origin: ConnectionKey,
    /// The frame itself.
    pub event: ServerEvent,
}

/// One live connection.
#[derive(Debug, Clone)]
pub struct Member {
    /// Participant id from the handshake.
    pub participant_id: ParticipantId,
    /// Display name from the handshake.
    pub display_name: String,
    /// When the socket was accepted.
    pub joined_at: DateTime<Utc>,
    /// Most recent accepted sample.
    pub last_sample: Option<PositionSample>,
}

/// Public view of a roster entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    /// Participant id.
    pub participant_id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// When the connection joined.
    pub joined_at: DateTime<Utc>,
    /// Most recent sample, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<PositionSample>,
}

/// Everything a new connection needs to start relaying.
#[derive(Debug)]
pub struct Joined {
    /// The connection's key.
    pub key: ConnectionKey,
    /// Last sample of every other live connection that has one.
    pub roster: Vec<PositionSample>,
    /// Subscription to relayed frames, taken at the same instant as the
    /// roster so nothing falls between the two.
    pub rx: broadcast::Receiver<Relayed>,
}

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
pub struct AppState {
    tx: broadcast::Sender<Relayed>,
    roster: RwLock<BTreeMap<ConnectionKey, Member>>,
    next_key: AtomicU64,
    notifier: Arc<dyn ContactNotifier>,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// State with the default capacity and a logging notifier.
    pub fn new() -> Self {
        Self::with_notifier(DEFAULT_BROADCAST_CAPACITY, Arc::new(LogNotifier))
    }

    /// State with an explicit broadcast capacity and contact notifier.
    pub fn with_notifier(capacity: usize, notifier: Arc<dyn ContactNotifier>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            roster: RwLock::new(BTreeMap::new()),
            next_key: AtomicU64::new(1),
            notifier,
            started_at: Utc::now(),
        }
    }

    /// The notifier used by the emergency endpoint.
    pub fn notifier(&self) -> &dyn ContactNotifier {
        self.notifier.as_ref()
    }

    /// When the relay started.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Register a new connection.
    pub async fn join(&self, participant_id: ParticipantId, display_name: String) -> Joined {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let mut roster = self.roster.write().await;

        let others: Vec<PositionSample> = roster
            .values()
            .filter_map(|member| member.last_sample.clone())
            .collect();
        let rx = self.tx.subscribe();

        info!(connection = key, participant = %participant_id, name = %display_name, "participant joined");
        roster.insert(
            key,
            Member {
                participant_id,
                display_name,
                joined_at: Utc::now(),
                last_sample: None,
            },
        );

        Joined {
            key,
            roster: others,
            rx,
        }
    }

    /// Accept a sample from connection `key` and relay it.
    ///
    /// The sample is re-stamped with the connection's participant id so a
    /// client cannot speak for someone else. Invalid samples, and samples
    /// from unknown connections, are dropped. Returns the relayed sample.
    pub async fn record(&self, key: ConnectionKey, mut sample: PositionSample) -> Option<PositionSample> {
        {
            let mut roster = self.roster.write().await;
            let member = roster.get_mut(&key)?;
            sample.participant_id = member.participant_id.clone();
            if !sample.is_valid() {
                debug!(connection = key, "dropping invalid sample");
                return None;
            }
            member.last_sample = Some(sample.clone());
        }

        // No receivers is fine: the sender may be alone.
        let _ = self.tx.send(Relayed {
            origin: key,
            event: ServerEvent::LocationUpdate(sample.clone()),
        });
        Some(sample)
    }

    /// Remove connection `key`.
    ///
    /// Returns the participant id if this was its last connection, in which
    /// case `userDisconnected` has been broadcast.
    pub async fn leave(&self, key: ConnectionKey) -> Option<ParticipantId> {
        let participant_id = {
            let mut roster = self.roster.write().await;
            let member = roster.remove(&key)?;
            if roster
                .values()
                .any(|other| other.participant_id == member.participant_id)
            {
                debug!(connection = key, participant = %member.participant_id, "participant still connected elsewhere");
                return None;
            }
            member.participant_id
        };

        info!(connection = key, participant = %participant_id, "participant left");
        let _ = self.tx.send(Relayed {
            origin: key,
            event: ServerEvent::UserDisconnected(participant_id.clone()),
        });
        Some(participant_id)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.roster.read().await.len()
    }

    /// Number of distinct participants.
    pub async fn participant_count(&self) -> usize {
        let roster = self.roster.read().await;
        let mut ids: Vec<&ParticipantId> = roster.values().map(|m| &m.participant_id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    /// Roster view, ordered by connection.
    pub async fn participants(&self) -> Vec<ParticipantSummary> {
        self.roster
            .read()
            .await
            .values()
            .map(|member| ParticipantSummary {
                participant_id: member.participant_id.clone(),
                display_name: member.display_name.clone(),
                joined_at: member.joined_at,
                last_sample: member.last_sample.clone(),
            })
            .collect()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for AppState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppState")
            .field("receivers", &self.tx.receiver_count())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
