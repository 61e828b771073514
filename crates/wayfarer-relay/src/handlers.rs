//! REST handlers for relay introspection.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | Connection and participant counts |
//! | `GET` | `/api/participants` | Live roster with last positions |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;

use crate::state::AppState;

/// Relay health and counts.
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_secs = Utc::now()
        .signed_duration_since(state.started_at())
        .num_seconds()
        .max(0);
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.connection_count().await,
        "participants": state.participant_count().await,
        "startedAt": state.started_at(),
        "uptimeSecs": uptime_secs,
    }))
}

/// Live roster.
pub async fn list_participants(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let participants = state.participants().await;
    Json(serde_json::json!({
        "count": participants.len(),
        "participants": participants,
    }))
}
