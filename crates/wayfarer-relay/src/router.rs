//! Axum router construction for the relay.
//!
//! Assembles the websocket relay, the emergency endpoint and the
//! introspection routes into a single [`Router`] with open CORS for the
//! browser front-end.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::emergency;
use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete relay router.
///
/// - `GET /ws/location` -- relay websocket
/// - `POST /api/emergency` -- emergency notification
/// - `GET /api/status` -- counts and uptime
/// - `GET /api/participants` -- live roster
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/location", get(ws::ws_location))
        .route(
            "/api/emergency",
            post(emergency::post_emergency).fallback(emergency::method_not_allowed),
        )
        .route("/api/status", get(handlers::get_status))
        .route("/api/participants", get(handlers::list_participants))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
