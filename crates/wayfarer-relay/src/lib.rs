//! Realtime relay server for Wayfarer.
//!
//! An Axum HTTP server exposing:
//!
//! - **`WebSocket` endpoint** (`/ws/location`) that fans location updates
//!   out to every other connected participant via
//!   [`tokio::sync::broadcast`], sends the current roster on join and
//!   announces departures
//! - **Emergency endpoint** (`POST /api/emergency`) that notifies a user's
//!   contacts and reports per-contact delivery
//! - **REST introspection** (`/api/status`, `/api/participants`)
//!
//! The relay is stateless beyond the live roster: nothing is persisted and
//! a restart forgets every participant.

pub mod config;
pub mod emergency;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use config::RelayConfig;
pub use emergency::{ContactNotifier, LogNotifier, Notice};
pub use error::RelayError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, bind, serve, start_server};
pub use state::AppState;
