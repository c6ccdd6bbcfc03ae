//! HTTP and WebSocket server for Courier.
//!
//! Exposes the job queue over a REST API and the topic broadcast layer over
//! WebSockets.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
