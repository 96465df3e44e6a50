//! Tabletalk API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Exposes the session dispatcher over HTTP: each request's response
//! events stream back as Server-Sent Events, and a handful of JSON
//! endpoints manage sessions and list capabilities.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
