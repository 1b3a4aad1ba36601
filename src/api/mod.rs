//! HTTP API: chat, profile, website analysis, reset and chat history.

pub mod routes;

pub use routes::{AppState, api_routes};
