//! Axum-facing surface: the trace middleware and the traced HTTP client.

pub mod client;
pub mod layer;
