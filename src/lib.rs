//! Request-scoped trace capture for axum services.
//!
//! While a request runs, tracewire builds an in-memory dump tree of
//! sections and content blocks, annotated with named nestable timers,
//! and can halt the pipeline early when execution reaches a previously
//! identified breakpoint block. The rendered tree replaces the real
//! response for traced requests; untraced requests pass through the
//! middleware untouched.

pub mod config;
pub mod error;
pub mod trace;
pub mod web;

pub use config::TraceConfig;
pub use error::TraceError;
pub use trace::node::{BlockOptions, NodeKind};
pub use trace::timer::TimerResult;
pub use trace::tree::TraceSession;
pub use web::client::traced_get;
pub use web::layer::{trace_layer, Trace};
