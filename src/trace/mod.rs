//! The in-memory dump-tree engine.
//!
//! One [`tree::TraceSession`] is created per traced request. It owns an
//! arena of [`node::Node`]s, a registry of named [`timer`]s, and the
//! breakpoint bookkeeping that can halt a request mid-flight.

pub mod format;
pub mod node;
pub mod timer;
pub mod tree;
