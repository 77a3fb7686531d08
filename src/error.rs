//! Error types for the trace engine.

use crate::trace::node::NodeKind;

/// Recoverable errors surfaced by the dump-tree API.
///
/// Contract violations that indicate a bug in the instrumenting code
/// (attaching a child to a closed node or to a block leaf) panic instead;
/// see [`crate::trace::tree::TraceSession`].
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A node index that was never handed out by this tree.
    #[error("invalid node index {0} in dump tree")]
    InvalidIndex(usize),

    /// A close call named a node kind that does not match the node
    /// found at that index.
    #[error("cannot close node {index}: expected {expected}, found {found}")]
    KindMismatch {
        index: usize,
        expected: NodeKind,
        found: NodeKind,
    },
}
