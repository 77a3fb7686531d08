//! Runtime configuration for the trace middleware.

use serde::{Deserialize, Serialize};

/// Default activation header.
pub const DEFAULT_TRACE_HEADER: &str = "x-tracewire";

/// Default breakpoint query parameter.
pub const DEFAULT_BREAKPOINT_PARAM: &str = "dump";

/// Configuration for the trace-capture middleware.
///
/// Tracing activates for a request iff `header` is present on it. The
/// breakpoint hash is read from the `param` query parameter; a leading
/// `-` means "skip the first match, halt at the second".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Request header whose presence enables tracing for that request.
    pub header: String,
    /// Query parameter carrying the requested breakpoint hash.
    pub param: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_TRACE_HEADER.to_string(),
            param: DEFAULT_BREAKPOINT_PARAM.to_string(),
        }
    }
}
