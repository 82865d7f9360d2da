//! Ambient configuration for the protocol runtime and role connections.

use std::time::Duration;

/// Tuning knobs for a [`crate::runtime::ProtocolRuntime`].
///
/// Timeout and capacity fields with a conservative `Default`, extended with
/// the graceful-cancellation deadline this SDK's two-phase cancellation
/// protocol requires.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long a `Cancelling` request waits for the peer to acknowledge
    /// cancellation before the pending entry is forced to
    /// [`crate::error::ProtocolError::Cancelled`].
    pub graceful_cancellation_timeout: Duration,
    /// Default timeout applied to outbound requests that don't specify their
    /// own. `None` means requests wait indefinitely unless cancelled.
    pub default_request_timeout: Option<Duration>,
    /// Maximum number of concurrently pending outbound requests. `None` means
    /// unbounded.
    pub max_pending_requests: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            graceful_cancellation_timeout: Duration::from_secs(1),
            default_request_timeout: None,
            max_pending_requests: None,
        }
    }
}

/// Tuning knobs for a role connection, wrapping a [`RuntimeConfig`] with
/// capability bookkeeping shared by both [`crate::connection::AgentConnection`]
/// and [`crate::connection::ClientConnection`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Runtime configuration for the underlying [`crate::runtime::ProtocolRuntime`].
    pub runtime: RuntimeConfig,
    /// Whether unrecognized inbound notifications are logged at `warn` level
    /// (`true`) or silently ignored (`false`).
    pub log_unhandled_notifications: bool,
}
