//! The pending-request table entry and its two-phase cancellation state.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ConnectionError;

/// The outcome delivered to whoever is awaiting a pending request.
pub type PendingResult = Result<Value, ConnectionError>;

/// The lifecycle of a single pending outbound request.
///
/// Beyond a plain timeout sweep (marking an entry `Timeout` once its deadline
/// passes), this adds a second phase: a cancelled request does not complete
/// immediately. It waits out a grace deadline so the peer has a chance to
/// respond to the cancellation notification before the caller is told the
/// request was cancelled outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// Awaiting a response or timeout.
    Active,
    /// A cancellation notification was sent; waiting until `deadline` for the
    /// peer to still respond before forcing a `Cancelled` error.
    Cancelling {
        /// The instant after which the request is forced to complete as cancelled.
        deadline: Instant,
    },
}

/// An entry in the [`crate::runtime::ProtocolRuntime`]'s pending-request table.
pub struct PendingRequest {
    sender: oneshot::Sender<PendingResult>,
    status: PendingStatus,
    created_at: Instant,
    timeout: Option<Duration>,
}

impl PendingRequest {
    /// Create a new, active pending entry.
    pub fn new(sender: oneshot::Sender<PendingResult>, timeout: Option<Duration>) -> Self {
        Self {
            sender,
            status: PendingStatus::Active,
            created_at: Instant::now(),
            timeout,
        }
    }

    /// The entry's current status.
    pub fn status(&self) -> PendingStatus {
        self.status
    }

    /// Move this entry into `Cancelling`, recording the grace deadline.
    pub fn begin_cancelling(&mut self, grace_period: Duration) {
        self.status = PendingStatus::Cancelling {
            deadline: Instant::now() + grace_period,
        };
    }

    /// Whether the entry's per-request or default timeout has elapsed.
    pub fn is_expired(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.created_at.elapsed() >= timeout,
            None => false,
        }
    }

    /// Whether a `Cancelling` entry's grace deadline has elapsed. Always
    /// `false` for an `Active` entry.
    pub fn cancellation_deadline_elapsed(&self) -> bool {
        match self.status {
            PendingStatus::Cancelling { deadline } => Instant::now() >= deadline,
            PendingStatus::Active => false,
        }
    }

    /// Consume this entry, delivering its final result to the awaiting receiver.
    pub fn complete(self, result: PendingResult) {
        let _ = self.sender.send(result);
    }
}
