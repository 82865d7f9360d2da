//! The transport contract: a byte-framing boundary beneath the protocol runtime.
//!
//! A [`Transport`] is a finite state machine — `Created → Starting → Started →
//! Closing → Closed` — exposing two pull-based streams rather than callbacks:
//! a `watch` stream of [`TransportState`] transitions and an `mpsc` stream of
//! inbound text frames. Implementations are expected to run a dedicated read
//! task that owns the underlying I/O handle and feeds the inbound channel,
//! keeping `send` on a separate, independently lockable write path.

pub mod stdio;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::TransportError;

/// The lifecycle state of a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Constructed but not yet started.
    Created,
    /// `start()` has been called; the read task is coming up.
    Starting,
    /// The read task is running and `send` may be called.
    Started,
    /// `close()` has been called; in-flight sends are draining.
    Closing,
    /// The transport is fully shut down. No further operations are valid.
    Closed,
}

/// A receiver side for a transport's inbound text frames.
pub type InboundStream = mpsc::Receiver<String>;

/// A receiver side for a transport's state transitions.
pub type StateStream = watch::Receiver<TransportState>;

/// The capability set every concrete transport must provide.
///
/// Implementations are driven entirely through this trait by
/// [`crate::runtime::ProtocolRuntime`]; nothing above this layer knows whether
/// frames travel over stdio, a socket, or an in-process duplex pipe.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Move from `Created` to `Started`, spawning the dedicated read task.
    ///
    /// Calling `start` more than once, or after `close`, returns
    /// [`TransportError::NotStarted`] or [`TransportError::Closed`]
    /// respectively, depending on which boundary was crossed.
    async fn start(&self) -> Result<(), TransportError>;

    /// Write one text frame to the peer. The frame must not already include
    /// the transport's line terminator; concrete transports append their own
    /// framing.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Move to `Closing` then `Closed`, releasing the underlying I/O handle.
    /// Idempotent: closing an already-closed transport is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Subscribe to state transitions. Every clone observes every transition
    /// from the point it was obtained onward.
    fn state_stream(&self) -> StateStream;

    /// Take the inbound frame stream. Transports expose this once; a second
    /// call returns `None` since `mpsc::Receiver` has a single consumer.
    fn inbound_stream(&self) -> Option<InboundStream>;
}
