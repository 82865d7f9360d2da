//! Role connections: the symmetric agent and client sides of an ACP session,
//! both built on top of a shared [`crate::runtime::ProtocolRuntime`].
//!
//! Each role is guarded by a connection state that rejects requests until
//! `initialize` completes and gates capability-bound methods against what the
//! peer advertised.

pub mod agent;
pub mod client;

use tokio::sync::RwLock;

/// The lifecycle of a role connection, independent of the underlying transport's own state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, transport not yet started.
    Disconnected,
    /// Transport starting, `initialize` handshake not yet complete.
    Connecting,
    /// `initialize` completed; request methods are callable.
    Connected,
    /// `close` in progress.
    Disconnecting,
}

/// A guard around a [`ConnectionState`] shared between the connection and any
/// inbound handlers that need to observe it.
pub(crate) struct ConnectionStateCell(RwLock<ConnectionState>);

impl ConnectionStateCell {
    pub(crate) fn new() -> Self {
        Self(RwLock::new(ConnectionState::Disconnected))
    }

    pub(crate) async fn get(&self) -> ConnectionState {
        *self.0.read().await
    }

    pub(crate) async fn set(&self, state: ConnectionState) {
        *self.0.write().await = state;
    }

    pub(crate) async fn require_connected(&self) -> Result<(), crate::error::RoleError> {
        match self.get().await {
            ConnectionState::Connected => Ok(()),
            _ => Err(crate::error::RoleError::NotInitialized),
        }
    }
}
