//! Error taxonomy for the ACP SDK: transport, protocol, connection, and role layers.

use thiserror::Error;

use crate::envelope::RequestId;

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport is not in a state that permits the attempted operation.
    #[error("transport not started")]
    NotStarted,
    /// The transport was asked to operate after it had already closed.
    #[error("transport already closed")]
    Closed,
    /// The underlying I/O channel failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An outbound frame violated the transport's framing contract (for
    /// example, a newline-delimited transport asked to send an embedded
    /// newline).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// An outbound frame exceeded the transport's configured size limit.
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    MessageTooLarge {
        /// The size of the offending message, in bytes.
        size: usize,
        /// The transport's configured limit, in bytes.
        limit: usize,
    },
}

/// Errors raised while encoding or decoding JSON-RPC envelopes, and by the
/// runtime for conditions the JSON-RPC layer itself defines (an unmatched
/// response id, a peer-returned error, a request that never got a chance to
/// complete before the transport or its deadline closed it out).
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame did not match any of the four envelope shapes.
    #[error("malformed JSON-RPC frame")]
    Malformed,
    /// The frame was valid JSON but failed to deserialize into the matched shape.
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An inbound response or error response carried an id with no matching
    /// pending request — already completed, or never sent by this side.
    #[error("no pending request matches response id {id}")]
    InvalidResponseId {
        /// The unmatched id.
        id: RequestId,
    },
    /// The runtime was shut down (or the transport closed) while a request
    /// was still pending, or before a new one could be sent.
    #[error("transport closed")]
    TransportClosed,
    /// The peer returned a JSON-RPC error response for a specific request.
    #[error("peer returned error {code} for request {id}: {message}")]
    JsonRpcError {
        /// The id of the request the peer rejected.
        id: RequestId,
        /// The JSON-RPC error code.
        code: i64,
        /// The peer's error message.
        message: String,
        /// Optional structured error detail.
        data: Option<serde_json::Value>,
    },
    /// A request was sent but no response arrived within the configured timeout.
    #[error("request {id} timed out")]
    Timeout {
        /// The id of the timed-out request.
        id: RequestId,
    },
    /// A request was cancelled and did not complete within the graceful
    /// cancellation deadline.
    #[error("request {id} was cancelled")]
    Cancelled {
        /// The id of the cancelled request.
        id: RequestId,
    },
}

/// JSON-RPC 2.0 reserved error codes, plus the ACP-specific codes layered on top.
pub mod error_code {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The operation requires authentication that has not been completed.
    pub const AUTH_REQUIRED: i64 = -32000;
    /// The referenced resource does not exist.
    pub const RESOURCE_NOT_FOUND: i64 = -32001;
    /// The request was cancelled before it completed.
    pub const REQUEST_CANCELLED: i64 = -32800;
}

/// Errors raised by the [`crate::runtime::ProtocolRuntime`] while correlating
/// requests and responses.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport layer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The envelope codec or JSON-RPC correlation layer failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A request was sent but no response arrived before its id table entry
    /// was dropped (the channel closed without a send).
    #[error("request {id} was dropped without a response")]
    Dropped {
        /// The id of the abandoned request.
        id: RequestId,
    },
    /// The maximum number of concurrently pending requests was reached.
    #[error("pending request table is full (limit: {limit})")]
    TableFull {
        /// The configured limit that was reached.
        limit: usize,
    },
}

/// Errors raised by the role-specific connection layer
/// ([`crate::connection::AgentConnection`] / [`crate::connection::ClientConnection`]).
#[derive(Debug, Error)]
pub enum RoleError {
    /// A request method was invoked before `initialize` completed.
    #[error("connection is not initialized")]
    NotInitialized,
    /// A request method was invoked whose corresponding capability was not
    /// negotiated during `initialize`.
    #[error("method {method} requires a capability the peer did not advertise")]
    CapabilityNotSupported {
        /// The method that required the missing capability.
        method: String,
    },
    /// The connection is not in a state that permits the attempted operation.
    #[error("connection is not connected")]
    NotConnected,
    /// The correlation/runtime layer failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
