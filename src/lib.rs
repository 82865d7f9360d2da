//! acp-sdk - Agent Client Protocol runtime and connection library
//!
//! This crate provides a bidirectional JSON-RPC 2.0 protocol runtime and a
//! pair of symmetric role connections (agent and client) implementing the
//! Agent Client Protocol: a wire contract between an editor/host process and
//! an autonomous coding agent process.
//!
//! # Architecture
//!
//! The crate is organized in layers, innermost first:
//!
//! - **Envelope layer** (`envelope`): JSON-RPC 2.0 request/response/notification
//!   types and their shape-based codec.
//! - **Transport layer** (`transport`): a pull-based, stream-exposing transport
//!   contract plus a concrete newline-delimited stdio implementation.
//! - **Runtime layer** (`runtime`): request/response correlation, notification
//!   fan-out, inbound request dispatch, and graceful cancellation, shared by
//!   both connection roles.
//! - **Connection layer** (`connection`): `AgentConnection` and
//!   `ClientConnection`, the two symmetric role-specific facades over a
//!   runtime.
//! - **Context layer** (`context`): `AgentContext`, a borrowed, per-prompt-call
//!   handle passed into prompt handlers.
//! - **Domain layer** (`acp`): ACP method names, session update variants,
//!   capability structs, and the `_meta` passthrough newtype.
//! - **Pagination** (`pagination`): a lazy, cursor-driven async sequence for
//!   paginated list operations.
//!
//! # Quick Start
//!
//! ```rust
//! use acp_sdk::envelope::{Envelope, RequestId};
//! use serde_json::json;
//!
//! let request = Envelope::request(
//!     "session/new",
//!     Some(json!({"cwd": "/workspace"})),
//!     RequestId::new_number(1),
//! );
//! let line = request.to_line().unwrap();
//! let decoded = Envelope::decode(line.trim_end()).unwrap();
//! assert_eq!(decoded, request);
//! ```
//!
//! # Building a connection
//!
//! Both connection roles are built over any [`transport::Transport`]
//! implementation — this crate ships [`transport::stdio::StdioTransport`] for
//! the common case of an agent launched as a subprocess communicating over
//! its own stdin/stdout.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use acp_sdk::acp::ClientCapabilities;
//! use acp_sdk::config::ConnectionConfig;
//! use acp_sdk::connection::client::ClientConnection;
//! use acp_sdk::transport::stdio::StdioTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport: Arc<dyn acp_sdk::transport::Transport> = Arc::new(StdioTransport::new());
//! let connection = ClientConnection::new(transport, ConnectionConfig::default(), None, None, None).await?;
//! let agent_capabilities = connection.initialize("1", &ClientCapabilities::default()).await?;
//! println!("{agent_capabilities:?}");
//! # Ok(())
//! # }
//! ```

pub mod acp;
pub mod config;
pub mod connection;
pub mod context;
pub mod envelope;
pub mod error;
pub mod pagination;
pub mod runtime;
pub mod transport;

pub use connection::{agent::AgentConnection, client::ClientConnection, ConnectionState};
pub use context::AgentContext;
pub use envelope::{Envelope, ErrorBody, RequestId};
pub use error::{ConnectionError, ProtocolError, RoleError, TransportError};
pub use pagination::{Page, PaginatedAsyncSequence};
pub use runtime::{NotificationHandler, ProtocolRuntime, RequestHandle, RequestHandler};
