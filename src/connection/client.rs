//! The client side of an ACP connection: the editor/host process, which
//! calls into the agent and answers the agent's filesystem, terminal, and
//! permission requests.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::acp::{self, method, AgentCapabilities, AgentInfo, AuthMethod, ClientCapabilities};
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, ConnectionStateCell};
use crate::envelope::RequestId;
use crate::error::{ConnectionError, ProtocolError, RoleError};
use crate::runtime::{NotificationHandler, ProtocolRuntime, RequestHandle, RequestHandler};
use crate::transport::Transport;

fn to_value(params: impl Serialize) -> Result<Value, RoleError> {
    serde_json::to_value(params)
        .map_err(|error| RoleError::Connection(ConnectionError::Protocol(ProtocolError::from(error))))
}

/// The result of a successful `initialize` handshake.
#[derive(Debug, Clone)]
pub struct InitializeOutcome {
    /// The protocol version both sides will use for the rest of the
    /// connection: the lesser of what was offered and what the agent supports.
    pub protocol_version: String,
    /// The agent's advertised capabilities.
    pub agent_capabilities: AgentCapabilities,
    /// The agent's identity, if it reported one.
    pub agent_info: Option<AgentInfo>,
    /// Authentication methods the agent supports, if `authenticate` is required.
    pub auth_methods: Vec<AuthMethod>,
}

/// The client side of an ACP connection.
///
/// Requests are rejected with [`RoleError::NotInitialized`] until
/// `initialize` completes, and capability-gated methods are rejected with
/// [`RoleError::CapabilityNotSupported`] if the agent never advertised
/// support for them, rather than being sent and silently ignored.
pub struct ClientConnection {
    runtime: Arc<ProtocolRuntime>,
    state: ConnectionStateCell,
    agent_capabilities: RwLock<Option<AgentCapabilities>>,
}

impl ClientConnection {
    /// Build a connection over `transport`, registering the caller's handlers
    /// for inbound requests the agent may send (filesystem access, terminal
    /// control, permission prompts) and for `session/update` notifications.
    pub async fn new(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        fs_and_terminal_handler: Option<Arc<dyn RequestHandler>>,
        permission_handler: Option<Arc<dyn RequestHandler>>,
        session_update_handler: Option<Arc<dyn NotificationHandler>>,
    ) -> Result<Arc<Self>, RoleError> {
        let runtime = ProtocolRuntime::new(transport, config.runtime);

        if let Some(handler) = fs_and_terminal_handler {
            for name in [
                method::FS_READ_TEXT_FILE,
                method::FS_WRITE_TEXT_FILE,
                method::TERMINAL_CREATE,
                method::TERMINAL_OUTPUT,
                method::TERMINAL_WAIT_FOR_EXIT,
                method::TERMINAL_RELEASE,
                method::TERMINAL_KILL,
            ] {
                runtime.register_request_handler(name, Arc::clone(&handler)).await;
            }
        }
        if let Some(handler) = permission_handler {
            runtime
                .register_request_handler(method::CLIENT_REQUEST_PERMISSION, handler)
                .await;
        }
        if let Some(handler) = session_update_handler {
            runtime
                .register_notification_handler(method::SESSION_UPDATE, handler)
                .await;
        }

        runtime.start().await?;

        Ok(Arc::new(Self {
            runtime,
            state: ConnectionStateCell::new(),
            agent_capabilities: RwLock::new(None),
        }))
    }

    /// Run the `initialize` handshake, recording the agent's advertised
    /// capabilities and the negotiated protocol version.
    pub async fn initialize(
        &self,
        protocol_version: &str,
        capabilities: &ClientCapabilities,
    ) -> Result<InitializeOutcome, RoleError> {
        self.state.set(ConnectionState::Connecting).await;

        let params = serde_json::json!({
            "protocolVersion": protocol_version,
            "clientCapabilities": capabilities,
        });
        let result = self
            .runtime
            .send_request(method::INITIALIZE, Some(params))
            .await?;
        let agent_capabilities: AgentCapabilities = serde_json::from_value(
            result.get("agentCapabilities").cloned().unwrap_or(Value::Null),
        )
        .unwrap_or_default();
        let agent_info: Option<AgentInfo> = result
            .get("agentInfo")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok());
        let auth_methods: Vec<AuthMethod> = result
            .get("authMethods")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .unwrap_or(None)
            .unwrap_or_default();
        let negotiated_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| protocol_version.to_string());

        *self.agent_capabilities.write().await = Some(agent_capabilities.clone());
        self.state.set(ConnectionState::Connected).await;
        Ok(InitializeOutcome {
            protocol_version: negotiated_version,
            agent_capabilities,
            agent_info,
            auth_methods,
        })
    }

    /// Create a new session.
    pub async fn new_session(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.state.require_connected().await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_NEW, Some(value)).await?)
    }

    /// Load a previously created session. Requires the agent to have
    /// advertised `loadSession` support.
    pub async fn load_session(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.require_capability(method::SESSION_LOAD, |caps| caps.load_session)
            .await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_LOAD, Some(value)).await?)
    }

    /// Fork an existing session. Requires the agent to have advertised
    /// `forkSession` support.
    pub async fn fork_session(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.require_capability(method::SESSION_FORK, |caps| caps.fork_session)
            .await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_FORK, Some(value)).await?)
    }

    /// List known sessions. Requires the agent to have advertised
    /// `listSessions` support.
    pub async fn list_sessions(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.require_capability(method::SESSION_LIST, |caps| caps.list_sessions)
            .await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_LIST, Some(value)).await?)
    }

    /// Resume a session from a checkpoint. Requires the agent to have
    /// advertised `resumeSession` support.
    pub async fn resume_session(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.require_capability(method::SESSION_RESUME, |caps| caps.resume_session)
            .await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_RESUME, Some(value)).await?)
    }

    /// Change a session's active mode. Not capability-gated.
    pub async fn set_session_mode(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.state.require_connected().await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_SET_MODE, Some(value)).await?)
    }

    /// Change a session's active model. Requires the agent to have
    /// advertised `setSessionModel` support.
    pub async fn set_session_model(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.require_capability(method::SESSION_SET_MODEL, |caps| caps.set_session_model)
            .await?;
        let value = to_value(params)?;
        Ok(self.runtime.send_request(method::SESSION_SET_MODEL, Some(value)).await?)
    }

    /// Change a session-scoped configuration option. Requires the agent to
    /// have advertised `setSessionConfigOption` support.
    pub async fn set_session_config_option(&self, params: impl Serialize) -> Result<Value, RoleError> {
        self.require_capability(method::SESSION_SET_CONFIG_OPTION, |caps| caps.set_session_config_option)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request(method::SESSION_SET_CONFIG_OPTION, Some(value))
            .await?)
    }

    /// Run a prompt turn, returning a handle rather than waiting for the
    /// response. The handle's id is what [`ClientConnection::cancel`] needs
    /// to gracefully cancel this specific turn.
    pub async fn prompt_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.state.require_connected().await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::SESSION_PROMPT, Some(value))
            .await?)
    }

    /// Run a prompt turn to completion.
    pub async fn prompt(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.prompt_cancellable(params).await?.wait().await?)
    }

    /// Gracefully cancel an in-flight prompt turn: send the `session/cancel`
    /// notification, then move the pending request into its grace window so
    /// it still has a chance to complete normally before being forced to
    /// [`crate::error::ProtocolError::Cancelled`].
    pub async fn cancel(&self, session_id: impl Into<String>, request_id: RequestId) -> Result<(), RoleError> {
        let body = acp::CancelNotification {
            session_id: session_id.into(),
            request_id: request_id.clone(),
        };
        let value = to_value(body)?;
        Ok(self
            .runtime
            .cancel_with_notification(&request_id, method::SESSION_CANCEL, Some(value))
            .await?)
    }

    /// The current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.state.get().await
    }

    /// Shut down the connection and underlying transport.
    pub async fn close(&self) -> Result<(), RoleError> {
        self.state.set(ConnectionState::Disconnecting).await;
        self.runtime.shutdown().await?;
        self.state.set(ConnectionState::Disconnected).await;
        Ok(())
    }

    async fn require_capability(
        &self,
        method: &str,
        predicate: impl Fn(&AgentCapabilities) -> bool,
    ) -> Result<(), RoleError> {
        self.state.require_connected().await?;
        let capabilities = self.agent_capabilities.read().await;
        match capabilities.as_ref() {
            Some(caps) if predicate(caps) => Ok(()),
            _ => Err(RoleError::CapabilityNotSupported {
                method: method.to_string(),
            }),
        }
    }
}
