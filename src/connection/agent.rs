//! The agent side of an ACP connection: the process doing the work, which
//! answers the client's session-lifecycle requests and calls back into the
//! client for filesystem access, terminal control, and permission prompts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::acp::{method, negotiate_protocol_version, AgentCapabilities, AgentInfo, AuthMethod, ClientCapabilities};
use crate::config::ConnectionConfig;
use crate::connection::{ConnectionState, ConnectionStateCell};
use crate::envelope::{ErrorBody, RequestId};
use crate::error::{error_code, ConnectionError, ProtocolError, RoleError};
use crate::runtime::{NotificationHandler, ProtocolRuntime, RequestHandle, RequestHandler};
use crate::transport::Transport;

fn to_value(params: impl Serialize) -> Result<Value, RoleError> {
    serde_json::to_value(params)
        .map_err(|error| RoleError::Connection(ConnectionError::Protocol(ProtocolError::from(error))))
}

/// Decides the agent's advertised capabilities in response to an inbound
/// `initialize` request.
#[async_trait]
pub trait InitializeHandler: Send + Sync {
    /// Given the client's protocol version and capabilities, return this
    /// agent's capabilities, or an error to reject the handshake.
    async fn initialize(
        &self,
        protocol_version: &str,
        client_capabilities: ClientCapabilities,
    ) -> Result<AgentCapabilities, ErrorBody>;
}

struct InitializeRequestHandler {
    state: Arc<ConnectionStateCell>,
    client_capabilities: Arc<RwLock<Option<ClientCapabilities>>>,
    handler: Arc<dyn InitializeHandler>,
    agent_info: AgentInfo,
    auth_methods: Vec<AuthMethod>,
    supported_protocol_version: String,
}

#[async_trait]
impl RequestHandler for InitializeRequestHandler {
    async fn handle(&self, _method: &str, params: Option<Value>) -> Result<Value, ErrorBody> {
        let params = params.unwrap_or(Value::Null);
        let client_offered_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let client_capabilities: ClientCapabilities = params
            .get("clientCapabilities")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|error: serde_json::Error| {
                ErrorBody::new(error_code::INVALID_PARAMS, error.to_string())
            })?
            .unwrap_or_default();

        let negotiated_version = negotiate_protocol_version(&client_offered_version, &self.supported_protocol_version);

        self.state.set(ConnectionState::Connecting).await;
        let agent_capabilities = self
            .handler
            .initialize(&negotiated_version, client_capabilities.clone())
            .await?;
        *self.client_capabilities.write().await = Some(client_capabilities);
        self.state.set(ConnectionState::Connected).await;

        Ok(serde_json::json!({
            "protocolVersion": negotiated_version,
            "agentCapabilities": agent_capabilities,
            "agentInfo": self.agent_info,
            "authMethods": self.auth_methods,
        }))
    }
}

struct CancelDispatchHandler {
    handler: Arc<dyn NotificationHandler>,
}

#[async_trait]
impl NotificationHandler for CancelDispatchHandler {
    async fn handle(&self, method: &str, params: Option<Value>) {
        self.handler.handle(method, params).await;
    }
}

/// The agent side of an ACP connection.
///
/// Mirrors the client-side capability gating for the opposite direction:
/// outbound calls to the client (`fs/*`, `terminal/*`,
/// `client/request_permission`) are rejected with
/// [`RoleError::CapabilityNotSupported`] unless the client advertised the
/// matching capability during `initialize`.
pub struct AgentConnection {
    runtime: Arc<ProtocolRuntime>,
    state: Arc<ConnectionStateCell>,
    client_capabilities: Arc<RwLock<Option<ClientCapabilities>>>,
}

impl AgentConnection {
    /// Build a connection over `transport`. `initialize_handler` answers the
    /// handshake; `session_handler` answers every other session-lifecycle
    /// request (`session/new`, `session/prompt`, and the rest).
    /// `cancel_handler` observes inbound `session/cancel` notifications — the
    /// runtime has no handler registered for that method otherwise, and an
    /// inbound cancellation would be silently dropped.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        agent_info: AgentInfo,
        supported_protocol_version: impl Into<String>,
        auth_methods: Vec<AuthMethod>,
        initialize_handler: Arc<dyn InitializeHandler>,
        session_handler: Arc<dyn RequestHandler>,
        cancel_handler: Arc<dyn NotificationHandler>,
    ) -> Result<Arc<Self>, RoleError> {
        let runtime = ProtocolRuntime::new(transport, config.runtime);
        let state = Arc::new(ConnectionStateCell::new());
        let client_capabilities = Arc::new(RwLock::new(None));

        runtime
            .register_request_handler(
                method::INITIALIZE,
                Arc::new(InitializeRequestHandler {
                    state: Arc::clone(&state),
                    client_capabilities: Arc::clone(&client_capabilities),
                    handler: initialize_handler,
                    agent_info,
                    auth_methods,
                    supported_protocol_version: supported_protocol_version.into(),
                }),
            )
            .await;

        for name in [
            method::SESSION_NEW,
            method::SESSION_LOAD,
            method::SESSION_LIST,
            method::SESSION_FORK,
            method::SESSION_RESUME,
            method::SESSION_PROMPT,
            method::SESSION_SET_MODE,
            method::SESSION_SET_MODEL,
            method::SESSION_SET_CONFIG_OPTION,
        ] {
            runtime
                .register_request_handler(name, Arc::clone(&session_handler))
                .await;
        }

        runtime
            .register_notification_handler(method::SESSION_CANCEL, Arc::new(CancelDispatchHandler { handler: cancel_handler }))
            .await;

        runtime.start().await?;

        Ok(Arc::new(Self {
            runtime,
            state,
            client_capabilities,
        }))
    }

    /// Read a text file through the client, returning a handle rather than
    /// waiting for the response. Requires the client to have advertised
    /// `fileSystem` support.
    pub async fn read_text_file_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::FS_READ_TEXT_FILE, |caps| caps.file_system)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::FS_READ_TEXT_FILE, Some(value))
            .await?)
    }

    /// Read a text file through the client. Requires the client to have
    /// advertised `fileSystem` support.
    pub async fn read_text_file(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.read_text_file_cancellable(params).await?.wait().await?)
    }

    /// Write a text file through the client, returning a handle rather than
    /// waiting for the response. Requires the client to have advertised
    /// `fileSystem` support.
    pub async fn write_text_file_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::FS_WRITE_TEXT_FILE, |caps| caps.file_system)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::FS_WRITE_TEXT_FILE, Some(value))
            .await?)
    }

    /// Write a text file through the client. Requires the client to have
    /// advertised `fileSystem` support.
    pub async fn write_text_file(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.write_text_file_cancellable(params).await?.wait().await?)
    }

    /// Create a terminal through the client, returning a handle rather than
    /// waiting for the response. Requires the client to have advertised
    /// `terminal` support.
    pub async fn create_terminal_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::TERMINAL_CREATE, |caps| caps.terminal)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::TERMINAL_CREATE, Some(value))
            .await?)
    }

    /// Create a terminal through the client. Requires the client to have
    /// advertised `terminal` support.
    pub async fn create_terminal(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.create_terminal_cancellable(params).await?.wait().await?)
    }

    /// Fetch a terminal's accumulated output, returning a handle rather than
    /// waiting for the response. Requires the client to have advertised
    /// `terminal` support.
    pub async fn terminal_output_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::TERMINAL_OUTPUT, |caps| caps.terminal)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::TERMINAL_OUTPUT, Some(value))
            .await?)
    }

    /// Fetch a terminal's accumulated output. Requires the client to have
    /// advertised `terminal` support.
    pub async fn terminal_output(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.terminal_output_cancellable(params).await?.wait().await?)
    }

    /// Wait for a terminal's command to exit, returning a handle rather than
    /// waiting for the response. Requires the client to have advertised
    /// `terminal` support.
    pub async fn terminal_wait_for_exit_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::TERMINAL_WAIT_FOR_EXIT, |caps| caps.terminal)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::TERMINAL_WAIT_FOR_EXIT, Some(value))
            .await?)
    }

    /// Wait for a terminal's command to exit. Requires the client to have
    /// advertised `terminal` support.
    pub async fn terminal_wait_for_exit(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.terminal_wait_for_exit_cancellable(params).await?.wait().await?)
    }

    /// Release a terminal's resources, returning a handle rather than waiting
    /// for the response. Requires the client to have advertised `terminal`
    /// support.
    pub async fn terminal_release_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::TERMINAL_RELEASE, |caps| caps.terminal)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::TERMINAL_RELEASE, Some(value))
            .await?)
    }

    /// Release a terminal's resources. Requires the client to have advertised
    /// `terminal` support.
    pub async fn terminal_release(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.terminal_release_cancellable(params).await?.wait().await?)
    }

    /// Kill a terminal's running command, returning a handle rather than
    /// waiting for the response. Requires the client to have advertised
    /// `terminal` support.
    pub async fn terminal_kill_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.require_capability(method::TERMINAL_KILL, |caps| caps.terminal)
            .await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::TERMINAL_KILL, Some(value))
            .await?)
    }

    /// Kill a terminal's running command. Requires the client to have
    /// advertised `terminal` support.
    pub async fn terminal_kill(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.terminal_kill_cancellable(params).await?.wait().await?)
    }

    /// Ask the client to grant or deny a permission, returning a handle
    /// rather than waiting for the response.
    pub async fn request_permission_cancellable(&self, params: impl Serialize) -> Result<RequestHandle, RoleError> {
        self.state.require_connected().await?;
        let value = to_value(params)?;
        Ok(self
            .runtime
            .send_request_cancellable(method::CLIENT_REQUEST_PERMISSION, Some(value))
            .await?)
    }

    /// Ask the client to grant or deny a permission.
    pub async fn request_permission(&self, params: impl Serialize) -> Result<Value, RoleError> {
        Ok(self.request_permission_cancellable(params).await?.wait().await?)
    }

    /// Stream a `session/update` notification.
    pub async fn send_update(&self, update: impl Serialize) -> Result<(), RoleError> {
        let value = to_value(update)?;
        Ok(self
            .runtime
            .send_notification(method::SESSION_UPDATE, Some(value))
            .await?)
    }

    /// Send an arbitrary one-way notification to the client.
    pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<(), RoleError> {
        let value = to_value(params)?;
        Ok(self.runtime.send_notification(method, Some(value)).await?)
    }

    /// Begin graceful cancellation of an in-flight request this connection sent.
    pub fn begin_cancel(&self, id: &RequestId) {
        self.runtime.begin_cancel(id);
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
        predicate: impl Fn(&ClientCapabilities) -> bool,
    ) -> Result<(), RoleError> {
        self.state.require_connected().await?;
        let capabilities = self.client_capabilities.read().await;
        match capabilities.as_ref() {
            Some(caps) if predicate(caps) => Ok(()),
            _ => Err(RoleError::CapabilityNotSupported {
                method: method.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::stdio::StdioTransport;

    struct AlwaysAllow;

    #[async_trait]
    impl InitializeHandler for AlwaysAllow {
        async fn initialize(
            &self,
            _protocol_version: &str,
            _client_capabilities: ClientCapabilities,
        ) -> Result<AgentCapabilities, ErrorBody> {
            Ok(AgentCapabilities::default())
        }
    }

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, _method: &str, params: Option<Value>) -> Result<Value, ErrorBody> {
            Ok(params.unwrap_or(Value::Null))
        }
    }

    struct NoopCancel;

    #[async_trait]
    impl NotificationHandler for NoopCancel {
        async fn handle(&self, _method: &str, _params: Option<Value>) {}
    }

    fn agent_info() -> AgentInfo {
        AgentInfo {
            name: "test-agent".to_string(),
            version: "0.1.0".to_string(),
        }
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new());
        let connection = AgentConnection::new(
            transport,
            ConnectionConfig::default(),
            agent_info(),
            "1",
            Vec::new(),
            Arc::new(AlwaysAllow),
            Arc::new(Echo),
            Arc::new(NoopCancel),
        )
        .await
        .unwrap();
        assert_eq!(connection.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn capability_gated_call_rejected_before_initialize() {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new());
        let connection = AgentConnection::new(
            transport,
            ConnectionConfig::default(),
            agent_info(),
            "1",
            Vec::new(),
            Arc::new(AlwaysAllow),
            Arc::new(Echo),
            Arc::new(NoopCancel),
        )
        .await
        .unwrap();
        let result = connection.read_text_file(serde_json::json!({})).await;
        assert!(matches!(result, Err(RoleError::NotInitialized)));
    }
}
