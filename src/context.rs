//! `AgentContext`: a short-lived, non-owning handle passed into prompt
//! handlers for the duration of a single `session/prompt` call.

use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::acp::ClientCapabilities;
use crate::connection::agent::AgentConnection;
use crate::envelope::RequestId;
use crate::error::RoleError;
use crate::runtime::RequestHandle;

/// A borrowed facade over an [`AgentConnection`], scoped to one
/// `session/prompt` invocation. Does not own the runtime it delegates to —
/// its lifetime ends the moment the prompt handler returns, so it cannot
/// outlive the connection it borrows from.
///
/// Every request this context issues on the agent's behalf (file reads,
/// terminal control, permission prompts) is tracked by its allocated id
/// while in flight. If the context is dropped before those requests
/// complete — the prompt handler returned early, or panicked and unwound —
/// each of them is gracefully cancelled rather than left to leak.
pub struct AgentContext<'a> {
    connection: &'a AgentConnection,
    session_id: String,
    client_capabilities: ClientCapabilities,
    outstanding: Mutex<Vec<RequestId>>,
}

impl<'a> AgentContext<'a> {
    /// Build a context for one prompt call.
    pub fn new(
        connection: &'a AgentConnection,
        session_id: impl Into<String>,
        client_capabilities: ClientCapabilities,
    ) -> Self {
        Self {
            connection,
            session_id: session_id.into(),
            client_capabilities,
            outstanding: Mutex::new(Vec::new()),
        }
    }

    /// The session this prompt call belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The client's negotiated capabilities.
    pub fn client_capabilities(&self) -> &ClientCapabilities {
        &self.client_capabilities
    }

    /// Stream a `session/update` notification for this session.
    pub async fn send_update(&self, update: impl Serialize) -> Result<(), RoleError> {
        self.connection.send_update(update).await
    }

    /// Stream an agent message chunk as a `session/update` notification —
    /// the common case of [`AgentContext::send_update`] for plain text replies.
    pub async fn send_text_message(&self, text: impl Into<String>) -> Result<(), RoleError> {
        let update = serde_json::json!({
            "sessionUpdate": "agent_message_chunk",
            "content": { "type": "text", "text": text.into() },
        });
        self.connection.send_update(update).await
    }

    /// Send an arbitrary one-way notification to the client.
    pub async fn notify(&self, method: &str, params: impl Serialize) -> Result<(), RoleError> {
        self.connection.notify(method, params).await
    }

    /// Read a text file through the client.
    pub async fn read_text_file(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.read_text_file_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Write a text file through the client.
    pub async fn write_text_file(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.write_text_file_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Create a terminal through the client.
    pub async fn create_terminal(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.create_terminal_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Fetch a terminal's accumulated output through the client.
    pub async fn terminal_output(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.terminal_output_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Wait for a terminal's command to exit through the client.
    pub async fn terminal_wait_for_exit(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.terminal_wait_for_exit_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Release a terminal's resources through the client.
    pub async fn terminal_release(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.terminal_release_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Kill a terminal's running command through the client.
    pub async fn terminal_kill(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.terminal_kill_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    /// Ask the client to grant or deny a permission.
    pub async fn request_permission(&self, params: impl Serialize) -> Result<Value, RoleError> {
        let handle = self.connection.request_permission_cancellable(params).await?;
        self.await_cancellable(handle).await
    }

    async fn await_cancellable(&self, handle: RequestHandle) -> Result<Value, RoleError> {
        let id = handle.id().clone();
        self.track(id.clone());
        let result = handle.wait().await;
        self.untrack(&id);
        Ok(result?)
    }

    fn track(&self, id: RequestId) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.push(id);
        }
    }

    fn untrack(&self, id: &RequestId) {
        if let Ok(mut outstanding) = self.outstanding.lock() {
            outstanding.retain(|tracked| tracked != id);
        }
    }
}

impl Drop for AgentContext<'_> {
    fn drop(&mut self) {
        if let Ok(outstanding) = self.outstanding.lock() {
            for id in outstanding.iter() {
                self.connection.begin_cancel(id);
            }
        }
    }
}
