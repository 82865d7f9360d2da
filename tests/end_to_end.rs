//! Cross-module scenario tests: a full `initialize` handshake, a prompt
//! turn, and graceful cancellation, driven over an in-process transport pair
//! rather than real stdio.

use std::sync::Arc;
use std::time::Duration;

use acp_sdk::acp::{method, AgentCapabilities, AgentInfo, ClientCapabilities};
use acp_sdk::config::ConnectionConfig;
use acp_sdk::connection::agent::{AgentConnection, InitializeHandler};
use acp_sdk::connection::client::ClientConnection;
use acp_sdk::envelope::ErrorBody;
use acp_sdk::error::{ConnectionError, ProtocolError, TransportError};
use acp_sdk::runtime::{NotificationHandler, RequestHandler};
use acp_sdk::transport::{InboundStream, StateStream, Transport, TransportState};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};

/// A transport whose sends feed directly into a peer's inbound channel,
/// simulating two processes connected by a pipe without touching real stdio.
struct PairedTransport {
    state_tx: watch::Sender<TransportState>,
    state_rx: StateStream,
    peer_inbound: Mutex<Option<mpsc::Sender<String>>>,
    inbound_rx: Mutex<Option<InboundStream>>,
    inbound_tx: mpsc::Sender<String>,
}

impl PairedTransport {
    fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a_state_tx, a_state_rx) = watch::channel(TransportState::Created);
        let (b_state_tx, b_state_rx) = watch::channel(TransportState::Created);
        let (a_inbound_tx, a_inbound_rx) = mpsc::channel(64);
        let (b_inbound_tx, b_inbound_rx) = mpsc::channel(64);

        let a = Arc::new(Self {
            state_tx: a_state_tx,
            state_rx: a_state_rx,
            peer_inbound: Mutex::new(Some(b_inbound_tx.clone())),
            inbound_rx: Mutex::new(Some(a_inbound_rx)),
            inbound_tx: a_inbound_tx,
        });
        let b = Arc::new(Self {
            state_tx: b_state_tx,
            state_rx: b_state_rx,
            peer_inbound: Mutex::new(Some(a.inbound_tx.clone())),
            inbound_rx: Mutex::new(Some(b_inbound_rx)),
            inbound_tx: b_inbound_tx,
        });
        (a, b)
    }
}

#[async_trait]
impl Transport for PairedTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let _ = self.state_tx.send(TransportState::Started);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        if let Some(tx) = self.peer_inbound.lock().await.as_ref() {
            let _ = tx.send(frame.to_string()).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let _ = self.state_tx.send(TransportState::Closed);
        Ok(())
    }

    fn state_stream(&self) -> StateStream {
        self.state_rx.clone()
    }

    fn inbound_stream(&self) -> Option<InboundStream> {
        self.inbound_rx.try_lock().ok()?.take()
    }
}

struct AllowEverything;

#[async_trait]
impl InitializeHandler for AllowEverything {
    async fn initialize(
        &self,
        _protocol_version: &str,
        _client_capabilities: ClientCapabilities,
    ) -> Result<AgentCapabilities, ErrorBody> {
        Ok(AgentCapabilities {
            load_session: true,
            fork_session: false,
            resume_session: false,
            list_sessions: false,
            set_session_model: false,
            set_session_config_option: false,
            meta: Default::default(),
        })
    }
}

struct EchoPrompt;

#[async_trait]
impl RequestHandler for EchoPrompt {
    async fn handle(&self, requested_method: &str, params: Option<Value>) -> Result<Value, ErrorBody> {
        if requested_method == method::SESSION_PROMPT {
            return Ok(serde_json::json!({"stopReason": "end_turn", "echo": params}));
        }
        Ok(serde_json::json!({"sessionId": "session-1"}))
    }
}

/// A session handler whose `session/prompt` response never arrives, used to
/// exercise a cancellation grace window that actually expires.
struct HangingPrompt;

#[async_trait]
impl RequestHandler for HangingPrompt {
    async fn handle(&self, requested_method: &str, _params: Option<Value>) -> Result<Value, ErrorBody> {
        if requested_method == method::SESSION_PROMPT {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(serde_json::json!({"stopReason": "end_turn"}));
        }
        Ok(serde_json::json!({"sessionId": "session-1"}))
    }
}

struct NoopCancel;

#[async_trait]
impl NotificationHandler for NoopCancel {
    async fn handle(&self, _method: &str, _params: Option<Value>) {}
}

struct CancelRecorder(Arc<Mutex<Vec<Value>>>);

#[async_trait]
impl NotificationHandler for CancelRecorder {
    async fn handle(&self, _method: &str, params: Option<Value>) {
        self.0.lock().await.push(params.unwrap_or(Value::Null));
    }
}

fn agent_info() -> AgentInfo {
    AgentInfo {
        name: "echo-agent".to_string(),
        version: "1.0.0".to_string(),
    }
}

#[tokio::test]
async fn initialize_handshake_reports_agent_capabilities_and_identity() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let agent = AgentConnection::new(
        agent_transport,
        ConnectionConfig::default(),
        agent_info(),
        "1",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(EchoPrompt),
        Arc::new(NoopCancel),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, ConnectionConfig::default(), None, None, None)
        .await
        .unwrap();

    let outcome = client
        .initialize("1", &ClientCapabilities::default())
        .await
        .unwrap();

    assert!(outcome.agent_capabilities.load_session);
    assert!(!outcome.agent_capabilities.fork_session);
    assert_eq!(outcome.protocol_version, "1");
    let info = outcome.agent_info.unwrap();
    assert_eq!(info.name, "echo-agent");
    assert_eq!(info.version, "1.0.0");
    let _ = agent.state().await;
}

#[tokio::test]
async fn initialize_negotiates_the_lesser_protocol_version() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let _agent = AgentConnection::new(
        agent_transport,
        ConnectionConfig::default(),
        agent_info(),
        "3",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(EchoPrompt),
        Arc::new(NoopCancel),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, ConnectionConfig::default(), None, None, None)
        .await
        .unwrap();

    let outcome = client.initialize("1", &ClientCapabilities::default()).await.unwrap();
    assert_eq!(outcome.protocol_version, "1");
}

#[tokio::test]
async fn prompt_turn_round_trips_through_both_roles() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let _agent = AgentConnection::new(
        agent_transport,
        ConnectionConfig::default(),
        agent_info(),
        "1",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(EchoPrompt),
        Arc::new(NoopCancel),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, ConnectionConfig::default(), None, None, None)
        .await
        .unwrap();

    client.initialize("1", &ClientCapabilities::default()).await.unwrap();

    let result = client
        .prompt(serde_json::json!({"sessionId": "session-1", "prompt": "hello"}))
        .await
        .unwrap();

    assert_eq!(result.get("stopReason").and_then(Value::as_str), Some("end_turn"));
}

#[tokio::test]
async fn unsupported_capability_is_rejected_before_any_request_is_sent() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let _agent = AgentConnection::new(
        agent_transport,
        ConnectionConfig::default(),
        agent_info(),
        "1",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(EchoPrompt),
        Arc::new(NoopCancel),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, ConnectionConfig::default(), None, None, None)
        .await
        .unwrap();

    client.initialize("1", &ClientCapabilities::default()).await.unwrap();

    let result = client.fork_session(serde_json::json!({})).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn graceful_cancellation_completes_normally_when_peer_responds_in_time() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let agent = AgentConnection::new(
        agent_transport,
        ConnectionConfig::default(),
        agent_info(),
        "1",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(EchoPrompt),
        Arc::new(NoopCancel),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, ConnectionConfig::default(), None, None, None)
        .await
        .unwrap();

    client.initialize("1", &ClientCapabilities::default()).await.unwrap();

    let handle = client
        .prompt_cancellable(serde_json::json!({"sessionId": "session-1", "prompt": "hello"}))
        .await
        .unwrap();
    let request_id = handle.id().clone();

    client.cancel("session-1", request_id).await.unwrap();

    let result = handle.wait().await.unwrap();
    assert_eq!(result.get("stopReason").and_then(Value::as_str), Some("end_turn"));
    let _ = agent.state().await;
}

#[tokio::test]
async fn graceful_cancellation_forces_cancelled_after_grace_window_expires() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let mut agent_config = ConnectionConfig::default();
    agent_config.runtime.graceful_cancellation_timeout = Duration::from_millis(50);
    let mut client_config = ConnectionConfig::default();
    client_config.runtime.graceful_cancellation_timeout = Duration::from_millis(50);

    let _agent = AgentConnection::new(
        agent_transport,
        agent_config,
        agent_info(),
        "1",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(HangingPrompt),
        Arc::new(NoopCancel),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, client_config, None, None, None)
        .await
        .unwrap();

    client.initialize("1", &ClientCapabilities::default()).await.unwrap();

    let handle = client
        .prompt_cancellable(serde_json::json!({"sessionId": "session-1", "prompt": "hello"}))
        .await
        .unwrap();
    let request_id = handle.id().clone();

    client.cancel("session-1", request_id).await.unwrap();

    let result = handle.wait().await;
    assert!(matches!(
        result,
        Err(ConnectionError::Protocol(ProtocolError::Cancelled { .. }))
    ));
}

#[tokio::test]
async fn inbound_session_cancel_reaches_registered_handler() {
    let (client_transport, agent_transport) = PairedTransport::pair();

    let received = Arc::new(Mutex::new(Vec::new()));
    let agent = AgentConnection::new(
        agent_transport,
        ConnectionConfig::default(),
        agent_info(),
        "1",
        Vec::new(),
        Arc::new(AllowEverything),
        Arc::new(EchoPrompt),
        Arc::new(CancelRecorder(Arc::clone(&received))),
    )
    .await
    .unwrap();

    let client = ClientConnection::new(client_transport, ConnectionConfig::default(), None, None, None)
        .await
        .unwrap();

    client.initialize("1", &ClientCapabilities::default()).await.unwrap();

    client
        .cancel("session-1", acp_sdk::envelope::RequestId::new_number(42))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let received = received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].get("sessionId").and_then(Value::as_str), Some("session-1"));
    let _ = agent.state().await;
}
