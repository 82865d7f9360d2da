//! The protocol runtime: request/response correlation, notification fan-out,
//! and inbound request dispatch shared by both connection roles.
//!
//! A DashMap-keyed pending table with an atomic id allocator and a background
//! sweep handle request/response correlation; method-keyed handler registries
//! with configurable unhandled-method behavior handle inbound dispatch. A
//! single runtime owns a [`Transport`] and drives both paths over it.

pub mod pending;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::RuntimeConfig;
use crate::envelope::{Envelope, ErrorBody, RequestId};
use crate::error::{error_code, ConnectionError, ProtocolError};
use crate::runtime::pending::{PendingRequest, PendingResult, PendingStatus};
use crate::transport::Transport;

/// A handler for one-way inbound notifications. Multiple handlers may be
/// registered for the same method; they run in registration order.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle one notification. Errors are logged, not propagated — a
    /// notification has no response channel to carry them back on.
    async fn handle(&self, method: &str, params: Option<Value>);
}

/// A handler for inbound requests that expect a correlated response.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request, producing either a result value or a structured
    /// JSON-RPC error to send back to the peer.
    async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value, ErrorBody>;
}

type NotificationRegistry = RwLock<HashMap<String, Vec<Arc<dyn NotificationHandler>>>>;
type RequestRegistry = RwLock<HashMap<String, Arc<dyn RequestHandler>>>;

/// The shared protocol engine underneath both [`crate::connection::AgentConnection`]
/// and [`crate::connection::ClientConnection`].
pub struct ProtocolRuntime {
    transport: Arc<dyn Transport>,
    config: RuntimeConfig,
    next_id: AtomicU64,
    pending: Arc<DashMap<RequestId, PendingRequest>>,
    notification_handlers: NotificationRegistry,
    request_handlers: RequestRegistry,
    error_tx: mpsc::UnboundedSender<ConnectionError>,
    error_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionError>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// A handle to an in-flight outbound request.
///
/// Carries the id the runtime allocated for it, which is what makes
/// [`ProtocolRuntime::begin_cancel`]/[`ProtocolRuntime::cancel_with_notification`]
/// reachable for a request that hasn't completed yet — `send_request` alone
/// only returns once the request is already done.
pub struct RequestHandle {
    id: RequestId,
    rx: oneshot::Receiver<PendingResult>,
}

impl RequestHandle {
    /// The id this request was allocated.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Await the request's correlated response, timeout, or cancellation.
    pub async fn wait(self) -> Result<Value, ConnectionError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Dropped { id: self.id }),
        }
    }
}

impl ProtocolRuntime {
    /// Build a runtime over the given transport. Call [`ProtocolRuntime::start`]
    /// before sending or receiving anything.
    pub fn new(transport: Arc<dyn Transport>, config: RuntimeConfig) -> Arc<Self> {
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            transport,
            config,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
            dispatch_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Start the transport and the background dispatch and sweep tasks.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.transport.start().await?;

        let mut inbound = self
            .transport
            .inbound_stream()
            .ok_or_else(|| ConnectionError::Protocol(ProtocolError::Malformed))?;

        let dispatch_runtime = Arc::clone(self);
        let dispatch_handle = tokio::spawn(async move {
            while let Some(line) = inbound.recv().await {
                dispatch_runtime.handle_inbound_line(&line).await;
            }
        });
        *self.dispatch_task.lock().await = Some(dispatch_handle);

        let sweep_runtime = Arc::clone(self);
        let sweep_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(200));
            loop {
                ticker.tick().await;
                sweep_runtime.sweep_pending();
            }
        });
        *self.sweep_task.lock().await = Some(sweep_handle);

        Ok(())
    }

    /// Stop accepting new requests, complete every still-pending entry with
    /// [`ProtocolError::TransportClosed`], then stop the background tasks and
    /// close the transport. Idempotent: a second call finds nothing pending
    /// and an already-closed transport, and still returns `Ok(())`.
    pub async fn shutdown(&self) -> Result<(), ConnectionError> {
        self.closed.store(true, Ordering::SeqCst);

        let ids: Vec<RequestId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                entry.complete(Err(ConnectionError::Protocol(ProtocolError::TransportClosed)));
            }
        }

        if let Some(handle) = self.dispatch_task.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }
        self.transport.close().await?;
        Ok(())
    }

    /// Send a request, returning a [`RequestHandle`] immediately rather than
    /// waiting for the response. The handle exposes the allocated id (needed
    /// to gracefully cancel the request) and can be awaited separately.
    pub async fn send_request_cancellable(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<RequestHandle, ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Protocol(ProtocolError::TransportClosed));
        }
        if let Some(limit) = self.config.max_pending_requests {
            if self.pending.len() >= limit {
                return Err(ConnectionError::TableFull { limit });
            }
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        let entry = PendingRequest::new(tx, self.config.default_request_timeout);
        self.pending.insert(id.clone(), entry);

        let envelope = Envelope::request(method, params, id.clone());
        let line = envelope.encode()?;
        if let Err(error) = self.transport.send(&line).await {
            self.pending.remove(&id);
            return Err(ConnectionError::Transport(error));
        }

        Ok(RequestHandle { id, rx })
    }

    /// Send a request and await its correlated response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ConnectionError> {
        self.send_request_cancellable(method, params).await?.wait().await
    }

    /// Send a one-way notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Protocol(ProtocolError::TransportClosed));
        }
        let envelope = Envelope::notification(method, params);
        let line = envelope.encode()?;
        self.transport.send(&line).await?;
        Ok(())
    }

    /// Respond to an inbound request with a success result.
    pub async fn send_response(&self, id: RequestId, result: Value) -> Result<(), ConnectionError> {
        let line = Envelope::response(result, id).encode()?;
        self.transport.send(&line).await?;
        Ok(())
    }

    /// Respond to an inbound request with an error.
    pub async fn send_error(
        &self,
        id: Option<RequestId>,
        error: ErrorBody,
    ) -> Result<(), ConnectionError> {
        let line = Envelope::error_response(error, id).encode()?;
        self.transport.send(&line).await?;
        Ok(())
    }

    /// Move a pending request into the `Cancelling` phase, giving the peer
    /// [`RuntimeConfig::graceful_cancellation_timeout`] to still respond
    /// before the sweep task forces the entry to complete as
    /// [`ProtocolError::Cancelled`]. Does not itself notify the peer — callers
    /// that need the full graceful-cancellation protocol (notify, then enter
    /// the grace window) should use [`ProtocolRuntime::cancel_with_notification`].
    /// Synchronous and side-effect-free beyond this state transition, so it is
    /// safe to call from a `Drop` impl.
    pub fn begin_cancel(&self, id: &RequestId) {
        if let Some(mut entry) = self.pending.get_mut(id) {
            entry.begin_cancelling(self.config.graceful_cancellation_timeout);
        }
    }

    /// Send the cancellation notification for `method`/`params`, then move
    /// `id`'s pending entry into the grace window. This is the full
    /// graceful-cancellation sequence: the peer is told to stop, and the
    /// caller's pending request is given a chance to still complete normally
    /// before the sweep task forces it to `Cancelled`.
    pub async fn cancel_with_notification(
        &self,
        id: &RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ConnectionError> {
        self.send_notification(method, params).await?;
        self.begin_cancel(id);
        Ok(())
    }

    /// Register a handler for inbound notifications of `method`. Handlers run
    /// in registration order when a matching notification arrives.
    pub async fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        self.notification_handlers
            .write()
            .await
            .entry(method.into())
            .or_default()
            .push(handler);
    }

    /// Register the handler for inbound requests of `method`. Registering a
    /// second handler for the same method replaces the first.
    pub async fn register_request_handler(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) {
        self.request_handlers
            .write()
            .await
            .insert(method.into(), handler);
    }

    /// Take the runtime's error stream. Carries protocol-level errors that
    /// are not tied to any single pending request (malformed frames,
    /// unsolicited error responses). Returns `None` if already taken.
    pub async fn error_stream(&self) -> Option<mpsc::UnboundedReceiver<ConnectionError>> {
        self.error_rx.lock().await.take()
    }

    /// Current number of pending (not yet correlated) outbound requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    async fn handle_inbound_line(self: &Arc<Self>, line: &str) {
        let envelope = match Envelope::decode(line) {
            Ok(envelope) => envelope,
            Err(error) => {
                let _ = self.error_tx.send(ConnectionError::Protocol(error));
                return;
            }
        };

        match envelope {
            Envelope::Response { result, id } => {
                if !self.complete_pending(&id, Ok(result)) {
                    let _ = self
                        .error_tx
                        .send(ConnectionError::Protocol(ProtocolError::InvalidResponseId { id }));
                }
            }
            Envelope::ErrorResponse { error, id } => match id {
                Some(id) => {
                    let found = self.complete_pending(
                        &id,
                        Err(ConnectionError::Protocol(ProtocolError::JsonRpcError {
                            id: id.clone(),
                            code: error.code,
                            message: error.message.clone(),
                            data: error.data.clone(),
                        })),
                    );
                    if !found {
                        let _ = self
                            .error_tx
                            .send(ConnectionError::Protocol(ProtocolError::InvalidResponseId { id }));
                    }
                }
                None => {
                    let _ = self.error_tx.send(ConnectionError::Protocol(ProtocolError::JsonRpcError {
                        id: RequestId::Number(0),
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    }));
                }
            },
            Envelope::Notification { method, params } => {
                let runtime = Arc::clone(self);
                tokio::spawn(async move {
                    runtime.dispatch_notification(&method, params).await;
                });
            }
            Envelope::Request { method, params, id } => {
                let runtime = Arc::clone(self);
                tokio::spawn(async move {
                    runtime.dispatch_request(&method, params, id).await;
                });
            }
        }
    }

    fn complete_pending(&self, id: &RequestId, result: PendingResult) -> bool {
        match self.pending.remove(id) {
            Some((_, entry)) => {
                entry.complete(result);
                true
            }
            None => false,
        }
    }

    async fn dispatch_notification(&self, method: &str, params: Option<Value>) {
        let handlers = self.notification_handlers.read().await;
        match handlers.get(method) {
            Some(list) => {
                for handler in list {
                    handler.handle(method, params.clone()).await;
                }
            }
            None => {
                tracing::trace!(method, "no handler registered for notification");
            }
        }
    }

    async fn dispatch_request(self: &Arc<Self>, method: &str, params: Option<Value>, id: RequestId) {
        let handler = self.request_handlers.read().await.get(method).cloned();
        match handler {
            Some(handler) => match handler.handle(method, params).await {
                Ok(result) => {
                    let _ = self.send_response(id, result).await;
                }
                Err(error) => {
                    let _ = self.send_error(Some(id), error).await;
                }
            },
            None => {
                let _ = self
                    .send_error(
                        Some(id),
                        ErrorBody::new(
                            error_code::METHOD_NOT_FOUND,
                            format!("method not implemented: {method}"),
                        ),
                    )
                    .await;
            }
        }
    }

    fn sweep_pending(&self) {
        let mut expired = Vec::new();
        for entry in self.pending.iter() {
            let id = entry.key().clone();
            match entry.value().status() {
                PendingStatus::Active if entry.value().is_expired() => expired.push((id, true)),
                PendingStatus::Cancelling { .. } if entry.value().cancellation_deadline_elapsed() => {
                    expired.push((id, false))
                }
                _ => {}
            }
        }
        for (id, is_timeout) in expired {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let error = if is_timeout {
                    ConnectionError::Protocol(ProtocolError::Timeout { id: id.clone() })
                } else {
                    ConnectionError::Protocol(ProtocolError::Cancelled { id: id.clone() })
                };
                entry.complete(Err(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InboundStream, StateStream, TransportState};
    use crate::error::TransportError;
    use proptest::prelude::*;
    use tokio::sync::watch;

    struct LoopbackTransport {
        state_tx: watch::Sender<TransportState>,
        state_rx: StateStream,
        outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
        inbound_rx: Mutex<Option<InboundStream>>,
        inbound_tx: mpsc::Sender<String>,
    }

    impl LoopbackTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (state_tx, state_rx) = watch::channel(TransportState::Created);
            let (inbound_tx, inbound_rx) = mpsc::channel(64);
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    state_tx,
                    state_rx,
                    outbound: Mutex::new(Some(outbound_tx)),
                    inbound_rx: Mutex::new(Some(inbound_rx)),
                    inbound_tx,
                }),
                outbound_rx,
            )
        }

        async fn push_inbound(&self, line: String) {
            let _ = self.inbound_tx.send(line).await;
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn start(&self) -> Result<(), TransportError> {
            let _ = self.state_tx.send(TransportState::Started);
            Ok(())
        }

        async fn send(&self, frame: &str) -> Result<(), TransportError> {
            if let Some(tx) = self.outbound.lock().await.as_ref() {
                let _ = tx.send(frame.to_string());
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

    #[tokio::test]
    async fn request_resolves_on_matching_response() {
        let (transport, mut outbound) = LoopbackTransport::new();
        let runtime = ProtocolRuntime::new(transport.clone(), RuntimeConfig::default());
        runtime.start().await.unwrap();

        let runtime_for_reply = Arc::clone(&runtime);
        let transport_for_reply = Arc::clone(&transport);
        tokio::spawn(async move {
            let sent = outbound.recv().await.unwrap();
            let envelope = Envelope::decode(&sent).unwrap();
            let id = envelope.id().cloned().unwrap();
            let response = Envelope::response(serde_json::json!({"ok": true}), id).encode().unwrap();
            transport_for_reply.push_inbound(response).await;
            let _ = runtime_for_reply;
        });

        let result = runtime.send_request("session/new", None).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn unknown_method_gets_method_not_found() {
        let (transport, mut outbound) = LoopbackTransport::new();
        let runtime = ProtocolRuntime::new(transport.clone(), RuntimeConfig::default());
        runtime.start().await.unwrap();

        let request = Envelope::request("nope", None, RequestId::new_number(1))
            .encode()
            .unwrap();
        transport.push_inbound(request).await;

        let sent = outbound.recv().await.unwrap();
        let envelope = Envelope::decode(&sent).unwrap();
        match envelope {
            Envelope::ErrorResponse { error, .. } => {
                assert_eq!(error.code, error_code::METHOD_NOT_FOUND);
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notification_fans_out_to_all_registered_handlers() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

        struct Counter(Arc<AtomicUsize>);

        #[async_trait]
        impl NotificationHandler for Counter {
            async fn handle(&self, _method: &str, _params: Option<Value>) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }

        let (transport, _outbound) = LoopbackTransport::new();
        let runtime = ProtocolRuntime::new(transport.clone(), RuntimeConfig::default());
        runtime.start().await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        runtime
            .register_notification_handler("session/update", Arc::new(Counter(Arc::clone(&counter))))
            .await;
        runtime
            .register_notification_handler("session/update", Arc::new(Counter(Arc::clone(&counter))))
            .await;

        let notification = Envelope::notification("session/update", None).encode().unwrap();
        transport.push_inbound(notification).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn request_id_allocation_is_monotonic() {
        let (transport, _outbound) = LoopbackTransport::new();
        let runtime = ProtocolRuntime::new(transport, RuntimeConfig::default());
        let first = runtime.next_id.fetch_add(1, Ordering::SeqCst);
        let second = runtime.next_id.fetch_add(1, Ordering::SeqCst);
        assert!(second > first);
    }

    #[tokio::test]
    async fn unmatched_response_id_surfaces_on_error_stream() {
        let (transport, _outbound) = LoopbackTransport::new();
        let runtime = ProtocolRuntime::new(transport.clone(), RuntimeConfig::default());
        runtime.start().await.unwrap();
        let mut errors = runtime.error_stream().await.unwrap();

        let response = Envelope::response(Value::Null, RequestId::new_number(999))
            .encode()
            .unwrap();
        transport.push_inbound(response).await;

        let error = errors.recv().await.unwrap();
        assert!(matches!(
            error,
            ConnectionError::Protocol(ProtocolError::InvalidResponseId { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn id_allocation_is_strictly_increasing_for_any_call_count(calls in 1usize..200) {
            let (transport, _outbound) = LoopbackTransport::new();
            let runtime = ProtocolRuntime::new(transport, RuntimeConfig::default());
            let mut previous = 0u64;
            for _ in 0..calls {
                let id = runtime.next_id.fetch_add(1, Ordering::SeqCst);
                prop_assert!(id > previous);
                previous = id;
            }
        }

        #[test]
        fn notification_fan_out_count_matches_handler_count_for_any_registration_size(handlers in 1usize..16) {
            use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

            struct Counter(Arc<AtomicUsize>);

            #[async_trait]
            impl NotificationHandler for Counter {
                async fn handle(&self, _method: &str, _params: Option<Value>) {
                    self.0.fetch_add(1, AtomicOrdering::SeqCst);
                }
            }

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let (transport, _outbound) = LoopbackTransport::new();
                let runtime = ProtocolRuntime::new(transport.clone(), RuntimeConfig::default());
                runtime.start().await.unwrap();

                let counter = Arc::new(AtomicUsize::new(0));
                for _ in 0..handlers {
                    runtime
                        .register_notification_handler(
                            "session/update",
                            Arc::new(Counter(Arc::clone(&counter))),
                        )
                        .await;
                }

                let notification = Envelope::notification("session/update", None).encode().unwrap();
                transport.push_inbound(notification).await;
                tokio::time::sleep(Duration::from_millis(50)).await;

                prop_assert_eq!(counter.load(AtomicOrdering::SeqCst), handlers);
                Ok(())
            })?;
        }
    }
}
