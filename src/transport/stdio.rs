//! A newline-delimited JSON transport over stdin/stdout.
//!
//! A dedicated read task owns a `BufReader<Stdin>` and feeds an `mpsc` channel
//! line by line; `send` takes a `Mutex<Stdout>` so concurrent senders
//! serialize without interleaving.
//! `\r\n` line endings are tolerated on read; partial trailing lines at EOF
//! are discarded rather than delivered truncated.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::transport::{InboundStream, StateStream, Transport, TransportState};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A [`Transport`] that frames JSON-RPC messages as newline-terminated lines
/// over process stdin/stdout.
pub struct StdioTransport {
    stdin: Arc<Mutex<BufReader<Stdin>>>,
    stdout: Arc<Mutex<Stdout>>,
    max_message_size: usize,
    state_tx: watch::Sender<TransportState>,
    state_rx: StateStream,
    inbound_rx: Mutex<Option<InboundStream>>,
    inbound_tx: mpsc::Sender<String>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Build a transport with the default 10 MiB message size limit.
    pub fn new() -> Self {
        Self::with_max_message_size(10 * 1024 * 1024)
    }

    /// Build a transport that rejects outbound frames larger than `max_message_size` bytes.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        let (state_tx, state_rx) = watch::channel(TransportState::Created);
        let (inbound_tx, inbound_rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            stdin: Arc::new(Mutex::new(BufReader::new(io::stdin()))),
            stdout: Arc::new(Mutex::new(io::stdout())),
            max_message_size,
            state_tx,
            state_rx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            inbound_tx,
            read_task: Mutex::new(None),
        }
    }

    fn state(&self) -> TransportState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: TransportState) {
        let _ = self.state_tx.send(state);
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        match self.state() {
            TransportState::Created => {}
            TransportState::Closed | TransportState::Closing => return Err(TransportError::Closed),
            _ => return Ok(()),
        }

        self.set_state(TransportState::Starting);

        let stdin = Arc::clone(&self.stdin);
        let inbound_tx = self.inbound_tx.clone();
        let state_tx = self.state_tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                let mut line = String::new();
                let read = {
                    let mut reader = stdin.lock().await;
                    reader.read_line(&mut line).await
                };
                match read {
                    Ok(0) => {
                        let _ = state_tx.send(TransportState::Closed);
                        break;
                    }
                    Ok(_) if !line.ends_with('\n') => {
                        // EOF reached mid-line: the buffered bytes are not a
                        // complete frame, so discard them rather than
                        // forwarding a truncated message.
                        let _ = state_tx.send(TransportState::Closed);
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim_end_matches(['\n', '\r']);
                        if trimmed.is_empty() {
                            continue;
                        }
                        if inbound_tx.send(trimmed.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "stdio read task terminating on I/O error");
                        let _ = state_tx.send(TransportState::Closed);
                        break;
                    }
                }
            }
        });

        *self.read_task.lock().await = Some(handle);
        self.set_state(TransportState::Started);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        match self.state() {
            TransportState::Started => {}
            TransportState::Created | TransportState::Starting => {
                return Err(TransportError::NotStarted)
            }
            TransportState::Closing | TransportState::Closed => return Err(TransportError::Closed),
        }

        if frame.len() > self.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: frame.len(),
                limit: self.max_message_size,
            });
        }
        if frame.contains('\n') {
            return Err(TransportError::InvalidFrame(
                "frame must not contain an embedded newline".to_string(),
            ));
        }

        let mut stdout = self.stdout.lock().await;
        stdout.write_all(frame.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.state() == TransportState::Closed {
            return Ok(());
        }
        self.set_state(TransportState::Closing);
        if let Some(handle) = self.read_task.lock().await.take() {
            handle.abort();
        }
        self.set_state(TransportState::Closed);
        Ok(())
    }

    fn state_stream(&self) -> StateStream {
        self.state_rx.clone()
    }

    fn inbound_stream(&self) -> Option<InboundStream> {
        self.inbound_rx.try_lock().ok()?.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_in_created_state() {
        let transport = StdioTransport::new();
        assert_eq!(*transport.state_stream().borrow(), TransportState::Created);
    }

    #[tokio::test]
    async fn send_before_start_is_rejected() {
        let transport = StdioTransport::new();
        let result = transport.send("{}").await;
        assert!(matches!(result, Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn embedded_newline_is_rejected() {
        let transport = StdioTransport::new();
        transport.start().await.unwrap();
        let result = transport.send("line one\nline two").await;
        assert!(matches!(result, Err(TransportError::InvalidFrame(_))));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let transport = StdioTransport::with_max_message_size(4);
        transport.start().await.unwrap();
        let result = transport.send("way too long").await;
        assert!(matches!(result, Err(TransportError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = StdioTransport::new();
        transport.start().await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(*transport.state_stream().borrow(), TransportState::Closed);
    }

    #[tokio::test]
    async fn inbound_stream_can_only_be_taken_once() {
        let transport = StdioTransport::new();
        assert!(transport.inbound_stream().is_some());
        assert!(transport.inbound_stream().is_none());
    }
}
