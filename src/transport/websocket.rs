//! WebSocket medium for [`JsonRpcTransport`].
//!
//! One background task owns the socket. It forwards queued outbound
//! JSON-RPC text frames and feeds every inbound text frame to
//! [`JsonRpcTransport::handle_text`].
//!
//! ```text
//! JsonRpcTransport ──SendFn──► command_tx ──► event loop ──► ws_write
//!        ▲                                        │
//!        └──────────── handle_text ◄──── ws_read ◄┘
//! ```
//!
//! When the remote end closes the socket, the transport is told the
//! connection was lost and every pending request fails. Once the event
//! loop has exited the transport refuses to connect again.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::protocol::JsonRpcMessage;

use super::Transport;
use super::json_rpc::{JsonRpcChannel, JsonRpcTransport};
use super::options::TransportOptions;

// ============================================================================
// Types
// ============================================================================

/// Commands from the transport to the event loop.
enum LinkCommand {
    /// Write one text frame.
    Send(String),
    /// Close the socket and stop.
    Shutdown,
}

// ============================================================================
// WebSocketLink
// ============================================================================

/// Owns a WebSocket and drives a [`JsonRpcTransport`] over it.
///
/// The link does not connect the transport; call
/// [`Transport::connect`] on [`WebSocketLink::transport`] before sending.
pub struct WebSocketLink {
    transport: JsonRpcTransport,
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketLink {
    /// Dials `url` and attaches a transport to the socket.
    ///
    /// # Errors
    ///
    /// Returns `connection_failed` if the handshake fails.
    pub async fn connect(url: &str, options: TransportOptions) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::connection_failed(format!("WebSocket handshake with {url} failed"))
                .with_cause(e)
        })?;
        info!(%url, "WebSocket connected");
        Ok(Self::attach(ws_stream, options))
    }

    /// Attaches a transport to an established socket.
    #[must_use]
    pub fn attach<S>(ws_stream: WebSocketStream<S>, options: TransportOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let alive = Arc::new(AtomicBool::new(true));

        let sender = command_tx.clone();
        let channel = JsonRpcChannel::from_fn(move |message: JsonRpcMessage| {
            let queued = serde_json::to_string(&message)
                .map_err(TransportError::from)
                .and_then(|text| {
                    sender
                        .send(LinkCommand::Send(text))
                        .map_err(|_| TransportError::send_failed("WebSocket link is closed"))
                });
            async move { queued }
        })
        .with_liveness(Arc::clone(&alive));
        let transport = JsonRpcTransport::new(channel, options);

        let task = tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            transport.clone(),
            alive,
        ));

        Self {
            transport,
            command_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Returns the transport driven by this link.
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &JsonRpcTransport {
        &self.transport
    }

    /// Returns `true` while the event loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Disconnects the transport, closes the socket, and waits for the
    /// event loop to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.transport.disconnect().await;
        let _ = self.command_tx.send(LinkCommand::Shutdown);

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "WebSocket event loop ended abnormally");
        }
    }

    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<LinkCommand>,
        transport: JsonRpcTransport,
        alive: Arc<AtomicBool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let lost = loop {
            tokio::select! {
                frame = ws_read.next() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            trace!(len = text.len(), "Inbound frame");
                            transport.handle_text(&text);
                        }

                        Some(Ok(Frame::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break true;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break true;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break true;
                        }

                        // Binary, ping, and pong frames carry no JSON-RPC
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(LinkCommand::Send(text)) => {
                            if let Err(e) = ws_write.send(Frame::Text(text.into())).await {
                                warn!(error = %e, "Failed to write frame");
                                break true;
                            }
                        }

                        Some(LinkCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break false;
                        }

                        None => {
                            debug!("Command channel closed");
                            break false;
                        }
                    }
                }
            }
        };

        alive.store(false, Ordering::Release);
        if lost {
            transport
                .inbound()
                .connection_lost(TransportError::connection_failed("WebSocket connection closed"));
        }

        debug!(lost, "WebSocket event loop terminated");
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        let _ = self.command_tx.send(LinkCommand::Shutdown);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::time::Duration;

    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use crate::error::TransportErrorCode;
    use crate::protocol::{Message, MessageType};
    use crate::transport::ConnectionState;
    use crate::transport::testing::init_tracing;

    /// Wallet stub answering every JSON-RPC request with its params.
    async fn spawn_echo_server(close_after: Option<usize>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");

            let mut seen = 0;
            while let Some(Ok(frame)) = ws.next().await {
                let Frame::Text(text) = frame else {
                    continue;
                };
                seen += 1;
                if close_after.is_some_and(|limit| seen >= limit) {
                    let _ = ws.close(None).await;
                    break;
                }

                let request: Value = serde_json::from_str(&text).expect("json");
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": request["id"].clone(),
                    "result": {"echo": request["params"].clone()},
                });
                ws.send(Frame::Text(reply.to_string().into()))
                    .await
                    .expect("reply");
            }
        });

        addr
    }

    fn options() -> TransportOptions {
        TransportOptions::new().with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_round_trip_over_socket() -> anyhow::Result<()> {
        init_tracing();
        let addr = spawn_echo_server(None).await;
        let link = WebSocketLink::connect(&format!("ws://{addr}"), options()).await?;
        link.transport().connect().await?;

        let reply = link
            .transport()
            .send(Message::new(
                "ws-1",
                MessageType::Request,
                json!({"method": "eth_chainId", "params": []}),
            ))
            .await?;

        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(
            reply.payload,
            json!({"echo": {"method": "eth_chainId", "params": []}})
        );

        link.shutdown().await;
        assert!(!link.is_running());
        assert_eq!(link.transport().state(), ConnectionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_close_fails_pending() {
        let addr = spawn_echo_server(Some(1)).await;
        let link = WebSocketLink::connect(&format!("ws://{addr}"), options())
            .await
            .expect("dial");
        link.transport().connect().await.expect("connect");

        let err = link
            .transport()
            .send(Message::new("ws-2", MessageType::Request, json!({})))
            .await
            .expect_err("socket closed");

        assert_eq!(err.code, TransportErrorCode::ConnectionFailed);
        assert_eq!(link.transport().state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = WebSocketLink::connect(&format!("ws://{addr}"), options())
            .await
            .err()
            .expect("refused");
        assert_eq!(err.code, TransportErrorCode::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let addr = spawn_echo_server(None).await;
        let link = WebSocketLink::connect(&format!("ws://{addr}"), options())
            .await
            .expect("dial");
        link.transport().connect().await.expect("connect");

        link.shutdown().await;
        link.shutdown().await;

        let err = link
            .transport()
            .send(Message::new("late", MessageType::Request, json!({})))
            .await
            .expect_err("closed");
        assert_eq!(err.code, TransportErrorCode::NotConnected);
    }

    #[tokio::test]
    async fn test_connect_refused_after_socket_ends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("handshake");
            let _ = ws.close(None).await;
        });

        let link = WebSocketLink::connect(&format!("ws://{addr}"), options())
            .await
            .expect("dial");
        tokio::time::timeout(Duration::from_secs(5), async {
            while link.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("event loop exits");
        assert_eq!(link.transport().state(), ConnectionState::Disconnected);

        let err = link.transport().connect().await.expect_err("socket gone");
        assert_eq!(err.code, TransportErrorCode::ConnectionFailed);
        assert!(!link.transport().is_connected());
    }
}
