//! JSON-RPC 2.0 transport over an injected send function.
//!
//! Outbound messages are mapped with [`to_json_rpc`] and handed to the
//! caller's [`SendFn`]. Inbound JSON-RPC objects are fed back through
//! [`JsonRpcTransport::handle_message`], validated, mapped with
//! [`from_json_rpc`], and routed like any other inbound message.
//!
//! The medium itself (WebSocket, HTTP long-poll, worker port) belongs to
//! the caller; [`WebSocketLink`](super::WebSocketLink) is one such medium.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{Result, TransportError};
use crate::protocol::{JsonRpcMessage, Message, from_json_rpc, to_json_rpc, validate_json_rpc};

use super::{ConnectionState, Transport};
use super::base::BaseTransport;
use super::channel::{Channel, InboundSink};
use super::options::TransportOptions;

// ============================================================================
// Types
// ============================================================================

/// Caller-supplied function that delivers one JSON-RPC object.
pub type SendFn = Arc<dyn Fn(JsonRpcMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

// ============================================================================
// JsonRpcChannel
// ============================================================================

/// [`Channel`] forwarding JSON-RPC objects to a [`SendFn`].
///
/// The caller owns the medium. Opening only checks the liveness flag, if
/// one was attached with [`JsonRpcChannel::with_liveness`].
pub struct JsonRpcChannel {
    send: SendFn,
    alive: Option<Arc<AtomicBool>>,
}

impl JsonRpcChannel {
    /// Wraps an existing send function.
    #[inline]
    #[must_use]
    pub fn new(send: SendFn) -> Self {
        Self { send, alive: None }
    }

    /// Attaches a flag the medium clears once it can no longer carry
    /// traffic. Opening fails with `connection_failed` after that.
    #[inline]
    #[must_use]
    pub fn with_liveness(mut self, alive: Arc<AtomicBool>) -> Self {
        self.alive = Some(alive);
        self
    }

    fn is_alive(&self) -> bool {
        self.alive
            .as_ref()
            .is_none_or(|alive| alive.load(Ordering::Acquire))
    }

    /// Wraps an async closure.
    #[must_use]
    pub fn from_fn<F, Fut>(send: F) -> Self
    where
        F: Fn(JsonRpcMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(Arc::new(move |message| send(message).boxed()))
    }
}

impl fmt::Debug for JsonRpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcChannel")
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Channel for JsonRpcChannel {
    fn kind(&self) -> &'static str {
        "json-rpc"
    }

    async fn open(&self, _inbound: InboundSink) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(TransportError::connection_failed("JSON-RPC medium is closed"))
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn post(&self, message: &Message<Value>) -> Result<()> {
        let rpc = to_json_rpc(message)?;
        trace!(id = %rpc.id, method = ?rpc.method, "Forwarding JSON-RPC message");
        (self.send)(rpc).await
    }
}

// ============================================================================
// JsonRpcTransport
// ============================================================================

/// Transport speaking JSON-RPC 2.0 over a caller-owned medium.
pub type JsonRpcTransport = BaseTransport<JsonRpcChannel>;

impl BaseTransport<JsonRpcChannel> {
    /// Creates a JSON-RPC transport over `send`.
    #[must_use]
    pub fn with_sender(send: SendFn, options: TransportOptions) -> Self {
        Self::new(JsonRpcChannel::new(send), options)
    }

    /// Creates a JSON-RPC transport over an async closure.
    #[must_use]
    pub fn from_fn<F, Fut>(send: F, options: TransportOptions) -> Self
    where
        F: Fn(JsonRpcMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::new(JsonRpcChannel::from_fn(send), options)
    }

    /// Feeds one inbound JSON-RPC object into the transport.
    ///
    /// Invalid objects are reported as `invalid_message` and dropped.
    /// Input arriving while disconnected is ignored.
    pub fn handle_message(&self, value: Value) {
        if self.state() == ConnectionState::Disconnected {
            trace!("Ignoring JSON-RPC input while disconnected");
            return;
        }

        let inbound = self.inbound();
        match validate_json_rpc(value).and_then(from_json_rpc) {
            Ok(message) => inbound.deliver(message),
            Err(err) => {
                warn!(error = %err, "Rejected inbound JSON-RPC message");
                inbound.report(TransportError::from(err));
            }
        }
    }

    /// Parses and feeds one inbound JSON-RPC text frame.
    pub fn handle_text(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.handle_message(value),
            Err(e) if self.state() != ConnectionState::Disconnected => {
                self.inbound().report(TransportError::from(e));
            }
            Err(_) => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::error::TransportErrorCode;
    use crate::protocol::MessageType;
    use crate::transport::testing::{ErrorLog, init_tracing};
    use crate::transport::{Transport, TransportOptions};

    fn recording() -> (JsonRpcTransport, Arc<Mutex<Vec<JsonRpcMessage>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);
        let transport = JsonRpcTransport::from_fn(
            move |message| {
                log.lock().push(message);
                async { Ok::<_, TransportError>(()) }
            },
            TransportOptions::new(),
        );
        (transport, sent)
    }

    async fn wait_for_pending(transport: &JsonRpcTransport) {
        while transport.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_request_resolved_by_result() {
        init_tracing();
        let (transport, sent) = recording();
        transport.connect().await.expect("connect");

        let sender = transport.clone();
        let pending = tokio::spawn(async move {
            sender
                .send(Message::new(
                    "1",
                    MessageType::Request,
                    json!({"method": "test", "params": []}),
                ))
                .await
        });
        wait_for_pending(&transport).await;

        let outbound = sent.lock()[0].clone();
        assert_eq!(outbound.jsonrpc, "2.0");
        assert_eq!(outbound.id.as_str(), "1");
        assert_eq!(outbound.method.as_deref(), Some("request"));

        transport.handle_message(json!({"jsonrpc": "2.0", "id": "1", "result": {"ok": true}}));

        let reply = pending.await.expect("join").expect("reply");
        assert_eq!(reply.message_type, MessageType::Response);
        assert_eq!(reply.payload, json!({"ok": true}));
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_reply_rejects() {
        let (transport, _sent) = recording();
        transport.connect().await.expect("connect");

        let sender = transport.clone();
        let pending = tokio::spawn(async move {
            sender
                .send(Message::new("2", MessageType::Request, json!({"method": "sign"})))
                .await
        });
        wait_for_pending(&transport).await;

        transport.handle_message(json!({
            "jsonrpc": "2.0",
            "id": "2",
            "error": {"code": 4001, "message": "User rejected"}
        }));

        let err = pending.await.expect("join").expect_err("rejected");
        assert_eq!(err.code, TransportErrorCode::ProtocolError);
        assert_eq!(err.message, "User rejected");
    }

    #[tokio::test]
    async fn test_numeric_id_matches_string_id() {
        let (transport, _sent) = recording();
        transport.connect().await.expect("connect");

        let sender = transport.clone();
        let pending = tokio::spawn(async move {
            sender
                .send(Message::new("7", MessageType::Request, json!({})))
                .await
        });
        wait_for_pending(&transport).await;

        transport.handle_message(json!({"jsonrpc": "2.0", "id": 7, "result": null}));
        let reply = pending.await.expect("join").expect("reply");
        assert_eq!(reply.payload, Value::Null);
    }

    #[tokio::test]
    async fn test_disconnected_send_never_calls_sender() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let transport = JsonRpcTransport::from_fn(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, TransportError>(()) }
            },
            TransportOptions::new(),
        );

        let err = transport
            .send(Message::new("x", MessageType::Request, json!({})))
            .await
            .expect_err("not connected");
        assert_eq!(err.code, TransportErrorCode::NotConnected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sender_failure_is_send_failed() {
        let transport = JsonRpcTransport::from_fn(
            |_| async { Err::<(), _>(TransportError::transport("socket closed")) },
            TransportOptions::new(),
        );
        let errors = ErrorLog::attach(&transport);
        transport.connect().await.expect("connect");

        let err = transport
            .send(Message::new("y", MessageType::Request, json!({})))
            .await
            .expect_err("send failed");
        assert_eq!(err.code, TransportErrorCode::SendFailed);
        assert_eq!(transport.pending_count(), 0);
        assert_eq!(errors.codes(), vec![TransportErrorCode::SendFailed]);
    }

    #[tokio::test]
    async fn test_inbound_method_reaches_subscribers() {
        let (transport, _sent) = recording();
        transport.connect().await.expect("connect");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        transport.on_message(move |message| {
            log.lock().push(message.clone());
            Ok(())
        });

        transport.handle_message(json!({
            "jsonrpc": "2.0",
            "id": "n1",
            "method": "accountsChanged",
            "params": ["0xabc"]
        }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message_type, MessageType::Request);
        assert_eq!(seen[0].payload, json!(["0xabc"]));
    }

    #[tokio::test]
    async fn test_invalid_input_reported() {
        let (transport, _sent) = recording();
        let errors = ErrorLog::attach(&transport);
        transport.connect().await.expect("connect");

        transport.handle_message(json!({"jsonrpc": "1.0", "id": "1", "result": 1}));
        transport.handle_message(json!({"jsonrpc": "2.0", "id": "1"}));
        transport.handle_text("{not json");

        assert_eq!(
            errors.codes(),
            vec![TransportErrorCode::InvalidMessage; 3]
        );
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_input_ignored_while_disconnected() {
        let (transport, _sent) = recording();
        let errors = ErrorLog::attach(&transport);

        transport.handle_message(json!({"garbage": true}));
        transport.handle_text("{not json");
        assert_eq!(errors.len(), 0);
    }

    #[tokio::test]
    async fn test_notification_posted_as_method() {
        let (transport, sent) = recording();
        transport.connect().await.expect("connect");

        transport
            .post(Message::notification(json!({"event": "ready"})))
            .await
            .expect("post");

        let outbound = sent.lock()[0].clone();
        assert_eq!(outbound.method.as_deref(), Some("notification"));
        assert_eq!(outbound.params, Some(json!({"event": "ready"})));
    }

    #[tokio::test]
    async fn test_scalar_request_payload_never_reaches_sender() {
        let (transport, sent) = recording();
        let errors = ErrorLog::attach(&transport);
        transport.connect().await.expect("connect");

        let err = transport
            .send(Message::new("s", MessageType::Request, json!("eth_accounts")))
            .await
            .expect_err("unencodable");
        assert_eq!(err.code, TransportErrorCode::InvalidMessage);
        assert!(sent.lock().is_empty());
        assert_eq!(transport.pending_count(), 0);
        assert_eq!(errors.len(), 0);
    }

    #[tokio::test]
    async fn test_open_fails_once_medium_is_dead() {
        let alive = Arc::new(AtomicBool::new(true));
        let channel = JsonRpcChannel::from_fn(|_| async { Ok::<_, TransportError>(()) })
            .with_liveness(Arc::clone(&alive));
        let transport = JsonRpcTransport::new(channel, TransportOptions::new());

        transport.connect().await.expect("connect");
        transport.disconnect().await;

        alive.store(false, Ordering::Release);
        let err = transport.connect().await.expect_err("medium closed");
        assert_eq!(err.code, TransportErrorCode::ConnectionFailed);
        assert_eq!(transport.state(), ConnectionState::Error);
    }
}
