//! Shared lifecycle, handler registries, and correlation.
//!
//! [`BaseTransport`] implements the whole [`Transport`] contract once;
//! a concrete transport only supplies a [`Channel`].
//!
//! # State Machine
//!
//! ```text
//!                connect()              open ok
//! Disconnected ───────────► Connecting ─────────► Connected
//!      ▲                        │                    │
//!      │                open err│      connection    │
//!      │                        ▼         lost       │
//!      └─── disconnect() ──── Error ◄────────────────┘
//! ```
//!
//! `disconnect()` from any state other than `Disconnected` tears the
//! channel down, rejects every pending request, notifies error handlers
//! once, and clears them.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError, TransportErrorCode};
use crate::identifiers::ListenerId;
use crate::protocol::Message;

use super::arena::ListenerArena;
use super::channel::{Channel, InboundSink};
use super::correlation::CorrelationEngine;
use super::options::TransportOptions;
use super::{ConnectionState, ErrorHandler, MessageHandler, Transport};

// ============================================================================
// TransportShared
// ============================================================================

/// State owned by one transport instance and shared with its inbound sink.
pub(crate) struct TransportShared {
    kind: &'static str,
    state: RwLock<ConnectionState>,
    correlation: CorrelationEngine,
    error_handlers: Mutex<ListenerArena<ErrorHandler>>,
    subscribers: Mutex<ListenerArena<MessageHandler>>,
}

impl TransportShared {
    fn new(kind: &'static str, options: &TransportOptions) -> Self {
        Self {
            kind,
            state: RwLock::new(ConnectionState::Disconnected),
            correlation: CorrelationEngine::new(options.max_pending),
            error_handlers: Mutex::new(ListenerArena::new()),
            subscribers: Mutex::new(ListenerArena::new()),
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    #[inline]
    pub(crate) fn correlation(&self) -> &CorrelationEngine {
        &self.correlation
    }

    /// Calls every error handler with `err`.
    ///
    /// Handlers run outside the registry lock.
    pub(crate) fn notify(&self, err: &TransportError) {
        let handlers = self.error_handlers.lock().snapshot();
        for handler in handlers {
            handler(err);
        }
    }

    /// Hands a request or notification to every subscriber.
    pub(crate) fn dispatch(&self, message: &Message<Value>) {
        let subscribers = self.subscribers.lock().snapshot();
        trace!(transport = self.kind, id = %message.id, count = subscribers.len(), "Dispatching inbound message");

        for subscriber in subscribers {
            if let Err(err) = subscriber(message) {
                warn!(transport = self.kind, id = %message.id, error = %err, "Subscriber failed");
                self.notify(&err);
            }
        }
    }

    pub(crate) fn connection_lost(&self, err: TransportError) {
        {
            let mut state = self.state.write();
            if !matches!(*state, ConnectionState::Connected | ConnectionState::Connecting) {
                return;
            }
            *state = ConnectionState::Error;
        }

        warn!(transport = self.kind, error = %err, "Connection lost");
        self.correlation.fail_all(&err);
        self.notify(&err);
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.subscribers.lock().remove(id).is_some()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle returned by [`Transport::subscribe`].
///
/// Dropping it keeps the subscription; call [`Subscription::unsubscribe`]
/// to remove it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: ListenerId,
    shared: Weak<TransportShared>,
}

impl Subscription {
    /// Returns the subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the subscriber. Returns `false` if it was already removed
    /// or the transport is gone.
    pub fn unsubscribe(self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.unsubscribe(self.id))
    }
}

impl std::fmt::Debug for TransportShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportShared")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("pending", &self.correlation.len())
            .finish()
    }
}

// ============================================================================
// BaseTransport
// ============================================================================

/// Transport built from a [`Channel`].
///
/// Cloning yields another handle to the same instance.
pub struct BaseTransport<C: Channel> {
    shared: Arc<TransportShared>,
    channel: Arc<C>,
    options: TransportOptions,
}

impl<C: Channel> Clone for BaseTransport<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            channel: Arc::clone(&self.channel),
            options: self.options,
        }
    }
}

impl<C: Channel> BaseTransport<C> {
    /// Creates a disconnected transport over `channel`.
    #[must_use]
    pub fn new(channel: C, options: TransportOptions) -> Self {
        let shared = Arc::new(TransportShared::new(channel.kind(), &options));
        Self {
            shared,
            channel: Arc::new(channel),
            options,
        }
    }

    /// Returns the channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Returns the construction-time options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> TransportOptions {
        self.options
    }

    /// Returns the number of requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.correlation.len()
    }

    /// Returns a sink feeding this transport's inbound path.
    #[must_use]
    pub fn inbound(&self) -> InboundSink {
        InboundSink::new(Arc::clone(&self.shared))
    }

    /// Registers a closure as an error handler.
    pub fn on_error(
        &self,
        handler: impl Fn(&TransportError) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_error_handler(Arc::new(handler))
    }

    /// Subscribes a closure to inbound requests and notifications.
    pub fn on_message(
        &self,
        handler: impl Fn(&Message<Value>) -> Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Arc::new(handler))
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.shared.state.write(), next);
        if previous != next {
            debug!(transport = self.shared.kind, from = ?previous, to = ?next, "State transition");
        }
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

#[async_trait]
impl<C: Channel> Transport for BaseTransport<C> {
    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write();
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(TransportError::connection_failed(
                        "Connection already in progress",
                    ));
                }
                ConnectionState::Disconnected | ConnectionState::Error => {
                    *state = ConnectionState::Connecting;
                }
            }
        }
        debug!(transport = self.shared.kind, "Connecting");

        match self.channel.open(self.inbound()).await {
            Ok(()) => {
                let raced = {
                    let mut state = self.shared.state.write();
                    if *state == ConnectionState::Connecting {
                        *state = ConnectionState::Connected;
                        false
                    } else {
                        true
                    }
                };

                if raced {
                    let _ = self.channel.close().await;
                    return Err(TransportError::connection_failed(
                        "Transport disconnected while connecting",
                    ));
                }

                info!(transport = self.shared.kind, "Transport connected");
                Ok(())
            }
            Err(cause) => {
                self.set_state(ConnectionState::Error);

                let err = if cause.code == TransportErrorCode::ConnectionFailed {
                    cause
                } else {
                    TransportError::connection_failed(format!(
                        "Failed to connect {} transport: {}",
                        self.shared.kind, cause.message
                    ))
                    .with_cause(cause)
                };

                warn!(transport = self.shared.kind, error = %err, "Connect failed");
                self.shared.notify(&err);
                Err(err)
            }
        }
    }

    async fn disconnect(&self) {
        let previous = {
            let mut state = self.shared.state.write();
            if *state == ConnectionState::Disconnected {
                return;
            }
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };

        if let Err(err) = self.channel.close().await {
            warn!(transport = self.shared.kind, error = %err, "Channel close failed");
        }

        let err = TransportError::disconnected();
        let failed = self.shared.correlation.fail_all(&err);
        self.shared.notify(&err);
        self.shared.error_handlers.lock().drain();

        info!(transport = self.shared.kind, from = ?previous, failed, "Transport disconnected");
    }

    async fn send(&self, message: Message<Value>) -> Result<Message<Value>> {
        // Registration happens under the state lock so a concurrent
        // disconnect either sees the entry in `fail_all` or we see its state.
        let reply = {
            let state = self.shared.state.read();
            if *state != ConnectionState::Connected {
                return Err(TransportError::not_connected());
            }
            self.shared.correlation.register(&message.id)?
        };
        trace!(transport = self.shared.kind, id = %message.id, kind = %message.message_type, "Sending");

        if let Err(cause) = self.channel.post(&message).await {
            self.shared.correlation.remove(reply.id());
            if cause.code == TransportErrorCode::InvalidMessage {
                return Err(cause);
            }
            let err = if cause.code == TransportErrorCode::SendFailed {
                cause
            } else {
                TransportError::send_failed(format!(
                    "Failed to send message {}: {}",
                    message.id, cause.message
                ))
                .with_cause(cause)
            };
            self.shared.notify(&err);
            return Err(err);
        }

        let result = self.shared.correlation.wait(reply, self.options.timeout).await;
        if let Err(err) = &result
            && err.is_timeout()
        {
            self.shared.notify(err);
        }
        result
    }

    async fn post(&self, message: Message<Value>) -> Result<()> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(TransportError::not_connected());
        }

        self.channel.post(&message).await.map_err(|cause| {
            if cause.code == TransportErrorCode::InvalidMessage {
                return cause;
            }
            let err = TransportError::send_failed(format!(
                "Failed to post message {}: {}",
                message.id, cause.message
            ))
            .with_cause(cause);
            self.shared.notify(&err);
            err
        })
    }

    fn subscribe(&self, handler: MessageHandler) -> Subscription {
        let id = self.shared.subscribers.lock().insert(handler);
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn add_error_handler(&self, handler: ErrorHandler) -> ListenerId {
        self.shared.error_handlers.lock().insert(handler)
    }

    fn remove_error_handler(&self, id: ListenerId) -> bool {
        self.shared.error_handlers.lock().remove(id).is_some()
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

// ============================================================================
// Tests
// ============================================================================
