//! Transport layer.
//!
//! Every transport implements [`Transport`] through [`BaseTransport`]
//! and differs only in the [`Channel`] it wraps.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │   dApp (Rust)   │        window / port /       │     Wallet      │
//! │                 │        send function         │                 │
//! │  BaseTransport  │◄────────────────────────────►│  popup, iframe, │
//! │  → Channel      │                              │  extension, ws  │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `arena` | Id-indexed handler table |
//! | `base` | State machine, handler registries, correlation wiring |
//! | `channel` | [`Channel`] trait and [`InboundSink`] |
//! | `correlation` | Pending-request table with timeouts |
//! | `extension` | Browser-extension runtime port channel |
//! | `json_rpc` | JSON-RPC channel over an injected send function |
//! | `options` | Construction-time configuration |
//! | `websocket` | WebSocket link for the JSON-RPC transport |
//! | `window` | `postMessage` channel for popups and iframes |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::identifiers::ListenerId;
use crate::protocol::Message;

// ============================================================================
// Submodules
// ============================================================================

/// Id-indexed handler table.
pub mod arena;

/// Shared lifecycle and correlation.
pub mod base;

/// Channel seam.
pub mod channel;

/// Pending-request correlation.
pub mod correlation;

/// Browser-extension transport.
pub mod extension;

/// JSON-RPC transport.
pub mod json_rpc;

/// Construction-time configuration.
pub mod options;

/// WebSocket link.
pub mod websocket;

/// Window transport.
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use arena::ListenerArena;
pub use base::{BaseTransport, Subscription};
pub use channel::{Channel, InboundSink};
pub use correlation::{CorrelationEngine, PendingReply};
pub use extension::{ExtensionChannel, ExtensionTransport, PortError, RuntimePort, RuntimeProvider};
pub use json_rpc::{JsonRpcChannel, JsonRpcTransport, SendFn};
pub use options::{
    DEFAULT_TIMEOUT, ExtensionOptions, PopupFeatures, TransportOptions, WindowOptions,
    WindowTarget,
};
pub use websocket::WebSocketLink;
pub use window::{MessageEvent, WindowChannel, WindowError, WindowHandle, WindowProvider, WindowTransport};

// ============================================================================
// Handler Types
// ============================================================================

/// Callback receiving every error raised by a transport.
pub type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Callback receiving inbound requests and notifications.
///
/// An `Err` is forwarded to the error handlers; it never tears the
/// transport down.
pub type MessageHandler = Arc<dyn Fn(&Message<Value>) -> Result<()> + Send + Sync>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Initial state, and the state after `disconnect()`.
    Disconnected,
    /// `connect()` is in progress.
    Connecting,
    /// Ready to send.
    Connected,
    /// Connecting failed or the connection was lost.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Contract consumed by wallet adapters and UI layers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the channel. No-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns `connection_failed`; error handlers are notified too.
    async fn connect(&self) -> Result<()>;

    /// Tears the channel down. Best-effort, idempotent, never fails.
    async fn disconnect(&self);

    /// Sends a message and waits for the correlated reply.
    ///
    /// # Errors
    ///
    /// - `not_connected` without touching the channel
    /// - `invalid_message` if `message.id` is already pending
    /// - `send_failed` if the channel rejects the message
    /// - `timeout` if no reply arrives in time
    /// - `protocol_error` if the remote end answers with an Error
    async fn send(&self, message: Message<Value>) -> Result<Message<Value>>;

    /// Sends a message without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns `not_connected` or `send_failed`.
    async fn post(&self, message: Message<Value>) -> Result<()>;

    /// Subscribes to inbound requests and notifications.
    fn subscribe(&self, handler: MessageHandler) -> Subscription;

    /// Registers an error handler.
    fn add_error_handler(&self, handler: ErrorHandler) -> ListenerId;

    /// Removes an error handler. Returns `false` if it was not registered.
    fn remove_error_handler(&self, id: ListenerId) -> bool;

    /// Returns `true` while connected.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the current state.
    fn state(&self) -> ConnectionState;
}

// ============================================================================
// TransportExt
// ============================================================================

/// Serde-typed helpers over any [`Transport`].
#[async_trait]
pub trait TransportExt: Transport {
    /// Sends a typed payload and decodes the typed reply.
    ///
    /// # Errors
    ///
    /// Any [`Transport::send`] error, or `invalid_message` if either
    /// payload fails to (de)serialize.
    async fn send_typed<T, R>(&self, message: Message<T>) -> Result<Message<R>>
    where
        T: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let reply = self.send(message.into_untyped()?).await?;
        reply.into_typed()
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

// ============================================================================
// Tests
// ============================================================================
