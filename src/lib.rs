//! Wallet Transport - dApp to wallet request/response plumbing.
//!
//! This library turns one-way, unordered message channels (popup and
//! iframe `postMessage`, extension runtime ports, WebSocket frames) into
//! an async RPC abstraction with timeouts, structural validation, and a
//! uniform error and state model.
//!
//! # Architecture
//!
//! Every transport shares one core and differs only in its channel:
//!
//! - **Base transport**: connection state machine, error handlers,
//!   subscribers, and the pending-request correlation table
//! - **Channel**: opens, closes, and posts over one medium
//! - **Providers**: capability traits for the browser surfaces a channel
//!   needs ([`WindowProvider`], [`RuntimeProvider`])
//!
//! Key design principles:
//!
//! - Each request registers before it is posted, so fast replies settle
//! - Every failure reaches the caller as a [`TransportError`] and is
//!   mirrored to registered error handlers
//! - Inbound data is validated before it is routed
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use wallet_transport::{
//!     JsonRpcTransport, Message, Result, Transport, TransportError, TransportOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Deliver outbound JSON-RPC objects however the wallet expects
//!     let transport = JsonRpcTransport::from_fn(
//!         |rpc| async move {
//!             println!("{}", serde_json::to_string(&rpc)?);
//!             Ok::<_, TransportError>(())
//!         },
//!         TransportOptions::new(),
//!     );
//!     transport.connect().await?;
//!
//!     // Feed inbound JSON-RPC objects back with `handle_message`
//!     let reply = transport
//!         .send(Message::request(json!({ "method": "eth_chainId", "params": [] })))
//!         .await?;
//!     println!("chain: {}", reply.payload);
//!
//!     transport.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error taxonomy and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Message model, validation, JSON-RPC mapping |
//! | [`transport`] | Base transport, correlation, concrete transports |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// Transport operations return [`Result<T>`] which uses [`TransportError`].
pub mod error;

/// Type-safe identifiers for messages and listeners.
pub mod identifiers;

/// Message model and validation.
///
/// Pure functions; nothing here performs I/O.
pub mod protocol;

/// Transport layer.
///
/// [`BaseTransport`] plus the window, extension, and JSON-RPC channels.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{
    ProtocolError, ProtocolErrorCode, Result, TransportError, TransportErrorCode,
};

// Identifier types
pub use identifiers::{ListenerId, MessageId};

// Protocol types
pub use protocol::{
    JsonRpcError, JsonRpcMessage, Message, MessageType, ValidationResult, from_json_rpc,
    to_json_rpc, validate_json_rpc, validate_message, validate_message_structure,
    validate_payload,
};

// Transport types
pub use transport::{
    BaseTransport, Channel, ConnectionState, ErrorHandler, ExtensionOptions, ExtensionTransport,
    InboundSink, JsonRpcTransport, MessageEvent, MessageHandler, PopupFeatures, PortError,
    RuntimePort, RuntimeProvider, Subscription, Transport, TransportExt, TransportOptions,
    WebSocketLink, WindowError, WindowHandle, WindowOptions, WindowProvider, WindowTransport,
};
