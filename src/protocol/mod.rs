//! Wire-level message types and validation.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | dApp → Wallet | Call expecting a reply |
//! | `Response` | Wallet → dApp | Successful reply |
//! | `Error` | Wallet → dApp | Failed reply |
//! | `Notification` | Either | Fire-and-forget |
//!
//! Window and extension transports carry [`Message`] objects as-is.
//! The JSON-RPC transport maps them through [`jsonrpc`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | [`Message`] envelope and [`MessageType`] |
//! | `validator` | Structural and payload checks |
//! | `jsonrpc` | JSON-RPC 2.0 envelope mapping |

// ============================================================================
// Submodules
// ============================================================================

/// JSON-RPC 2.0 envelope mapping.
pub mod jsonrpc;

/// Message envelope types.
pub mod message;

/// Structural and payload validation.
pub mod validator;

// ============================================================================
// Re-exports
// ============================================================================

pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcMessage, from_json_rpc, to_json_rpc, validate_json_rpc,
};
pub use message::{Message, MessageType, now_millis};
pub use validator::{
    ValidationResult, validate_message, validate_message_structure, validate_payload,
};
