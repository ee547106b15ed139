//! Error types for the wallet transport core.
//!
//! Two disjoint families are defined here:
//!
//! | Family | Raised by | Codes |
//! |--------|-----------|-------|
//! | [`ProtocolError`] | Validator, JSON-RPC mapper | [`ProtocolErrorCode`] |
//! | [`TransportError`] | Transports, correlation engine | [`TransportErrorCode`] |
//!
//! Both render as `"<Name>[<code>]: <message>[: <json-details>]"`:
//!
//! ```
//! use serde_json::json;
//! use wallet_transport::TransportError;
//!
//! let err = TransportError::timeout("Request timed out").with_details(json!({"id": "1"}));
//! assert_eq!(err.to_string(), r#"TransportError[timeout]: Request timed out: {"id":"1"}"#);
//! ```
//!
//! Callers branch on [`TransportError::code`], never on message text.

// ============================================================================
// Imports
// ============================================================================

use std::error::Error as StdError;
use std::fmt;
use std::result::Result as StdResult;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using [`TransportError`].
///
/// Every transport operation returns this type.
pub type Result<T> = StdResult<T, TransportError>;

/// Shared, cloneable error cause.
pub type Cause = Arc<dyn StdError + Send + Sync>;

// ============================================================================
// Rendering
// ============================================================================

/// Renders the optional `": <json>"` suffix.
fn render_details(details: &Option<Value>) -> String {
    match details {
        Some(value) => match serde_json::to_string(value) {
            Ok(json) => format!(": {json}"),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}

// ============================================================================
// ProtocolErrorCode
// ============================================================================

/// Closed set of protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorCode {
    /// Generic validation failure.
    ValidationFailed,
    /// Value has the wrong overall shape.
    InvalidFormat,
    /// `type` is not a known message kind.
    UnknownMessageType,
    /// A required envelope field is absent.
    MissingRequiredField,
    /// Payload does not match the protocol shape.
    InvalidPayload,
}

impl ProtocolErrorCode {
    /// Returns the stable wire string for this code.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::InvalidFormat => "invalid_format",
            Self::UnknownMessageType => "unknown_message_type",
            Self::MissingRequiredField => "missing_required_field",
            Self::InvalidPayload => "invalid_payload",
        }
    }
}

impl fmt::Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ProtocolError
// ============================================================================

/// A message or payload failed structural validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("ProtocolError[{code}]: {message}{}", render_details(.details))]
pub struct ProtocolError {
    /// Stable error code.
    pub code: ProtocolErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context.
    pub details: Option<Value>,
}

impl ProtocolError {
    /// Creates a protocol error with an explicit code.
    #[inline]
    pub fn new(code: ProtocolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches structured details.
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Creates a `validation_failed` error.
    #[inline]
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::ValidationFailed, message)
    }

    /// Creates an `invalid_format` error.
    #[inline]
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::InvalidFormat, message)
    }

    /// Creates an `unknown_message_type` error.
    #[inline]
    pub fn unknown_message_type(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::UnknownMessageType, message)
    }

    /// Creates a `missing_required_field` error.
    #[inline]
    pub fn missing_required_field(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::MissingRequiredField, message)
    }

    /// Creates an `invalid_payload` error.
    #[inline]
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ProtocolErrorCode::InvalidPayload, message)
    }
}

// ============================================================================
// TransportErrorCode
// ============================================================================

/// Closed set of transport error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorCode {
    /// Generic transport failure (also used for configuration errors).
    TransportError,
    /// Connecting failed or an established connection was lost.
    ConnectionFailed,
    /// Operation requires a connected transport.
    NotConnected,
    /// Outbound message could not be handed to the channel.
    SendFailed,
    /// Remote endpoint answered with an error message.
    ProtocolError,
    /// No response within the configured window.
    Timeout,
    /// Message rejected before correlation.
    InvalidMessage,
}

impl TransportErrorCode {
    /// Returns the stable wire string for this code.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::ConnectionFailed => "connection_failed",
            Self::NotConnected => "not_connected",
            Self::SendFailed => "send_failed",
            Self::ProtocolError => "protocol_error",
            Self::Timeout => "timeout",
            Self::InvalidMessage => "invalid_message",
        }
    }
}

impl fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// A channel or lifecycle failure.
///
/// Cloneable so one failure can be handed to the caller and to every
/// registered error handler.
#[derive(Error, Debug, Clone)]
#[error("TransportError[{code}]: {message}{}", render_details(.details))]
pub struct TransportError {
    /// Stable error code.
    pub code: TransportErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context.
    pub details: Option<Value>,
    /// Underlying failure, if any.
    #[source]
    pub cause: Option<Cause>,
}

impl TransportError {
    /// Creates a transport error with an explicit code.
    #[inline]
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Attaches structured details.
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches the underlying cause.
    #[inline]
    #[must_use]
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Creates a `transport_error` error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::TransportError, message)
    }

    /// Creates a `connection_failed` error.
    #[inline]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::ConnectionFailed, message)
    }

    /// Creates the `connection_failed` error used when a transport disconnects.
    #[inline]
    pub fn disconnected() -> Self {
        Self::connection_failed("Transport disconnected")
    }

    /// Creates a `not_connected` error.
    #[inline]
    pub fn not_connected() -> Self {
        Self::new(TransportErrorCode::NotConnected, "Transport is not connected")
    }

    /// Creates a `send_failed` error.
    #[inline]
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::SendFailed, message)
    }

    /// Creates a `protocol_error` error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::ProtocolError, message)
    }

    /// Creates a `timeout` error.
    #[inline]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::Timeout, message)
    }

    /// Creates an `invalid_message` error.
    #[inline]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::new(TransportErrorCode::InvalidMessage, message)
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        let mut details = match &err.details {
            Some(Value::Object(fields)) => fields.clone(),
            Some(other) => {
                let mut fields = serde_json::Map::new();
                fields.insert("details".into(), other.clone());
                fields
            }
            None => serde_json::Map::new(),
        };
        details.insert("protocolCode".into(), Value::from(err.code.as_str()));

        Self::invalid_message(err.message.clone())
            .with_details(Value::Object(details))
            .with_cause(err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_message(format!("JSON error: {err}")).with_cause(err)
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl TransportError {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.code == TransportErrorCode::Timeout
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code,
            TransportErrorCode::ConnectionFailed | TransportErrorCode::NotConnected
        )
    }

    /// Returns `true` if the caller may retry `connect()`/`send()`.
    ///
    /// Connection failures carrying a cross-origin cause are fatal for
    /// that attempt.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self.code {
            TransportErrorCode::Timeout | TransportErrorCode::NotConnected => true,
            TransportErrorCode::ConnectionFailed => !self.is_security_error(),
            _ => false,
        }
    }

    /// Returns `true` if the cause chain contains a cross-origin failure.
    #[must_use]
    pub fn is_security_error(&self) -> bool {
        let Some(cause) = self.cause.as_deref() else {
            return false;
        };
        if let Some(window) = cause.downcast_ref::<crate::transport::WindowError>() {
            return window.is_cross_origin();
        }
        if let Some(inner) = cause.downcast_ref::<TransportError>() {
            return inner.is_security_error();
        }
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
