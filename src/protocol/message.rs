//! Wire envelope shared by every transport.
//!
//! # Format
//!
//! ```json
//! {
//!   "id": "uuid",
//!   "type": "request",
//!   "payload": { ... },
//!   "timestamp": 1700000000000
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::identifiers::MessageId;

// ============================================================================
// MessageType
// ============================================================================

/// Message kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Expects a correlated Response or Error.
    Request,
    /// Successful answer to a Request.
    Response,
    /// Failed answer to a Request.
    Error,
    /// Fire-and-forget message.
    Notification,
}

impl MessageType {
    /// Returns the wire string for this kind.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Error => "error",
            Self::Notification => "notification",
        }
    }

    /// Returns `true` for kinds that settle a pending request.
    #[inline]
    #[must_use]
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "error" => Ok(Self::Error),
            "notification" => Ok(Self::Notification),
            other => Err(ProtocolError::unknown_message_type(format!(
                "Unknown message type: {other}"
            ))),
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Milliseconds since the Unix epoch.
///
/// Informative only; not ordered across transports.
#[must_use]
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or_default()
}

// ============================================================================
// Message
// ============================================================================

/// Transport envelope carrying an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<T = Value> {
    /// Correlation identifier.
    pub id: MessageId,

    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Opaque payload.
    pub payload: T,

    /// Sender clock reading in milliseconds.
    pub timestamp: f64,
}

impl<T> Message<T> {
    /// Creates a message stamped with the current time.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<MessageId>, message_type: MessageType, payload: T) -> Self {
        Self {
            id: id.into(),
            message_type,
            payload,
            timestamp: now_millis(),
        }
    }

    /// Creates a request with a generated ID.
    #[inline]
    #[must_use]
    pub fn request(payload: T) -> Self {
        Self::new(MessageId::generate(), MessageType::Request, payload)
    }

    /// Creates a notification with a generated ID.
    #[inline]
    #[must_use]
    pub fn notification(payload: T) -> Self {
        Self::new(MessageId::generate(), MessageType::Notification, payload)
    }

    /// Creates a response correlated to `id`.
    #[inline]
    #[must_use]
    pub fn response(id: impl Into<MessageId>, payload: T) -> Self {
        Self::new(id, MessageType::Response, payload)
    }

    /// Overrides the timestamp.
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replaces the payload, keeping id, type, and timestamp.
    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            id: self.id,
            message_type: self.message_type,
            payload: f(self.payload),
            timestamp: self.timestamp,
        }
    }
}

impl Message<Value> {
    /// Creates an error reply correlated to `id`.
    #[inline]
    #[must_use]
    pub fn error(id: impl Into<MessageId>, code: i64, message: impl Into<String>) -> Self {
        Self::new(
            id,
            MessageType::Error,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    /// Decodes the payload into a typed message.
    ///
    /// # Errors
    ///
    /// Returns `invalid_message` if the payload does not deserialize.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Message<T>> {
        let Self {
            id,
            message_type,
            payload,
            timestamp,
        } = self;
        let payload = serde_json::from_value(payload)?;
        Ok(Message {
            id,
            message_type,
            payload,
            timestamp,
        })
    }
}

impl<T: Serialize> Message<T> {
    /// Encodes the payload as an opaque JSON value.
    ///
    /// # Errors
    ///
    /// Returns `invalid_message` if the payload does not serialize.
    pub fn into_untyped(self) -> Result<Message<Value>> {
        let Self {
            id,
            message_type,
            payload,
            timestamp,
        } = self;
        let payload = serde_json::to_value(payload)?;
        Ok(Message {
            id,
            message_type,
            payload,
            timestamp,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
