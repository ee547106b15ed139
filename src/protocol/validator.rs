//! Structural and payload validation.
//!
//! Validation runs in two stages so protocols can swap the payload shape
//! while reusing the envelope check:
//!
//! 1. [`validate_message_structure`] - the four envelope fields
//! 2. [`validate_payload`] - the `request`/`response` payload shape
//!
//! [`validate_message`] composes both and stops at the first failure.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use serde_json::{Map, Value, json};

use crate::error::ProtocolError;
use crate::identifiers::MessageId;

use super::message::{Message, MessageType};

// ============================================================================
// Types
// ============================================================================

/// Result of a validation step.
pub type ValidationResult<T> = StdResult<T, ProtocolError>;

/// Envelope fields every message must carry.
const REQUIRED_FIELDS: [&str; 3] = ["type", "id", "payload"];

// ============================================================================
// Structure
// ============================================================================

/// Checks that `value` is a well-formed [`Message`] envelope.
///
/// # Errors
///
/// - `invalid_format` if `value` is not an object, or `id`/`type` are not strings
/// - `missing_required_field` if `type`, `id`, `payload`, or a numeric
///   `timestamp` is absent
/// - `unknown_message_type` if `type` names no known kind
pub fn validate_message_structure(value: Value) -> ValidationResult<Message<Value>> {
    let Value::Object(mut map) = value else {
        return Err(ProtocolError::invalid_format("Message must be an object"));
    };

    for field in REQUIRED_FIELDS {
        if !map.contains_key(field) {
            return Err(missing(field));
        }
    }

    let timestamp = map
        .get("timestamp")
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("timestamp"))?;

    let id = match map.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => MessageId::from(id),
        Some(Value::String(_)) => return Err(missing("id")),
        _ => return Err(ProtocolError::invalid_format("Message id must be a string")),
    };

    let message_type = match map.get("type") {
        Some(Value::String(kind)) => kind.parse::<MessageType>()?,
        _ => return Err(ProtocolError::invalid_format("Message type must be a string")),
    };

    let payload = map.remove("payload").unwrap_or(Value::Null);

    Ok(Message {
        id,
        message_type,
        payload,
        timestamp,
    })
}

fn missing(field: &str) -> ProtocolError {
    ProtocolError::missing_required_field(format!("Missing required field: {field}"))
        .with_details(json!({ "field": field }))
}

// ============================================================================
// Payload
// ============================================================================

/// Checks the protocol payload shape.
///
/// A `request` field, when present or required, must carry a non-empty
/// `method` string and object/array `params`. A `response` field, when
/// present, must be an object carrying at most one of `result`/`error`.
///
/// # Errors
///
/// Returns `invalid_payload` on any shape violation.
pub fn validate_payload(payload: &Value, require_request: bool) -> ValidationResult<()> {
    let Some(object) = payload.as_object() else {
        return Err(ProtocolError::invalid_payload("Payload must be an object"));
    };

    match object.get("request") {
        Some(request) => validate_request(request)?,
        None if require_request => {
            return Err(ProtocolError::invalid_payload("Payload is missing a request"));
        }
        None => {}
    }

    if let Some(response) = object.get("response") {
        validate_response(response)?;
    }

    Ok(())
}

fn validate_request(request: &Value) -> ValidationResult<()> {
    let Some(request) = request.as_object() else {
        return Err(ProtocolError::invalid_payload("Request must be an object"));
    };

    match request.get("method") {
        Some(Value::String(method)) if !method.is_empty() => {}
        _ => {
            return Err(ProtocolError::invalid_payload(
                "Request method must be a non-empty string",
            ));
        }
    }

    match request.get("params") {
        Some(Value::Object(_) | Value::Array(_)) => Ok(()),
        _ => Err(ProtocolError::invalid_payload("Request params must be an object")),
    }
}

fn validate_response(response: &Value) -> ValidationResult<()> {
    let Some(response) = response.as_object() else {
        return Err(ProtocolError::invalid_payload("Response must be an object"));
    };

    if has_both(response, "result", "error") {
        return Err(
            ProtocolError::invalid_payload("Response cannot carry both result and error")
                .with_details(json!({ "fields": ["result", "error"] })),
        );
    }

    Ok(())
}

fn has_both(object: &Map<String, Value>, a: &str, b: &str) -> bool {
    object.contains_key(a) && object.contains_key(b)
}

// ============================================================================
// Composition
// ============================================================================

/// Validates structure, then payload.
///
/// Only [`MessageType::Request`] messages must carry a `request` payload.
///
/// # Errors
///
/// Returns the first [`ProtocolError`] encountered.
pub fn validate_message(value: Value) -> ValidationResult<Message<Value>> {
    let message = validate_message_structure(value)?;
    let require_request = message.message_type == MessageType::Request;
    validate_payload(&message.payload, require_request)?;
    Ok(message)
}

// ============================================================================
// Tests
// ============================================================================
