//! JSON-RPC 2.0 envelope mapping.
//!
//! | [`MessageType`] | JSON-RPC object |
//! |-----------------|-----------------|
//! | `Request` | `{jsonrpc, id, method: "request", params: payload}` |
//! | `Notification` | `{jsonrpc, id, method: "notification", params: payload}` |
//! | `Response` | `{jsonrpc, id, result: payload}` |
//! | `Error` | `{jsonrpc, id, error: {code, message, data}}` |
//!
//! Parsing is the inverse with one asymmetry: a `method` string always
//! yields a Request, even when `result`/`error` are also present.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::ProtocolError;
use crate::identifiers::MessageId;

use super::message::{Message, MessageType, now_millis};
use super::validator::ValidationResult;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version marker.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error; also the default when a payload carries no code.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ============================================================================
// JsonRpcError
// ============================================================================

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Additional data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Builds an error object from an Error message payload.
    ///
    /// Missing `code` defaults to [`codes::INTERNAL_ERROR`], missing
    /// `message` to `"Unknown error"`. A bare string payload becomes the
    /// message.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        if let Some(message) = payload.as_str() {
            return Self {
                code: codes::INTERNAL_ERROR,
                message: message.to_string(),
                data: None,
            };
        }

        Self {
            code: payload
                .get("code")
                .and_then(Value::as_i64)
                .unwrap_or(codes::INTERNAL_ERROR),
            message: payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
            data: payload.get("data").cloned(),
        }
    }

    /// Returns the error as an Error message payload.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({ "code": self.code, "message": self.message });
        if let Some(data) = &self.data {
            payload["data"] = data.clone();
        }
        payload
    }
}

// ============================================================================
// JsonRpcMessage
// ============================================================================

/// A JSON-RPC 2.0 request, response, or error object.
///
/// Deserialization runs [`validate_json_rpc`], so a parsed value always
/// carries exactly one of `method`, `result`, or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct JsonRpcMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// Correlation identifier.
    pub id: MessageId,

    /// Method name (requests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Method parameters (requests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Success value (responses). `Some(Value::Null)` serializes as `null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure description (error responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    fn empty(id: MessageId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    /// Creates a request object.
    #[must_use]
    pub fn request(id: impl Into<MessageId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty(id.into())
        }
    }

    /// Creates a success response object.
    #[must_use]
    pub fn result(id: impl Into<MessageId>, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::empty(id.into())
        }
    }

    /// Creates an error response object.
    #[must_use]
    pub fn error(id: impl Into<MessageId>, error: JsonRpcError) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(id.into())
        }
    }

    /// Returns `true` if a `method` is present.
    #[inline]
    #[must_use]
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }
}

impl TryFrom<Value> for JsonRpcMessage {
    type Error = ProtocolError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        validate_json_rpc(value)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validates an inbound JSON-RPC object.
///
/// Requires `jsonrpc: "2.0"`, a string or numeric `id` (numbers are
/// stringified), and exactly one of `method` (+ optional object/array
/// `params`), `result`, or a well-formed `error`.
///
/// # Errors
///
/// - `invalid_format` if `value` is not an object or the version is wrong
/// - `missing_required_field` if `id` is absent
/// - `invalid_payload` if the member combination is not exactly one
pub fn validate_json_rpc(value: Value) -> ValidationResult<JsonRpcMessage> {
    let Value::Object(mut map) = value else {
        return Err(ProtocolError::invalid_format("JSON-RPC message must be an object"));
    };

    match map.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => {
            return Err(ProtocolError::invalid_format("JSON-RPC version must be \"2.0\""));
        }
    }

    let id = match map.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => MessageId::from(id),
        Some(Value::Number(id)) => MessageId::from(id.to_string()),
        None | Some(Value::Null) => {
            return Err(ProtocolError::missing_required_field("Missing required field: id"));
        }
        Some(_) => return Err(ProtocolError::invalid_format("JSON-RPC id must be a string or number")),
    };

    let has_method = map.contains_key("method");
    let has_result = map.contains_key("result");
    let has_error = map.contains_key("error");
    let members = [has_method, has_result, has_error].iter().filter(|p| **p).count();
    if members != 1 {
        return Err(ProtocolError::invalid_payload(
            "JSON-RPC message must carry exactly one of method, result, or error",
        )
        .with_details(json!({ "id": id.as_str() })));
    }

    let mut message = JsonRpcMessage::empty(id);

    if has_method {
        let Some(Value::String(method)) = map.remove("method") else {
            return Err(ProtocolError::invalid_payload("JSON-RPC method must be a string"));
        };
        if method.is_empty() {
            return Err(ProtocolError::invalid_payload("JSON-RPC method must not be empty"));
        }
        let params = match map.remove("params") {
            None => None,
            Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
            Some(_) => {
                return Err(ProtocolError::invalid_payload(
                    "JSON-RPC params must be an object or array",
                ));
            }
        };
        message.method = Some(method);
        message.params = params;
    } else if has_result {
        message.result = map.remove("result");
    } else {
        message.error = Some(parse_error(map.remove("error"))?);
    }

    Ok(message)
}

fn parse_error(error: Option<Value>) -> ValidationResult<JsonRpcError> {
    let malformed = || ProtocolError::invalid_payload("JSON-RPC error must have a numeric code and string message");

    let Some(Value::Object(mut error)) = error else {
        return Err(malformed());
    };

    let code = error.get("code").and_then(Value::as_i64).ok_or_else(malformed)?;
    let message = match error.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err(malformed()),
    };

    Ok(JsonRpcError {
        code,
        message,
        data: error.remove("data"),
    })
}

// ============================================================================
// Mapping
// ============================================================================

/// Maps an internal message to its JSON-RPC object.
///
/// # Errors
///
/// Returns `invalid_payload` if a Request or Notification payload is not
/// an object or array, since JSON-RPC `params` cannot carry a scalar.
pub fn to_json_rpc(message: &Message<Value>) -> ValidationResult<JsonRpcMessage> {
    let id = message.id.clone();
    let rpc = match message.message_type {
        MessageType::Request | MessageType::Notification => {
            if !matches!(message.payload, Value::Object(_) | Value::Array(_)) {
                return Err(ProtocolError::invalid_payload(
                    "JSON-RPC params must be an object or array",
                )
                .with_details(json!({ "id": id.as_str() })));
            }
            JsonRpcMessage::request(id, message.message_type.as_str(), message.payload.clone())
        }
        MessageType::Response => JsonRpcMessage::result(id, message.payload.clone()),
        MessageType::Error => JsonRpcMessage::error(id, JsonRpcError::from_payload(&message.payload)),
    };
    Ok(rpc)
}

/// Maps a JSON-RPC object to an internal message stamped with the current time.
///
/// `method` wins over `error`, which wins over `result`.
///
/// # Errors
///
/// Returns `invalid_format` if none of the three members is present.
pub fn from_json_rpc(rpc: JsonRpcMessage) -> ValidationResult<Message<Value>> {
    let JsonRpcMessage {
        id,
        method,
        params,
        result,
        error,
        ..
    } = rpc;

    let (message_type, payload) = if method.is_some() {
        (MessageType::Request, params.unwrap_or_else(|| Value::Object(Map::new())))
    } else if let Some(error) = error {
        (MessageType::Error, error.to_payload())
    } else if let Some(result) = result {
        (MessageType::Response, result)
    } else {
        return Err(ProtocolError::invalid_format(
            "JSON-RPC message carries no method, result, or error",
        ));
    };

    Ok(Message {
        id,
        message_type,
        payload,
        timestamp: now_millis(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ProtocolErrorCode;

    #[test]
    fn test_request_mapping() {
        let message = Message::new("1", MessageType::Request, json!({"method": "test", "params": []}));
        let rpc = serde_json::to_value(to_json_rpc(&message).expect("map")).expect("serialize");
        assert_eq!(
            rpc,
            json!({
                "jsonrpc": "2.0",
                "id": "1",
                "method": "request",
                "params": {"method": "test", "params": []}
            })
        );
    }

    #[test]
    fn test_response_mapping_keeps_null_result() {
        let message = Message::response("2", Value::Null);
        let rpc = serde_json::to_value(to_json_rpc(&message).expect("map")).expect("serialize");
        assert_eq!(rpc, json!({"jsonrpc": "2.0", "id": "2", "result": null}));
    }

    #[test]
    fn test_error_mapping() {
        let message = Message::new(
            "3",
            MessageType::Error,
            json!({"code": 4001, "message": "User rejected", "data": {"reason": "denied"}}),
        );
        let rpc = serde_json::to_value(to_json_rpc(&message).expect("map")).expect("serialize");
        assert_eq!(
            rpc,
            json!({
                "jsonrpc": "2.0",
                "id": "3",
                "error": {"code": 4001, "message": "User rejected", "data": {"reason": "denied"}}
            })
        );
    }

    #[test]
    fn test_error_mapping_defaults() {
        let error = JsonRpcError::from_payload(&json!({}));
        assert_eq!(error.code, codes::INTERNAL_ERROR);
        assert_eq!(error.message, "Unknown error");
        assert_eq!(error.data, None);

        let error = JsonRpcError::from_payload(&json!("boom"));
        assert_eq!(error.message, "boom");
    }

    #[test]
    fn test_parse_result() {
        let rpc: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": "1", "result": {"ok": true}}))
                .expect("valid");
        let message = from_json_rpc(rpc).expect("map");
        assert_eq!(message.message_type, MessageType::Response);
        assert_eq!(message.payload, json!({"ok": true}));
    }

    #[test]
    fn test_parse_error() {
        let rpc = validate_json_rpc(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .expect("valid");
        assert_eq!(rpc.id.as_str(), "5");

        let message = from_json_rpc(rpc).expect("map");
        assert_eq!(message.message_type, MessageType::Error);
        assert_eq!(message.payload, json!({"code": -32601, "message": "Method not found"}));
    }

    #[test]
    fn test_method_presence_wins() {
        let rpc = JsonRpcMessage {
            result: Some(json!({"looks": "like a result"})),
            ..JsonRpcMessage::request("7", "eth_call", json!([]))
        };
        let message = from_json_rpc(rpc).expect("map");
        assert_eq!(message.message_type, MessageType::Request);
        assert_eq!(message.payload, json!([]));
    }

    #[test]
    fn test_error_wins_over_result() {
        let rpc = JsonRpcMessage {
            result: Some(json!(1)),
            ..JsonRpcMessage::error("8", JsonRpcError::from_payload(&json!({"code": 1, "message": "x"})))
        };
        let message = from_json_rpc(rpc).expect("map");
        assert_eq!(message.message_type, MessageType::Error);
    }

    #[test]
    fn test_validate_rejects_wrong_version() {
        let err = validate_json_rpc(json!({"jsonrpc": "1.0", "id": "1", "result": 1}))
            .expect_err("bad version");
        assert_eq!(err.code, ProtocolErrorCode::InvalidFormat);
    }

    #[test]
    fn test_validate_rejects_missing_id() {
        let err = validate_json_rpc(json!({"jsonrpc": "2.0", "result": 1})).expect_err("no id");
        assert_eq!(err.code, ProtocolErrorCode::MissingRequiredField);
    }

    #[test]
    fn test_validate_requires_exactly_one_member() {
        let cases = [
            json!({"jsonrpc": "2.0", "id": "1"}),
            json!({"jsonrpc": "2.0", "id": "1", "result": 1, "error": {"code": 1, "message": "x"}}),
            json!({"jsonrpc": "2.0", "id": "1", "method": "m", "result": 1}),
        ];
        for value in cases {
            let err = validate_json_rpc(value).expect_err("member combination");
            assert_eq!(err.code, ProtocolErrorCode::InvalidPayload);
        }
    }

    #[test]
    fn test_validate_rejects_malformed_error() {
        let cases = [
            json!({"jsonrpc": "2.0", "id": "1", "error": "boom"}),
            json!({"jsonrpc": "2.0", "id": "1", "error": {"message": "no code"}}),
            json!({"jsonrpc": "2.0", "id": "1", "error": {"code": 1}}),
        ];
        for value in cases {
            let err = validate_json_rpc(value).expect_err("malformed error");
            assert_eq!(err.code, ProtocolErrorCode::InvalidPayload);
        }
    }

    #[test]
    fn test_validate_rejects_scalar_params() {
        let err = validate_json_rpc(json!({"jsonrpc": "2.0", "id": "1", "method": "m", "params": 3}))
            .expect_err("scalar params");
        assert_eq!(err.code, ProtocolErrorCode::InvalidPayload);
    }

    #[test]
    fn test_notification_parses_back_as_request() {
        let message = Message::new("n1", MessageType::Notification, json!({"event": "accountsChanged"}));
        let rpc = to_json_rpc(&message).expect("map");
        assert_eq!(rpc.method.as_deref(), Some("notification"));
        let parsed = from_json_rpc(rpc).expect("map");
        assert_eq!(parsed.message_type, MessageType::Request);
    }

    #[test]
    fn test_scalar_request_payload_is_rejected() {
        for payload in [json!("eth_accounts"), Value::Null, json!(3)] {
            for kind in [MessageType::Request, MessageType::Notification] {
                let message = Message::new("s1", kind, payload.clone());
                let err = to_json_rpc(&message).expect_err("scalar params");
                assert_eq!(err.code, ProtocolErrorCode::InvalidPayload);
            }
        }

        let reply = Message::response("s2", json!("0x1"));
        assert!(to_json_rpc(&reply).is_ok());
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        fn arb_payload() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                "[a-z0-9_]{0,12}".prop_map(Value::from),
            ];
            leaf.prop_recursive(3, 16, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                    prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(|map| Value::Object(map.into_iter().collect())),
                ]
            })
        }

        fn arb_type() -> impl Strategy<Value = MessageType> {
            prop_oneof![
                Just(MessageType::Request),
                Just(MessageType::Notification),
                Just(MessageType::Response),
                Just(MessageType::Error),
            ]
        }

        proptest! {
            #[test]
            fn prop_mapped_messages_pass_validation(
                id in "[a-zA-Z0-9-]{1,16}",
                kind in arb_type(),
                payload in arb_payload(),
            ) {
                let message = Message::new(id.as_str(), kind, payload.clone());
                let Ok(rpc) = to_json_rpc(&message) else {
                    prop_assert!(matches!(kind, MessageType::Request | MessageType::Notification));
                    prop_assert!(!matches!(payload, Value::Object(_) | Value::Array(_)));
                    return Ok(());
                };

                let wire = serde_json::to_value(&rpc).expect("serialize");
                let parsed = validate_json_rpc(wire).expect("own output validates");
                let back = from_json_rpc(parsed).expect("map back");

                prop_assert_eq!(back.id.as_str(), id.as_str());
                match kind {
                    MessageType::Request | MessageType::Notification => {
                        prop_assert_eq!(back.message_type, MessageType::Request);
                        prop_assert_eq!(&back.payload, &payload);
                    }
                    MessageType::Response => {
                        prop_assert_eq!(back.message_type, MessageType::Response);
                        prop_assert_eq!(&back.payload, &payload);
                    }
                    MessageType::Error => prop_assert_eq!(back.message_type, MessageType::Error),
                }
            }
        }
    }
}
