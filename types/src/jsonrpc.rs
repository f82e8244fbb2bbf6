//! JSON-RPC 2.0 envelope types and message classification.
//!
//! The transport never interprets method payloads; it only needs to know
//! whether an incoming body is a request, a notification or a response,
//! because that decides the HTTP response shape. Classification inspects
//! field presence in a fixed priority order (request, notification,
//! response) and degrades to "invalid" instead of failing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// JSON-RPC 2.0 request (has both `method` and `id`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 notification (has `method` but no `id`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcNotification {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response (has `result` or `error`, no `method`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A classified JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// Classify a decoded JSON value into one of the three envelope shapes.
    ///
    /// Priority order: request (method + id), notification (method without
    /// id), response (result or error without method). Anything else yields
    /// `None`.
    pub fn classify(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.contains_key("method") {
            if obj.contains_key("id") {
                serde_json::from_value(value.clone()).ok().map(Self::Request)
            } else {
                serde_json::from_value(value.clone())
                    .ok()
                    .map(Self::Notification)
            }
        } else if obj.contains_key("result") || obj.contains_key("error") {
            serde_json::from_value(value.clone())
                .ok()
                .map(Self::Response)
        } else {
            None
        }
    }

    /// Serialize back to a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Request(m) => serde_json::to_value(m).unwrap_or(Value::Null),
            Self::Notification(m) => serde_json::to_value(m).unwrap_or(Value::Null),
            Self::Response(m) => serde_json::to_value(m).unwrap_or(Value::Null),
        }
    }
}

/// Result of classifying a POST body (single object or batch array).
///
/// The flags exist so the HTTP layer can pick a response shape without
/// re-parsing the body. Note that `all_notifications`/`all_responses` are
/// vacuously true for an empty set, matching the behavior clients already
/// depend on: a body with no valid messages is acknowledged, not rejected.
#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    /// Messages in original order, invalid items dropped.
    pub messages: Vec<JsonRpcMessage>,
    /// Number of items that matched no envelope shape.
    pub invalid: usize,
    /// Whether the body was a JSON array.
    pub is_batch: bool,
}

impl ClassifiedBatch {
    /// Classify a POST body. Never fails; malformed items are counted.
    pub fn classify(body: &Value) -> Self {
        let mut out = Self::default();
        match body {
            Value::Array(items) => {
                out.is_batch = true;
                for item in items {
                    match JsonRpcMessage::classify(item) {
                        Some(message) => out.messages.push(message),
                        None => out.invalid += 1,
                    }
                }
            }
            other => match JsonRpcMessage::classify(other) {
                Some(message) => out.messages.push(message),
                None => out.invalid += 1,
            },
        }
        out
    }

    /// At least one message is a request.
    pub fn has_request(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m, JsonRpcMessage::Request(_)))
    }

    /// Every message is a notification (vacuously true when empty).
    pub fn all_notifications(&self) -> bool {
        self.messages
            .iter()
            .all(|m| matches!(m, JsonRpcMessage::Notification(_)))
    }

    /// Every message is a response (vacuously true when empty).
    pub fn all_responses(&self) -> bool {
        self.messages
            .iter()
            .all(|m| matches!(m, JsonRpcMessage::Response(_)))
    }
}

/// Whether a POST body is a single `initialize` request.
///
/// Batched initialize is deliberately not recognized; session minting only
/// applies to the single-object form.
pub fn is_initialize_request(body: &Value) -> bool {
    body.as_object()
        .and_then(|obj| obj.get("method"))
        .and_then(Value::as_str)
        == Some("initialize")
}
