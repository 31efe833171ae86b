//! JSON-RPC 2.0 wire types for the Streamable HTTP transport.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Header carrying the session id on every request after `initialize`.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the client's resumption marker on `GET`.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Protocol revision advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes, plus the ones this server adds.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A provider token (or the whole session) needs re-authorization.
    pub const REAUTH_REQUIRED: i64 = -32001;
    /// The requested session or replay position does not exist.
    pub const NOT_FOUND: i64 = -32002;
}

/// Methods the server answers.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const PROGRESS: &str = "notifications/progress";
}

/// An incoming message: request, notification, or a client-side response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcMessage {
    /// A request expects an answer.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }
}

/// Whether a raw payload is a response (`id` plus `result` or `error`).
#[must_use]
pub fn is_response_value(message: &Value) -> bool {
    message.get("id").is_some() && (message.get("result").is_some() || message.get("error").is_some())
}

/// Successful response payload.
#[must_use]
pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

/// Error response payload.
#[must_use]
pub fn error(id: Option<Value>, code: i64, message: impl Into<String>, data: Option<Value>) -> Value {
    let mut err = json!({ "code": code, "message": message.into() });
    if let Some(data) = data {
        err["data"] = data;
    }
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id.unwrap_or(Value::Null), "error": err })
}

/// Notification payload.
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}
