//! The JSON-RPC 2.0 message model the Message Router dispatches on.
//!
//! Messages are parsed once at the edge into a tagged [`RpcMessage`] and
//! dispatched by variant from then on rather than re-inspecting raw
//! `serde_json::Value` shapes throughout the router. This gateway is a
//! transparent pipe, so the variant carries untyped `serde_json::Value`
//! bodies rather than a typed LSP method table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON-RPC 2.0 version string every message on the wire must carry.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code used for the in-band response synthesized when forwarding a
/// client request to the language server fails.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// A decoded JSON-RPC message, classified by which of `method`/`id`/
/// `result`/`error` it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// Has `method` and a non-null `id`.
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    /// Has `method` and no `id` (or a null one).
    Notification { method: String, params: Option<Value> },
    /// Has a non-null `id` and either `result` or `error`, no `method`.
    Response { id: Value, outcome: Outcome },
}

/// The payload of a [`RpcMessage::Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Value),
    Err(RpcError),
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcMessage {
    /// Classify a decoded JSON value. Returns `None` when the value is not a
    /// JSON object or matches none of the three shapes, in which case the
    /// caller logs and drops it.
    pub fn classify(value: &Value) -> Option<RpcMessage> {
        let obj = value.as_object()?;
        let id = obj.get("id").filter(|v| !v.is_null()).cloned();

        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            let params = obj.get("params").cloned();
            return Some(match id {
                Some(id) => RpcMessage::Request {
                    id,
                    method: method.to_string(),
                    params,
                },
                None => RpcMessage::Notification {
                    method: method.to_string(),
                    params,
                },
            });
        }

        let id = id?;
        if let Some(result) = obj.get("result") {
            return Some(RpcMessage::Response {
                id,
                outcome: Outcome::Ok(result.clone()),
            });
        }
        if let Some(error) = obj.get("error") {
            let err = serde_json::from_value(error.clone()).ok()?;
            return Some(RpcMessage::Response {
                id,
                outcome: Outcome::Err(err),
            });
        }

        None
    }
}

/// Build a `result: null` reply for a server-issued request: the gateway
/// implements no client capabilities of its own.
pub fn null_result_response(id: Value) -> Value {
    serde_json::json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": Value::Null })
}

/// Build the in-band error response synthesized when forwarding a client
/// request to the language server fails.
pub fn internal_error_response(id: Value, cause: impl std::fmt::Display) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": INTERNAL_ERROR_CODE, "message": cause.to_string() },
    })
}
