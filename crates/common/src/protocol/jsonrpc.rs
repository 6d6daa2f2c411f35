// JSON-RPC 2.0 request/response envelopes for the PlaidCloud RPC protocol.
//
// Responses carry an `ok` flag next to `result` / `error`, which is the
// PlaidCloud flavour of the standard envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Handler namespace version used when a transport does not pick one.
pub const DEFAULT_RPC_VERSION: u32 = 1;

/// Keyword parameters of a call.
pub type Params = Map<String, Value>;

/// A JSON-RPC 2.0 request.
///
/// `id` may be any JSON value; absent or null marks a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Params,
}

/// A response envelope. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(default)]
    pub id: Value,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Non-fatal, caller-visible warning. Clients surface it as a soft failure.
pub const WARNING_CODE: i64 = -1000;

impl Request {
    pub fn new(method: impl Into<String>, params: Params, id: Option<Value>) -> Self {
        Self { id, jsonrpc: JSONRPC_VERSION.to_string(), method: method.into(), params }
    }

    /// A one-way request; the server sends nothing back.
    pub fn notification(method: impl Into<String>, params: Params) -> Self {
        Self::new(method, params, None)
    }

    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self { id, ok: true, result: Some(result), error: None }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self { id, ok: false, result: None, error: Some(error) }
    }

    /// Collapse into a `Result`. A successful response whose `result` was
    /// null decodes as `Value::Null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        if self.ok {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        Err(self.error.unwrap_or_else(|| {
            RpcError::new(INTERNAL_ERROR, "Response marked as failed without an error object")
        }))
    }
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: Value::Null }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(WARNING_CODE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn is_warning(&self) -> bool {
        self.code == WARNING_CODE
    }
}
