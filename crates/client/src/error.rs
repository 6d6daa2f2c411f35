// Client-side error taxonomy.

use plaidcloud_rpc_common::path::MethodPathError;
use plaidcloud_rpc_common::protocol::jsonrpc::{Response, RpcError};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an application error.
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// The server answered with a non-fatal warning (code `-1000`).
    #[error("warning: {0}")]
    Warning(String),

    /// Non-retryable (or retry-exhausted) HTTP status. `error` carries the
    /// server's reported error object when the body was an error envelope.
    #[error(
        "http status {status}{}",
        .error.as_ref().map(|e| format!(": {}", e.message)).unwrap_or_default()
    )]
    Http { status: u16, error: Option<RpcError> },

    /// The request never reached the server.
    #[error("connection failed: {0}")]
    Connection(#[source] reqwest::Error),

    /// `check_allow_transmit` turned false while the call was being retried.
    #[error("transmission disallowed after {attempts} attempt(s); call aborted")]
    TransmitDisallowed { attempts: u32 },

    /// Call params did not serialize to a JSON object.
    #[error("invalid call params: {0}")]
    InvalidParams(String),

    /// The proxy path names no method; nothing was sent.
    #[error("invalid method path `{path}`: {source}")]
    InvalidMethodPath { path: String, source: MethodPathError },

    /// The server reply was not a response envelope.
    #[error("failed to decode rpc response: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// The structured error object, when the server supplied one.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(error) => Some(error),
            Self::Http { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Warning(_))
    }
}

impl From<RpcError> for ClientError {
    fn from(error: RpcError) -> Self {
        if error.is_warning() {
            Self::Warning(error.message)
        } else {
            Self::Rpc(error)
        }
    }
}

/// Turn a decoded response envelope into the call's outcome.
pub fn decode_response(response: Response) -> Result<Option<Value>, ClientError> {
    response.into_result().map(Some).map_err(ClientError::from)
}
