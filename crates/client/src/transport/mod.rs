// Pluggable transports behind the method-path proxy.

pub mod http;

use futures_util::future::BoxFuture;
use plaidcloud_rpc_common::protocol::jsonrpc::Params;
use serde_json::Value;

use crate::error::ClientError;
use crate::gate::TransmitGate;

pub use http::HttpTransport;

/// One call as handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingCall {
    /// `/`-joined method path, e.g. `analyze/project/tables`.
    pub method_path: String,
    pub params: Params,
    /// Return as soon as the request is sent; the result is discarded.
    pub fire_and_forget: bool,
}

/// The `call_rpc(method_path, params, fire_and_forget)` hook.
///
/// Implementations make the call and return its result (`None` when there is
/// nothing to return, e.g. fire-and-forget). Anything that retries must
/// consult `gate` before each retry and stop with
/// [`ClientError::TransmitDisallowed`] once it closes.
pub trait Transport: Send + Sync {
    fn call_rpc<'a>(
        &'a self,
        call: OutgoingCall,
        gate: &'a TransmitGate,
    ) -> BoxFuture<'a, Result<Option<Value>, ClientError>>;
}
