// What a handler sees and returns: call context, output, errors, stream sink.

use std::fmt;

use futures_util::stream::{BoxStream, Stream, StreamExt};
use plaidcloud_rpc_common::protocol::jsonrpc::{Params, RpcError};
use plaidcloud_rpc_common::types::{AuthIdentity, AUTH_ID_PARAM};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Keyword arguments of one invocation.
pub type Kwargs = Params;

/// Failure classes a handler can report. The dispatcher turns each into a
/// wire error (or, for `Timeout`, hands it back to the transport).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Expected error with an explicit code/message/data; sent as is.
    #[error("{0}")]
    Rpc(RpcError),

    #[error("not implemented")]
    NotImplemented,

    /// Non-fatal condition the caller should see as a warning.
    #[error("warning: {0}")]
    Warning(String),

    #[error("handler timed out")]
    Timeout,

    /// The supplied keywords do not fit the handler's parameters.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Anything unexpected. Detail is logged, never sent.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc(RpcError::new(code, message))
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }
}

impl From<RpcError> for HandlerError {
    fn from(error: RpcError) -> Self {
        Self::Rpc(error)
    }
}

/// Lazily produced response chunks, written and flushed one at a time.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, HandlerError>>;

pub enum HandlerOutput {
    Value(Value),
    Chunks(ChunkStream),
}

impl HandlerOutput {
    pub fn chunks<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>, HandlerError>> + Send + 'static,
    {
        Self::Chunks(stream.boxed())
    }

    /// The JSON value, if this is not a chunk stream.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Chunks(_) => None,
        }
    }
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Chunks(_) => f.write_str("Chunks(..)"),
        }
    }
}

/// Transport-backed sink a streamed handler pushes raw chunks into.
#[derive(Debug, Clone)]
pub struct StreamSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl StreamSink {
    /// A sink plus the receiving end the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, chunk: impl Into<Vec<u8>>) -> Result<(), HandlerError> {
        self.tx.send(chunk.into()).await.map_err(|_| sink_closed())
    }

    /// `send` for `.blocking(..)` handlers. Panics if called from async code.
    pub fn blocking_send(&self, chunk: impl Into<Vec<u8>>) -> Result<(), HandlerError> {
        self.tx.blocking_send(chunk.into()).map_err(|_| sink_closed())
    }
}

fn sink_closed() -> HandlerError {
    HandlerError::Other(anyhow::anyhow!("stream sink closed by transport"))
}

/// Everything one invocation gets: the method, the caller and its keywords.
///
/// `params` always carries the caller identity under `auth_id`.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: String,
    auth: AuthIdentity,
    params: Kwargs,
    stream_sink: Option<StreamSink>,
}

impl CallContext {
    pub fn new(method: impl Into<String>, auth: AuthIdentity, mut params: Kwargs) -> Self {
        params.insert(AUTH_ID_PARAM.to_string(), auth_value(&auth));
        Self { method: method.into(), auth, params, stream_sink: None }
    }

    pub fn with_stream_sink(mut self, sink: Option<StreamSink>) -> Self {
        self.stream_sink = sink;
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn auth(&self) -> &AuthIdentity {
        &self.auth
    }

    pub fn params(&self) -> &Kwargs {
        &self.params
    }

    /// Rewrite the keywords in place; `auth_id` is restored afterwards.
    pub(crate) fn map_params<F>(&mut self, rewrite: F)
    where
        F: FnOnce(Kwargs) -> Kwargs,
    {
        let params = std::mem::take(&mut self.params);
        self.params = rewrite(params);
        self.params.insert(AUTH_ID_PARAM.to_string(), auth_value(&self.auth));
    }

    /// Sink for streamed handlers, when the transport supplied one.
    pub fn stream_sink(&self) -> Option<&StreamSink> {
        self.stream_sink.as_ref()
    }

    /// A required keyword, decoded.
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> Result<T, HandlerError> {
        self.optional_param(name)?
            .ok_or_else(|| HandlerError::InvalidArguments(format!("missing `{name}`")))
    }

    /// An optional keyword; absent and null both read as `None`.
    pub fn optional_param<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, HandlerError> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|error| HandlerError::InvalidArguments(format!("`{name}`: {error}"))),
        }
    }

    /// Decode all caller keywords (without `auth_id`) into one struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let mut params = self.params.clone();
        params.remove(AUTH_ID_PARAM);
        serde_json::from_value(Value::Object(params))
            .map_err(|error| HandlerError::InvalidArguments(error.to_string()))
    }
}

fn auth_value(auth: &AuthIdentity) -> Value {
    serde_json::to_value(auth).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn context(params: Value) -> CallContext {
        let Value::Object(params) = params else { panic!("params must be an object") };
        CallContext::new("a/b", AuthIdentity::new(Some("1".into()), None, ["x.y.read"]), params)
    }

    #[test]
    fn auth_id_is_always_injected() {
        let ctx = context(json!({ "auth_id": "forged", "n": 1 }));
        assert_eq!(ctx.params()["auth_id"]["workspace"], "1");
        assert_eq!(ctx.auth().workspace.as_deref(), Some("1"));
    }

    #[test]
    fn missing_required_param_is_invalid_arguments() {
        let ctx = context(json!({}));
        assert!(matches!(ctx.param::<u32>("n"), Err(HandlerError::InvalidArguments(_))));
        assert_eq!(ctx.optional_param::<u32>("n").unwrap(), None);
    }

    #[test]
    fn mistyped_param_is_invalid_arguments() {
        let ctx = context(json!({ "n": "seven" }));
        assert!(matches!(ctx.param::<u32>("n"), Err(HandlerError::InvalidArguments(_))));
    }

    #[test]
    fn decode_skips_auth_id() {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Args {
            n: u32,
        }
        let ctx = context(json!({ "n": 3 }));
        assert_eq!(ctx.decode::<Args>().unwrap().n, 3);
    }

    #[test]
    fn rewriting_params_cannot_drop_auth_id() {
        let mut ctx = context(json!({ "n": 1 }));
        ctx.map_params(|_| Kwargs::new());
        assert!(ctx.params().contains_key("auth_id"));
        assert!(!ctx.params().contains_key("n"));
    }

    #[tokio::test]
    async fn sink_delivers_chunks_in_order() {
        let (sink, mut rx) = StreamSink::channel(4);
        sink.send(b"a".to_vec()).await.unwrap();
        sink.send("b").await.unwrap();
        assert_eq!(rx.recv().await, Some(b"a".to_vec()));
        assert_eq!(rx.recv().await, Some(b"b".to_vec()));
    }

    #[tokio::test]
    async fn sink_reports_closed_transport() {
        let (sink, rx) = StreamSink::channel(1);
        drop(rx);
        assert!(matches!(sink.send("x").await, Err(HandlerError::Other(_))));
    }
}
