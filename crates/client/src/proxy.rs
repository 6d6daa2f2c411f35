// Method-path proxy: build `a/b/c` segment by segment, call it with keyword params.
//
//   let rpc = RpcProxy::new(HttpTransport::new(uri)?);
//   let tables = rpc.child("analyze").child("project").child("tables")
//       .call(json!({ "project_id": "p1" }))
//       .await?;

use std::fmt;
use std::sync::Arc;

use plaidcloud_rpc_common::path::{join_segments, normalize_method_path};
use plaidcloud_rpc_common::protocol::jsonrpc::Params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::gate::TransmitGate;
use crate::transport::{OutgoingCall, Transport};

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub fire_and_forget: bool,
}

impl CallOptions {
    pub fn fire_and_forget() -> Self {
        Self { fire_and_forget: true }
    }
}

/// Entry point of the dot-path API. Cheap to clone; safe to share between
/// concurrent callers since every call owns its own retry state.
#[derive(Clone)]
pub struct RpcProxy {
    transport: Arc<dyn Transport>,
    gate: TransmitGate,
}

impl fmt::Debug for RpcProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcProxy").field("gate", &self.gate).finish_non_exhaustive()
    }
}

impl RpcProxy {
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self { transport, gate: TransmitGate::open() }
    }

    /// Install the `check_allow_transmit` predicate.
    pub fn with_check_allow_transmit(mut self, gate: TransmitGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn allow_transmit(&self) -> bool {
        self.gate.allows()
    }

    /// First path segment. No network traffic happens until `call`.
    pub fn child(&self, segment: impl Into<String>) -> MethodPath {
        MethodPath { proxy: self.clone(), segments: Arc::from(vec![segment.into()]) }
    }

    /// A full path given as one string, dotted or slashed. A path naming no
    /// method fails when called, before anything is sent.
    pub fn path(&self, method_path: &str) -> MethodPath {
        let segments: Vec<String> = match normalize_method_path(method_path) {
            Ok(normalized) => normalized.split('/').map(ToOwned::to_owned).collect(),
            Err(_) => vec![method_path.to_owned()],
        };
        MethodPath { proxy: self.clone(), segments: Arc::from(segments) }
    }

    /// Call a method by its full path in one step.
    pub async fn call<P: Serialize>(
        &self,
        method_path: &str,
        params: P,
    ) -> Result<Option<Value>, ClientError> {
        self.path(method_path).call(params).await
    }

    async fn send(
        &self,
        method_path: String,
        params: Params,
        options: CallOptions,
    ) -> Result<Option<Value>, ClientError> {
        if !self.gate.allows() {
            debug!(method = %method_path, "transmission disallowed; skipping rpc call");
            return Ok(None);
        }

        let call = OutgoingCall { method_path, params, fire_and_forget: options.fire_and_forget };
        self.transport.call_rpc(call, &self.gate).await
    }
}

/// An immutable, partially built method path. Extending it returns a new value.
#[derive(Clone)]
pub struct MethodPath {
    proxy: RpcProxy,
    segments: Arc<[String]>,
}

impl fmt::Debug for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodPath").field(&self.method_path()).finish()
    }
}

impl MethodPath {
    pub fn child(&self, segment: impl Into<String>) -> MethodPath {
        let mut segments = self.segments.to_vec();
        segments.push(segment.into());
        MethodPath { proxy: self.proxy.clone(), segments: Arc::from(segments) }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The `/`-joined path this builder addresses.
    pub fn method_path(&self) -> String {
        join_segments(&self.segments)
    }

    /// Invoke the method with keyword params (any value serializing to a JSON
    /// object; `()`/null means no params).
    ///
    /// Returns `Ok(None)` without touching the transport when the transmit
    /// gate is closed.
    pub async fn call<P: Serialize>(&self, params: P) -> Result<Option<Value>, ClientError> {
        self.call_with(params, CallOptions::default()).await
    }

    pub async fn call_with<P: Serialize>(
        &self,
        params: P,
        options: CallOptions,
    ) -> Result<Option<Value>, ClientError> {
        let method_path = self.method_path();
        if let Err(source) = normalize_method_path(&method_path) {
            return Err(ClientError::InvalidMethodPath { path: method_path, source });
        }
        let params = into_params(params)?;
        self.proxy.send(method_path, params, options).await
    }

    /// Like [`call`](Self::call), decoding the result into `R`.
    pub async fn call_as<P, R>(&self, params: P) -> Result<Option<R>, ClientError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        match self.call(params).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|error| ClientError::Decode(error.to_string())),
            None => Ok(None),
        }
    }
}

/// Serialize call params into a keyword map.
pub fn into_params<P: Serialize>(params: P) -> Result<Params, ClientError> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Params::new()),
        Ok(other) => Err(ClientError::InvalidParams(format!(
            "params must serialize to a JSON object, got {other}"
        ))),
        Err(error) => Err(ClientError::InvalidParams(error.to_string())),
    }
}
