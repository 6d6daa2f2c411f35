// Envelope processing: validate a JSON-RPC 2.0 request, then drive
// resolve → authorize → dispatch and build the response envelope.
//
// Shape, resolution and scope failures are answered even for notifications;
// a notification that reached its handler gets no response at all.

use std::fmt;
use std::sync::Arc;

use plaidcloud_rpc_common::path::normalize_method_path;
use plaidcloud_rpc_common::protocol::jsonrpc::{
    Params, Response, RpcError, DEFAULT_RPC_VERSION, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use plaidcloud_rpc_common::protocol::rpc_methods::{ECHO, HELP};
use plaidcloud_rpc_common::types::AuthIdentity;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::rpc::dispatch::{DispatchTimeout, Dispatched, Dispatcher};
use crate::rpc::handler::{CallContext, ChunkStream, HandlerOutput, StreamSink};
use crate::rpc::registry::MethodRegistry;
use crate::rpc::scope;
use crate::rpc::trace::current_trace_id;

const PARSE_ERROR_MESSAGE: &str = "Request parse error.  Message must be JSON.";
const NOT_A_MAP_MESSAGE: &str =
    "Invalid request object format. Must be JSON map. Multiple operations are not supported.";
const BAD_VERSION_MESSAGE: &str =
    "Invalid API version specified. Only JSON-RPC version 2.0 is supported.";
const BAD_METHOD_MESSAGE: &str = "Invalid method specified";
const BAD_PARAMS_MESSAGE: &str = "Invalid parameter format";
const METHOD_NOT_FOUND_MESSAGE: &str = "Method not found";
const HELP_NOT_FOUND_MESSAGE: &str = "Method to describe not found";

/// Who is calling and what the transport adds to the call.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub auth: AuthIdentity,
    /// Merged over the request params; the caller cannot override them.
    pub extra_params: Params,
    /// Handed to streamed handlers.
    pub stream_sink: Option<StreamSink>,
}

impl Caller {
    pub fn new(auth: AuthIdentity) -> Self {
        Self { auth, extra_params: Params::new(), stream_sink: None }
    }

    pub fn with_extra_params(mut self, extra_params: Params) -> Self {
        self.extra_params = extra_params;
        self
    }

    pub fn with_stream_sink(mut self, sink: StreamSink) -> Self {
        self.stream_sink = Some(sink);
        self
    }
}

/// What a transport sends back for one request.
pub enum Reply {
    Envelope(Response),
    /// A lazy chunk stream, written as is instead of an envelope.
    Chunks { id: Value, chunks: ChunkStream },
}

impl Reply {
    /// The envelope, if this reply is one.
    pub fn into_envelope(self) -> Option<Response> {
        match self {
            Self::Envelope(response) => Some(response),
            Self::Chunks { .. } => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Envelope(response) => f.debug_tuple("Envelope").field(response).finish(),
            Self::Chunks { id, .. } => {
                f.debug_struct("Chunks").field("id", id).finish_non_exhaustive()
            }
        }
    }
}

/// `None` means nothing is sent back (a notification was executed).
pub type Processed = Result<Option<Reply>, DispatchTimeout>;

#[derive(Debug, Clone)]
pub struct EnvelopeProcessor {
    registry: Arc<MethodRegistry>,
    dispatcher: Dispatcher,
    version: u32,
}

impl EnvelopeProcessor {
    pub fn new(registry: Arc<MethodRegistry>) -> Self {
        Self { registry, dispatcher: Dispatcher::new(), version: DEFAULT_RPC_VERSION }
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Handler namespace version this processor resolves against.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Process raw request bytes; undecodable input gets a parse error.
    pub async fn execute_json_rpc(&self, raw: &[u8], caller: Caller) -> Processed {
        match serde_json::from_slice::<Value>(raw) {
            Ok(envelope) => self.process_rpc(envelope, caller).await,
            Err(error) => {
                debug!(%error, "rejected undecodable request");
                let raw_text = String::from_utf8_lossy(raw).into_owned();
                Ok(Some(failure(
                    Value::Null,
                    RpcError::new(PARSE_ERROR, PARSE_ERROR_MESSAGE).with_data(raw_text),
                )))
            }
        }
    }

    /// Process an already decoded envelope.
    pub async fn process_rpc(&self, envelope: Value, caller: Caller) -> Processed {
        let Value::Object(request) = &envelope else {
            return Ok(Some(failure(Value::Null, invalid_request(NOT_A_MAP_MESSAGE))));
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let is_notification = id.is_null();

        if request.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Ok(Some(failure(id, invalid_request(BAD_VERSION_MESSAGE))));
        }

        let Some(raw_method) = request.get("method").and_then(Value::as_str) else {
            return Ok(Some(failure(id, invalid_request(BAD_METHOD_MESSAGE))));
        };

        let params = match request.get("params") {
            None => Params::new(),
            Some(Value::Object(params)) => params.clone(),
            Some(_) => return Ok(Some(failure(id, invalid_request(BAD_PARAMS_MESSAGE)))),
        };

        // A present but empty path names no method, so it cannot resolve.
        let Ok(method) = normalize_method_path(raw_method) else {
            debug!(method = raw_method, "method path names no method");
            return Ok(Some(failure(id, method_not_found())));
        };

        let outcome = match method.as_str() {
            ECHO => Ok(HandlerOutput::Value(envelope.clone())),
            HELP => self.describe(&params),
            _ => match self.run(&method, &id, params, caller).await? {
                Ok(outcome) => outcome,
                Err(early) => return Ok(Some(failure(id, early))),
            },
        };

        if is_notification {
            debug!(method = %method, "notification executed; no response");
            return Ok(None);
        }
        Ok(Some(match outcome {
            Ok(HandlerOutput::Value(result)) => Reply::Envelope(Response::success(id, result)),
            Ok(HandlerOutput::Chunks(chunks)) => Reply::Chunks { id, chunks },
            Err(error) => failure(id, error),
        }))
    }

    /// Resolve, authorize, dispatch. The inner `Err` is an error raised
    /// before the handler ran.
    async fn run(
        &self,
        method: &str,
        id: &Value,
        params: Params,
        caller: Caller,
    ) -> Result<Result<Dispatched, RpcError>, DispatchTimeout> {
        let Ok(spec) = self.registry.resolve(method, self.version) else {
            debug!(method, version = self.version, "method not found");
            return Ok(Err(method_not_found()));
        };

        let required = spec.required_scope.as_deref();
        if !scope::authorized(method, required, &caller.auth.scopes) {
            debug!(method, ?required, "caller lacks permission scope");
            return Ok(Err(scope::unauthorized_error(required, &caller.auth.scopes)));
        }

        let mut kwargs = params;
        kwargs.extend(caller.extra_params);
        let ctx =
            CallContext::new(method, caller.auth, kwargs).with_stream_sink(caller.stream_sink);

        let trace_id = current_trace_id().unwrap_or_default();
        info!(%trace_id, "Start \"{method}\" {id}");
        let dispatched = self.dispatcher.invoke(&spec, ctx).await?;
        info!(%trace_id, ok = dispatched.is_ok(), "Complete \"{method}\" {id}");
        Ok(Ok(dispatched))
    }

    fn describe(&self, params: &Params) -> Dispatched {
        let not_found = || RpcError::new(METHOD_NOT_FOUND, HELP_NOT_FOUND_MESSAGE);
        let requested = params.get("method").and_then(Value::as_str).ok_or_else(not_found)?;
        let spec = self.registry.resolve(requested, self.version).map_err(|_| not_found())?;
        Ok(HandlerOutput::Value(spec.describe(requested)))
    }
}

fn method_not_found() -> RpcError {
    RpcError::new(METHOD_NOT_FOUND, METHOD_NOT_FOUND_MESSAGE)
}

fn invalid_request(message: &str) -> RpcError {
    RpcError::new(INVALID_REQUEST, message)
}

fn failure(id: Value, error: RpcError) -> Reply {
    Reply::Envelope(Response::failure(id, error))
}

/// Build a request envelope value, as a client would send it.
pub fn request_envelope(method: &str, params: Params, id: Option<Value>) -> Value {
    let mut envelope = Map::new();
    if let Some(id) = id {
        envelope.insert("id".into(), id);
    }
    envelope.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
    envelope.insert("method".into(), Value::from(method));
    envelope.insert("params".into(), Value::Object(params));
    Value::Object(envelope)
}
