// Dispatcher: runs a resolved handler and normalizes whatever it returns.
//
// Only a timeout escapes as an error; every other outcome becomes either a
// handler output or a wire-ready `RpcError`.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::FutureExt;
use plaidcloud_rpc_common::protocol::jsonrpc::{
    RpcError, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use plaidcloud_rpc_common::types::AUTH_ID_PARAM;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinError;
use tracing::{debug, error, warn};

use crate::rpc::handler::{CallContext, HandlerError, HandlerOutput, Kwargs};
use crate::rpc::registry::{Handler, HandlerSpec};

const UNEXPECTED_ERROR: &str = "Unexpected error";

/// The handler (or the configured dispatch limit) ran out of time. Left to
/// the transport to answer.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("call to `{method}` timed out")]
pub struct DispatchTimeout {
    pub method: String,
}

/// Outcome of one dispatch: the handler output or a normalized error.
pub type Dispatched = Result<HandlerOutput, RpcError>;

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort calls that run longer than `timeout` with [`DispatchTimeout`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn invoke(
        &self,
        spec: &HandlerSpec,
        mut ctx: CallContext,
    ) -> Result<Dispatched, DispatchTimeout> {
        ctx.map_params(|kwargs| spec.transform(kwargs));
        if let Err(error) = check_arguments(spec, ctx.params()) {
            debug!(method = %spec.path, data = %error.data, "rejected call arguments");
            return Ok(Err(error));
        }
        ctx.map_params(|kwargs| with_defaults(spec, kwargs));
        if !spec.is_streamed {
            ctx = ctx.with_stream_sink(None);
        }

        let is_system_user = ctx.auth().is_system_user();
        let supplied = ctx.params().clone();
        let run = execute(spec, ctx);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(HandlerError::Timeout),
            },
            None => run.await,
        };

        match outcome {
            Ok(output) => Ok(Ok(output)),
            Err(error) => normalize(spec, &supplied, is_system_user, error).map(Err),
        }
    }
}

async fn execute(spec: &HandlerSpec, ctx: CallContext) -> Result<HandlerOutput, HandlerError> {
    match spec.handler().clone() {
        Handler::Async(handler) if spec.use_thread && !spec.is_streamed => {
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || runtime.block_on(handler(ctx)))
                .await
                .unwrap_or_else(|error| Err(join_failure(error)))
        }
        Handler::Async(handler) => AssertUnwindSafe(handler(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(HandlerError::Other(anyhow!("handler panicked")))),
        Handler::Blocking(handler) => tokio::task::spawn_blocking(move || handler(ctx))
            .await
            .unwrap_or_else(|error| Err(join_failure(error))),
    }
}

fn join_failure(error: JoinError) -> HandlerError {
    if error.is_panic() {
        HandlerError::Other(anyhow!("handler panicked on a blocking worker"))
    } else {
        HandlerError::Other(anyhow!("blocking worker was cancelled"))
    }
}

fn normalize(
    spec: &HandlerSpec,
    supplied: &Kwargs,
    is_system_user: bool,
    error: HandlerError,
) -> Result<RpcError, DispatchTimeout> {
    let method = spec.path.as_str();
    let normalized = match error {
        HandlerError::Rpc(error) => {
            debug!(method, code = error.code, message = %error.message, "handler rpc error");
            error
        }
        HandlerError::NotImplemented => RpcError::new(METHOD_NOT_FOUND, "Not implemented"),
        HandlerError::Warning(message) => {
            warn!(method, %message, "handler returned a warning");
            RpcError::warning(message)
        }
        HandlerError::Timeout => return Err(DispatchTimeout { method: method.to_string() }),
        HandlerError::InvalidArguments(detail) => {
            debug!(method, %detail, "handler rejected its arguments");
            invalid_params(diagnose(spec, supplied))
        }
        HandlerError::Other(error) => {
            let detail = format!("{error:#}");
            error!(method, is_system_user, %detail, "handler failed");
            RpcError::new(INTERNAL_ERROR, spec.default_error.as_deref().unwrap_or(UNEXPECTED_ERROR))
        }
    };
    Ok(normalized)
}

/// Declared parameters against supplied keywords, before anything runs.
fn check_arguments(spec: &HandlerSpec, supplied: &Kwargs) -> Result<(), RpcError> {
    match diagnose(spec, supplied) {
        Value::Null => Ok(()),
        data => Err(invalid_params(data)),
    }
}

/// Names the missing required parameters, else the undeclared ones, else null.
fn diagnose(spec: &HandlerSpec, supplied: &Kwargs) -> Value {
    let missing: Vec<&str> = spec
        .params
        .iter()
        .filter(|param| param.is_required() && !supplied.contains_key(&param.name))
        .map(|param| param.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Value::String(format!(
            "Missing required parameter arguments: {}",
            missing.join(", ")
        ));
    }

    if spec.accepts_extra {
        return Value::Null;
    }
    let extra: Vec<&str> = supplied
        .keys()
        .map(String::as_str)
        .filter(|name| *name != AUTH_ID_PARAM && !spec.declares(name))
        .collect();
    if !extra.is_empty() {
        return Value::String(format!("Extra parameters are not allowed: {}", extra.join(", ")));
    }

    Value::Null
}

fn invalid_params(data: Value) -> RpcError {
    RpcError::new(INVALID_PARAMS, "Invalid params").with_data(data)
}

fn with_defaults(spec: &HandlerSpec, mut kwargs: Kwargs) -> Kwargs {
    for param in &spec.params {
        if let Some(default) = &param.default {
            kwargs.entry(param.name.clone()).or_insert_with(|| default.clone());
        }
    }
    kwargs
}

/// Unwrap a nested call made from inside another handler so its error is
/// forwarded unchanged.
pub fn subcall(dispatched: Dispatched) -> Result<Value, HandlerError> {
    match dispatched {
        Ok(HandlerOutput::Value(value)) => Ok(value),
        Ok(HandlerOutput::Chunks(_)) => {
            Err(HandlerError::Other(anyhow!("a streamed result cannot be used as a value")))
        }
        Err(error) => Err(HandlerError::Rpc(error)),
    }
}
