// Method registry: (version, path) → handler descriptor.
//
// Populated by explicit registration at startup, then shared read-only
// behind an `Arc`; resolution is a plain map lookup.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use plaidcloud_rpc_common::path::{normalize_method_path, MethodPathError};
use plaidcloud_rpc_common::protocol::jsonrpc::DEFAULT_RPC_VERSION;
use plaidcloud_rpc_common::protocol::rpc_methods::PROTOCOL_METHODS;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::rpc::handler::{CallContext, HandlerError, HandlerOutput, Kwargs};

pub type AsyncHandlerFn =
    dyn Fn(CallContext) -> BoxFuture<'static, Result<HandlerOutput, HandlerError>> + Send + Sync;
pub type BlockingHandlerFn =
    dyn Fn(CallContext) -> Result<HandlerOutput, HandlerError> + Send + Sync;
pub type KwargTransform = dyn Fn(Kwargs) -> Kwargs + Send + Sync;

/// The callable behind a method.
#[derive(Clone)]
pub enum Handler {
    /// Awaited on the calling task (or on a blocking worker with `use_thread`).
    Async(Arc<AsyncHandlerFn>),
    /// Synchronous code; always run on a blocking worker.
    Blocking(Arc<BlockingHandlerFn>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Async(_) => f.write_str("Handler::Async"),
            Self::Blocking(_) => f.write_str("Handler::Blocking"),
        }
    }
}

/// A declared keyword parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    /// `None` marks a required parameter.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Everything known about a registered method. Immutable once registered.
pub struct HandlerSpec {
    pub path: String,
    pub required_scope: Option<String>,
    pub default_error: Option<String>,
    pub is_streamed: bool,
    pub use_thread: bool,
    pub params: Vec<ParamSpec>,
    /// Undeclared keywords are passed through instead of rejected.
    pub accepts_extra: bool,
    pub description: String,
    kwarg_transformation: Option<Arc<KwargTransform>>,
    handler: Handler,
}

/// What `resolve` hands back.
pub type ResolvedMethod = Arc<HandlerSpec>;

impl HandlerSpec {
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Apply the declared keyword transformation, if any.
    pub fn transform(&self, kwargs: Kwargs) -> Kwargs {
        match &self.kwarg_transformation {
            Some(transform) => transform(kwargs),
            None => kwargs,
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name == name)
    }

    /// The `help` payload: declared parameters with their defaults (null
    /// when required) and the description.
    pub fn describe(&self, requested_as: &str) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|param| (param.name.clone(), param.default.clone().unwrap_or(Value::Null)))
            .collect();
        json!({
            "method": requested_as,
            "params": params,
            "description": self.description,
        })
    }
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("path", &self.path)
            .field("required_scope", &self.required_scope)
            .field("default_error", &self.default_error)
            .field("is_streamed", &self.is_streamed)
            .field("use_thread", &self.use_thread)
            .field("params", &self.params)
            .field("accepts_extra", &self.accepts_extra)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`HandlerSpec`].
///
/// ```ignore
/// let spec = RpcMethod::new("analyze/project/tables")
///     .required_scope("analyze.project.read")
///     .default_error("Exception when retrieving project table information")
///     .param("project_id")
///     .optional_param("id_filter", Value::Null)
///     .handler(|ctx| async move { list_tables(ctx).await });
/// ```
#[must_use]
pub struct RpcMethod {
    path: String,
    required_scope: Option<String>,
    default_error: Option<String>,
    is_streamed: bool,
    use_thread: bool,
    params: Vec<ParamSpec>,
    accepts_extra: bool,
    description: String,
    kwarg_transformation: Option<Arc<KwargTransform>>,
}

impl RpcMethod {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            required_scope: None,
            default_error: None,
            is_streamed: false,
            use_thread: false,
            params: Vec::new(),
            accepts_extra: false,
            description: String::new(),
            kwarg_transformation: None,
        }
    }

    pub fn required_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = Some(scope.into()).filter(|scope: &String| !scope.is_empty());
        self
    }

    /// Message sent in place of unexpected failures.
    pub fn default_error(mut self, message: impl Into<String>) -> Self {
        self.default_error = Some(message.into());
        self
    }

    pub fn streamed(mut self) -> Self {
        self.is_streamed = true;
        self
    }

    /// Run an async handler to completion on a blocking worker.
    pub fn use_thread(mut self) -> Self {
        self.use_thread = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec { name: name.into(), default: None });
        self
    }

    pub fn optional_param(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(ParamSpec { name: name.into(), default: Some(default.into()) });
        self
    }

    /// Accept keywords beyond the declared ones.
    pub fn extra_params(mut self) -> Self {
        self.accepts_extra = true;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Rewrite the keywords before they are checked and passed on.
    pub fn kwarg_transformation<F>(mut self, transform: F) -> Self
    where
        F: Fn(Kwargs) -> Kwargs + Send + Sync + 'static,
    {
        self.kwarg_transformation = Some(Arc::new(transform));
        self
    }

    pub fn handler<F, Fut, T>(self, handler: F) -> HandlerSpec
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
        T: Into<HandlerOutput> + Send + 'static,
    {
        let handler: Arc<AsyncHandlerFn> = Arc::new(move |ctx: CallContext| {
            let future = handler(ctx);
            async move { future.await.map(Into::into) }.boxed()
        });
        self.finish(Handler::Async(handler))
    }

    pub fn blocking<F, T>(self, handler: F) -> HandlerSpec
    where
        F: Fn(CallContext) -> Result<T, HandlerError> + Send + Sync + 'static,
        T: Into<HandlerOutput>,
    {
        let handler: Arc<BlockingHandlerFn> =
            Arc::new(move |ctx: CallContext| handler(ctx).map(Into::into));
        self.finish(Handler::Blocking(handler))
    }

    fn finish(self, handler: Handler) -> HandlerSpec {
        HandlerSpec {
            path: self.path,
            required_scope: self.required_scope,
            default_error: self.default_error,
            is_streamed: self.is_streamed,
            use_thread: self.use_thread,
            params: self.params,
            accepts_extra: self.accepts_extra,
            description: self.description,
            kwarg_transformation: self.kwarg_transformation,
            handler,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("method `{path}` is already registered for version {version}")]
    Duplicate { path: String, version: u32 },

    #[error("method `{0}` is answered by the protocol layer and cannot be registered")]
    Reserved(String),

    #[error(transparent)]
    InvalidPath(#[from] MethodPathError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MethodKey {
    version: u32,
    path: String,
}

#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<MethodKey, ResolvedMethod>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `spec` under `path` (dotted or slashed) for `version`.
    pub fn register(
        &mut self,
        version: u32,
        path: &str,
        mut spec: HandlerSpec,
    ) -> Result<(), RegistryError> {
        let path = normalize_method_path(path)?;
        if PROTOCOL_METHODS.contains(&path.as_str()) {
            return Err(RegistryError::Reserved(path));
        }

        let key = MethodKey { version, path: path.clone() };
        if self.methods.contains_key(&key) {
            return Err(RegistryError::Duplicate { path, version });
        }

        spec.path = path;
        self.methods.insert(key, Arc::new(spec));
        Ok(())
    }

    /// Register under the method's own path for the default version.
    pub fn add(&mut self, spec: HandlerSpec) -> Result<(), RegistryError> {
        let path = spec.path.clone();
        self.register(DEFAULT_RPC_VERSION, &path, spec)
    }

    pub fn resolve(
        &self,
        method_path: &str,
        version: u32,
    ) -> Result<ResolvedMethod, RegistryError> {
        let not_found = || RegistryError::MethodNotFound(method_path.to_string());
        let path = normalize_method_path(method_path).map_err(|_| not_found())?;
        self.methods.get(&MethodKey { version, path }).cloned().ok_or_else(not_found)
    }

    /// Registered paths for `version`, sorted.
    pub fn paths(&self, version: u32) -> Vec<String> {
        let mut paths: Vec<String> = self
            .methods
            .keys()
            .filter(|key| key.version == version)
            .map(|key| key.path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ping() -> HandlerSpec {
        RpcMethod::new("system/ping").handler(|_ctx| async { Ok(json!({ "ok": true })) })
    }

    #[test]
    fn resolves_registered_path() {
        let mut registry = MethodRegistry::new();
        registry.add(ping()).unwrap();

        let spec = registry.resolve("system/ping", 1).unwrap();
        assert_eq!(spec.path, "system/ping");
        assert!(spec.required_scope.is_none());
        assert!(matches!(spec.handler(), Handler::Async(_)));
    }

    #[test]
    fn dotted_and_padded_paths_resolve_to_same_method() {
        let mut registry = MethodRegistry::new();
        registry.add(ping()).unwrap();

        let slashed = registry.resolve("system/ping", 1).unwrap();
        let dotted = registry.resolve("system.ping", 1).unwrap();
        let padded = registry.resolve("/system/ping/", 1).unwrap();
        assert!(Arc::ptr_eq(&slashed, &dotted));
        assert!(Arc::ptr_eq(&slashed, &padded));
    }

    #[test]
    fn versions_are_separate_namespaces() {
        let mut registry = MethodRegistry::new();
        registry.register(2, "system/ping", ping()).unwrap();

        assert!(registry.resolve("system/ping", 2).is_ok());
        assert_eq!(
            registry.resolve("system/ping", 1).unwrap_err(),
            RegistryError::MethodNotFound("system/ping".into())
        );
    }

    #[test]
    fn empty_and_unknown_paths_are_not_found() {
        let registry = MethodRegistry::new();
        assert!(matches!(registry.resolve("", 1), Err(RegistryError::MethodNotFound(_))));
        assert!(matches!(
            registry.resolve("nonexistent/method", 1),
            Err(RegistryError::MethodNotFound(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = MethodRegistry::new();
        registry.add(ping()).unwrap();
        assert_eq!(
            registry.add(ping()).unwrap_err(),
            RegistryError::Duplicate { path: "system/ping".into(), version: 1 }
        );
    }

    #[test]
    fn protocol_names_cannot_be_registered() {
        let mut registry = MethodRegistry::new();
        let echo = RpcMethod::new("echo").handler(|_ctx| async { Ok(Value::Null) });
        assert_eq!(registry.add(echo).unwrap_err(), RegistryError::Reserved("echo".into()));
    }

    #[test]
    fn resolution_is_repeatable() {
        let mut registry = MethodRegistry::new();
        registry.add(ping()).unwrap();
        for _ in 0..3 {
            assert_eq!(registry.resolve("system.ping", 1).unwrap().path, "system/ping");
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.paths(1), vec!["system/ping".to_string()]);
    }

    #[test]
    fn builder_records_metadata() {
        let spec = RpcMethod::new("analyze/project/tables")
            .required_scope("analyze.project.read")
            .default_error("Exception when retrieving project table information")
            .use_thread()
            .param("project_id")
            .optional_param("id_filter", Value::Null)
            .optional_param("limit", 100)
            .description("List tables.")
            .blocking(|_ctx| Ok(json!([])));

        assert_eq!(spec.required_scope.as_deref(), Some("analyze.project.read"));
        assert!(spec.use_thread);
        assert!(!spec.is_streamed);
        assert!(spec.declares("project_id"));
        assert!(!spec.declares("auth_id"));
        assert!(spec.params[0].is_required());
        assert!(matches!(spec.handler(), Handler::Blocking(_)));
    }

    #[test]
    fn describe_lists_declared_params_with_defaults() {
        let spec = RpcMethod::new("analyze/project/tables")
            .param("project_id")
            .optional_param("limit", 100)
            .description("List tables.")
            .handler(|_ctx| async { Ok(Value::Null) });

        assert_eq!(
            spec.describe("analyze.project.tables"),
            json!({
                "method": "analyze.project.tables",
                "params": { "project_id": null, "limit": 100 },
                "description": "List tables."
            })
        );
    }

    #[test]
    fn kwarg_transformation_is_applied() {
        let spec = RpcMethod::new("a/b")
            .kwarg_transformation(|mut kwargs| {
                if let Some(value) = kwargs.remove("legacy_name") {
                    kwargs.insert("name".into(), value);
                }
                kwargs
            })
            .handler(|_ctx| async { Ok(Value::Null) });

        let mut kwargs = Kwargs::new();
        kwargs.insert("legacy_name".into(), json!("t1"));
        let transformed = spec.transform(kwargs);
        assert_eq!(transformed.get("name"), Some(&json!("t1")));
        assert!(!transformed.contains_key("legacy_name"));
    }
}
