// HTTP transport: POSTs a JSON-RPC envelope to `<uri>/json-rpc` with retry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use plaidcloud_rpc_common::protocol::jsonrpc::{Request, Response, RpcError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{decode_response, ClientError};
use crate::gate::TransmitGate;
use crate::retry::{parse_retry_after, run_with_retry, AttemptError, RetryPolicy};
use crate::transport::{OutgoingCall, Transport};

pub const RPC_ENDPOINT_PATH: &str = "json-rpc";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// PlaidCloud's bearer form: `Bearer_<token>` or `Bearer_<token>_ws<workspace>`.
pub fn authorization_value(token: &str, workspace: Option<&str>) -> String {
    match workspace {
        Some(workspace) => format!("Bearer_{token}_ws{workspace}"),
        None => format!("Bearer_{token}"),
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    uri: String,
    token: Option<String>,
    workspace: Option<String>,
    policy: RetryPolicy,
    timeout: Duration,
    verify_ssl: bool,
}

impl HttpTransportBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn build(self) -> Result<HttpTransport, ClientError> {
        let endpoint = endpoint_url(&self.uri)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.token.as_deref() {
            let value = authorization_value(token, self.workspace.as_deref());
            let value = HeaderValue::from_str(&value)
                .map_err(|error| ClientError::Config(format!("invalid auth token: {error}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()
            .map_err(|error| ClientError::Config(format!("failed to build http client: {error}")))?;

        Ok(HttpTransport {
            inner: Arc::new(Inner { client, endpoint, policy: self.policy }),
            pending: Arc::default(),
        })
    }
}

/// Resolve the RPC endpoint under a base URI; a URI already ending in
/// `/json-rpc` is used as is.
fn endpoint_url(uri: &str) -> Result<Url, ClientError> {
    let trimmed = uri.trim().trim_end_matches('/');
    let full = if trimmed.ends_with(RPC_ENDPOINT_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}/{RPC_ENDPOINT_PATH}")
    };
    Url::parse(&full)
        .map_err(|error| ClientError::Config(format!("invalid rpc uri `{uri}`: {error}")))
}

#[derive(Debug)]
struct Inner {
    client: reqwest::Client,
    endpoint: Url,
    policy: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: Arc<Inner>,
    /// Fire-and-forget sends still in flight.
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpTransport {
    pub fn builder(uri: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            uri: uri.into(),
            token: None,
            workspace: None,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            verify_ssl: true,
        }
    }

    pub fn new(uri: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder(uri).build()
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Wait for outstanding fire-and-forget sends, e.g. before a short-lived
    /// process exits.
    pub async fn drain(&self) {
        let handles = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }
}

impl Inner {
    async fn send_with_retry(
        &self,
        body: &Value,
        gate: &TransmitGate,
    ) -> Result<Option<Value>, ClientError> {
        run_with_retry(&self.policy, gate, |attempt| self.send_once(body, attempt)).await
    }

    async fn send_once(&self, body: &Value, attempt: u32) -> Result<Option<Value>, AttemptError> {
        debug!(endpoint = %self.endpoint, attempt, "sending rpc request");
        let response = match self.client.post(self.endpoint.clone()).json(body).send().await {
            Ok(response) => response,
            Err(error) if error.is_connect() || error.is_timeout() => {
                warn!(endpoint = %self.endpoint, attempt, %error, "rpc connection failed");
                return Err(AttemptError::Retryable {
                    error: ClientError::Connection(error),
                    retry_after: None,
                });
            }
            Err(error) => return Err(AttemptError::Fatal(ClientError::Connection(error))),
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if self.policy.should_retry_status(status.as_u16()) {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let error = error_from_body(response).await;
            return Err(AttemptError::Retryable {
                error: ClientError::Http { status: status.as_u16(), error },
                retry_after,
            });
        }

        if !status.is_success() {
            let error = error_from_body(response).await;
            return Err(AttemptError::Fatal(ClientError::Http { status: status.as_u16(), error }));
        }

        decode_body(response).await.map_err(AttemptError::Fatal)
    }
}

/// Streamed replies are not a single envelope; hand their text back as is.
async fn decode_body(response: reqwest::Response) -> Result<Option<Value>, ClientError> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(true, |value| value.starts_with("application/json"));
    let bytes = response.bytes().await.map_err(ClientError::Connection)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    if !is_json {
        return Ok(Some(Value::String(String::from_utf8_lossy(&bytes).into_owned())));
    }

    let envelope: Response =
        serde_json::from_slice(&bytes).map_err(|error| ClientError::Decode(error.to_string()))?;
    decode_response(envelope)
}

async fn error_from_body(response: reqwest::Response) -> Option<RpcError> {
    let bytes = response.bytes().await.ok()?;
    let envelope: Response = serde_json::from_slice(&bytes).ok()?;
    envelope.error
}

impl Transport for HttpTransport {
    fn call_rpc<'a>(
        &'a self,
        call: OutgoingCall,
        gate: &'a TransmitGate,
    ) -> BoxFuture<'a, Result<Option<Value>, ClientError>> {
        Box::pin(async move {
            let request = Request::new(call.method_path.clone(), call.params, Some(json!(0)));
            let body = serde_json::to_value(&request)
                .map_err(|error| ClientError::InvalidParams(error.to_string()))?;

            if call.fire_and_forget {
                let inner = Arc::clone(&self.inner);
                let gate = gate.clone();
                let method = call.method_path;
                let handle = tokio::spawn(async move {
                    if let Err(error) = inner.send_with_retry(&body, &gate).await {
                        warn!(%method, %error, "fire-and-forget rpc call failed");
                    }
                });
                self.track(handle);
                return Ok(None);
            }

            self.inner.send_with_retry(&body, gate).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_value_uses_plaidcloud_form() {
        assert_eq!(authorization_value("abc", None), "Bearer_abc");
        assert_eq!(authorization_value("abc", Some("42")), "Bearer_abc_ws42");
    }

    #[test]
    fn endpoint_appends_rpc_path_once() {
        assert_eq!(
            endpoint_url("https://plaidcloud.example").expect("url").as_str(),
            "https://plaidcloud.example/json-rpc"
        );
        assert_eq!(
            endpoint_url("https://plaidcloud.example/json-rpc/").expect("url").as_str(),
            "https://plaidcloud.example/json-rpc"
        );
    }

    #[test]
    fn invalid_uri_is_a_config_error() {
        assert!(matches!(endpoint_url("not a uri"), Err(ClientError::Config(_))));
    }

    #[test]
    fn builder_defaults_verify_ssl_and_retries() {
        let builder = HttpTransport::builder("http://127.0.0.1:1");
        assert!(builder.verify_ssl);
        assert_eq!(builder.policy, RetryPolicy::default());
        assert!(builder.build().is_ok());
    }
}
