// HTTP transport: `POST /json-rpc` (GET with a body is accepted too).
//
// Authenticates the caller, runs the envelope processor inside a trace-id
// scope and maps the outcome onto a response. Chunks pushed by a streamed
// handler are written as a streaming body, followed by the final envelope.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, BoxStream, StreamExt};
use plaidcloud_rpc_common::protocol::jsonrpc::{self, RpcError, INVALID_REQUEST};
use plaidcloud_rpc_common::types::AuthIdentity;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::rpc::auth::AuthChain;
use crate::rpc::envelope::{Caller, EnvelopeProcessor, Processed, Reply};
use crate::rpc::handler::StreamSink;
use crate::rpc::trace::{generate_trace_id, trace_id_for_request, with_trace_id_scope};

pub const RPC_PATH: &str = "/json-rpc";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const SINK_CAPACITY: usize = 32;
const STREAM_CONTENT_TYPE: &str = "application/octet-stream";
const TIMEOUT_MESSAGE: &str = "Request timed out";
const UNSPECIFIED_MESSAGE: &str = "Unspecified error while executing API request";

#[derive(Clone)]
pub struct HttpState {
    processor: Arc<EnvelopeProcessor>,
    auth: AuthChain,
    allow_public: bool,
}

impl HttpState {
    pub fn new(processor: Arc<EnvelopeProcessor>, auth: AuthChain) -> Self {
        Self { processor, auth, allow_public: false }
    }

    /// Serve callers no authenticator accepts as `public` instead of 401.
    pub fn allow_public(mut self, allow: bool) -> Self {
        self.allow_public = allow;
        self
    }
}

pub fn router(state: HttpState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(RPC_PATH, post(rpc_route).get(rpc_route).options(preflight))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(cors_layer())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("json-rpc http server exited unexpectedly")
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(Duration::from_secs(3600))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Bare `OPTIONS` without CORS headers; nothing is executed.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn rpc_route(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let auth = match state.auth.authenticate(&headers) {
        Some(identity) => identity,
        None if state.allow_public => AuthIdentity::public(),
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                RpcError::new(INVALID_REQUEST, "Authentication required"),
            );
        }
    };

    let header_id = headers.get(REQUEST_ID_HEADER).and_then(|value| value.to_str().ok());
    let trace_id = trace_id_for_request(&body, header_id);

    let (sink, mut chunks) = StreamSink::channel(SINK_CAPACITY);
    let caller = Caller::new(auth).with_stream_sink(sink);
    let processor = Arc::clone(&state.processor);
    let mut processing = tokio::spawn(with_trace_id_scope(trace_id.clone(), async move {
        processor.execute_json_rpc(&body, caller).await
    }));

    let mut response = tokio::select! {
        biased;
        Some(first) = chunks.recv() => {
            let rest = stream::unfold(chunks, |mut chunks| async move {
                chunks.recv().await.map(|chunk| (chunk, chunks))
            });
            let tail = stream::once(async move { processing.await }).flat_map(tail_stream);
            let body = stream::once(async move { first }).chain(rest).map(Ok).chain(tail);
            streaming_response(Body::from_stream(body))
        }
        joined = &mut processing => {
            // a handler can finish with chunks still buffered
            let mut buffered = Vec::new();
            while let Ok(chunk) = chunks.try_recv() {
                buffered.push(chunk);
            }
            if buffered.is_empty() {
                outcome_response(joined)
            } else {
                let body = stream::iter(buffered).map(Ok).chain(tail_stream(joined));
                streaming_response(Body::from_stream(body))
            }
        }
    };

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

type Joined = Result<Processed, tokio::task::JoinError>;
type BodyStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

fn outcome_response(joined: Joined) -> Response {
    match joined {
        Ok(Ok(None)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(Some(Reply::Envelope(envelope)))) => (StatusCode::OK, Json(envelope)).into_response(),
        Ok(Ok(Some(reply @ Reply::Chunks { .. }))) => {
            streaming_response(Body::from_stream(tail_stream(Ok(Ok(Some(reply))))))
        }
        Ok(Err(timeout)) => {
            warn!(%timeout, "rpc dispatch timed out");
            error_response(StatusCode::GATEWAY_TIMEOUT, RpcError::internal(TIMEOUT_MESSAGE))
        }
        Err(join_error) => {
            error!(?join_error, "rpc processing task failed");
            let error = RpcError::internal(UNSPECIFIED_MESSAGE);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error)
        }
    }
}

/// What follows the sink chunks of a streamed call: the final envelope or
/// the handler's own chunk stream.
fn tail_stream(joined: Joined) -> BodyStream {
    let envelope = match joined {
        Ok(Ok(None)) => return stream::empty().boxed(),
        Ok(Ok(Some(Reply::Chunks { chunks, .. }))) => {
            return chunks
                .map(|chunk| {
                    chunk.map_err(|error| {
                        warn!(%error, "streamed result failed mid-response");
                        std::io::Error::other(error.to_string())
                    })
                })
                .boxed();
        }
        Ok(Ok(Some(Reply::Envelope(envelope)))) => envelope,
        Ok(Err(timeout)) => {
            warn!(%timeout, "streamed rpc dispatch timed out");
            jsonrpc::Response::failure(Value::Null, RpcError::internal(TIMEOUT_MESSAGE))
        }
        Err(join_error) => {
            error!(?join_error, "rpc processing task failed");
            jsonrpc::Response::failure(Value::Null, RpcError::internal(UNSPECIFIED_MESSAGE))
        }
    };
    let encoded = serde_json::to_vec(&envelope).map_err(std::io::Error::other);
    stream::once(async move { encoded }).boxed()
}

fn streaming_response(body: Body) -> Response {
    ([(CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE))], body).into_response()
}

fn error_response(status: StatusCode, error: RpcError) -> Response {
    (status, Json(jsonrpc::Response::failure(Value::Null, error))).into_response()
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(generate_trace_id);
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if !response.headers().contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use plaidcloud_rpc_common::protocol::jsonrpc::Response as Envelope;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::rpc::registry::{MethodRegistry, RpcMethod};

    fn test_router(allow_public: bool) -> Router {
        let mut registry = MethodRegistry::new();
        registry
            .add(RpcMethod::new("system/ping").handler(|_ctx| async { Ok(json!({ "ok": true })) }))
            .unwrap();
        let processor = Arc::new(EnvelopeProcessor::new(Arc::new(registry)));
        router(HttpState::new(processor, AuthChain::new()).allow_public(allow_public), 1024)
    }

    fn rpc_request(method: Method, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(RPC_PATH)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn decode(response: Response) -> Envelope {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_returns_an_envelope_with_request_id() {
        let body = r#"{"id":1,"jsonrpc":"2.0","method":"system.ping","trace_id":"t-1"}"#;
        let response = test_router(true).oneshot(rpc_request(Method::POST, body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "t-1");
        let envelope = decode(response).await;
        assert_eq!(envelope.result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn get_with_a_body_is_accepted() {
        let body = r#"{"id":2,"jsonrpc":"2.0","method":"system/ping"}"#;
        let response = test_router(true).oneshot(rpc_request(Method::GET, body)).await.unwrap();
        assert_eq!(decode(response).await.id, json!(2));
    }

    #[tokio::test]
    async fn notification_gets_no_content() {
        let body = r#"{"jsonrpc":"2.0","method":"system/ping"}"#;
        let response = test_router(true).oneshot(rpc_request(Method::POST, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unauthenticated_caller_gets_401_unless_public_is_allowed() {
        let body = r#"{"id":1,"jsonrpc":"2.0","method":"system/ping"}"#;
        let response = test_router(false).oneshot(rpc_request(Method::POST, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!decode(response).await.ok);
    }

    #[tokio::test]
    async fn bare_options_executes_nothing() {
        let request =
            Request::builder().method(Method::OPTIONS).uri(RPC_PATH).body(Body::empty()).unwrap();
        let response = test_router(false).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let padding = "a".repeat(2048);
        let body =
            format!(r#"{{"id":1,"jsonrpc":"2.0","method":"echo","params":{{"x":"{padding}"}}}}"#);
        let response = test_router(true).oneshot(rpc_request(Method::POST, &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = test_router(false).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }
}
