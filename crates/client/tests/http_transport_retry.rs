use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use plaidcloud_rpc_client::retry::RetryPolicy;
use plaidcloud_rpc_client::{CallOptions, ClientError, HttpTransport, RpcProxy, TransmitGate};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Recorder {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_status: u16,
    bodies: Arc<Mutex<Vec<Value>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
}

async fn handle(
    State(recorder): State<Recorder>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let attempt = recorder.attempts.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        recorder.auth_headers.lock().unwrap().push(auth.to_string());
    }
    recorder.bodies.lock().unwrap().push(body.clone());

    if attempt < recorder.failures_before_success {
        let status = StatusCode::from_u16(recorder.failure_status).unwrap();
        return (status, "upstream failure").into_response();
    }

    match body["method"].as_str() {
        Some("warn/me") => Json(json!({
            "id": body["id"],
            "ok": false,
            "error": { "code": -1000, "message": "table is empty", "data": null }
        }))
        .into_response(),
        Some("forbidden") => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "id": null,
                "ok": false,
                "error": { "code": -32600, "message": "Unauthorized", "data": null }
            })),
        )
            .into_response(),
        _ => Json(json!({
            "id": body["id"],
            "ok": true,
            "result": { "method": body["method"], "params": body["params"] }
        }))
        .into_response(),
    }
}

async fn spawn_server(recorder: Recorder) -> String {
    let app = Router::new().route("/json-rpc", post(handle)).with_state(recorder);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });
    format!("http://{addr}")
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::default().with_max_retries(max_retries).with_base_backoff(Duration::from_millis(5))
}

#[tokio::test]
async fn retries_bad_gateway_then_returns_result() {
    let recorder =
        Recorder { failures_before_success: 1, failure_status: 502, ..Recorder::default() };
    let uri = spawn_server(recorder.clone()).await;
    let transport = HttpTransport::builder(uri)
        .token("tok")
        .workspace("9")
        .retry_policy(fast_retries(3))
        .build()
        .expect("transport should build");
    let proxy = RpcProxy::new(transport);

    let result = proxy
        .child("analyze")
        .child("project")
        .child("tables")
        .call(json!({ "project_id": "p1" }))
        .await
        .expect("second attempt should succeed");

    assert_eq!(
        result,
        Some(json!({ "method": "analyze/project/tables", "params": { "project_id": "p1" } }))
    );
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 2);

    let bodies = recorder.bodies.lock().unwrap();
    assert_eq!(bodies[0]["jsonrpc"], "2.0");
    assert_eq!(bodies[0]["id"], 0);
    assert_eq!(recorder.auth_headers.lock().unwrap()[0], "Bearer_tok_ws9");
}

#[tokio::test]
async fn gives_up_after_bounded_retries() {
    let recorder =
        Recorder { failures_before_success: u32::MAX, failure_status: 500, ..Recorder::default() };
    let uri = spawn_server(recorder.clone()).await;
    let transport =
        HttpTransport::builder(uri).retry_policy(fast_retries(2)).build().expect("transport");

    let error = RpcProxy::new(transport)
        .call("system/ping", ())
        .await
        .expect_err("retries should be exhausted");

    assert!(matches!(error, ClientError::Http { status: 500, .. }));
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_retryable_status_surfaces_server_error() {
    let recorder = Recorder::default();
    let uri = spawn_server(recorder.clone()).await;
    let transport =
        HttpTransport::builder(uri).retry_policy(fast_retries(5)).build().expect("transport");

    let error = RpcProxy::new(transport)
        .call("forbidden", ())
        .await
        .expect_err("401 should surface");

    match error {
        ClientError::Http { status, error } => {
            assert_eq!(status, 401);
            assert_eq!(error.expect("error envelope").message, "Unauthorized");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn warning_envelope_becomes_warning_error() {
    let uri = spawn_server(Recorder::default()).await;
    let transport = HttpTransport::new(uri).expect("transport");

    let error = RpcProxy::new(transport).call("warn/me", ()).await.expect_err("warning");

    assert!(matches!(error, ClientError::Warning(ref message) if message == "table is empty"));
}

#[tokio::test]
async fn closing_gate_between_retries_aborts() {
    let recorder =
        Recorder { failures_before_success: u32::MAX, failure_status: 504, ..Recorder::default() };
    let uri = spawn_server(recorder.clone()).await;
    let transport = HttpTransport::builder(uri)
        .retry_policy(fast_retries(5).with_base_backoff(Duration::from_millis(200)))
        .build()
        .expect("transport");

    let allowed = Arc::new(AtomicBool::new(true));
    let proxy = RpcProxy::new(transport)
        .with_check_allow_transmit(TransmitGate::from_flag(Arc::clone(&allowed)));

    let closer = {
        let allowed = Arc::clone(&allowed);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            allowed.store(false, Ordering::SeqCst);
        })
    };

    let error = proxy.call("system/ping", ()).await.expect_err("gate should abort");
    closer.await.expect("closer task");

    assert!(matches!(error, ClientError::TransmitDisallowed { attempts: 1 }));
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fire_and_forget_returns_none_and_still_sends() {
    let recorder = Recorder::default();
    let uri = spawn_server(recorder.clone()).await;
    let transport = HttpTransport::new(uri).expect("transport");
    let proxy = RpcProxy::new(transport.clone());

    let result = proxy
        .child("system")
        .child("ping")
        .call_with((), CallOptions::fire_and_forget())
        .await
        .expect("fire and forget");
    assert_eq!(result, None);

    transport.drain().await;
    assert_eq!(recorder.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.bodies.lock().unwrap()[0]["method"], "system/ping");
}

#[tokio::test]
async fn connection_refused_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport = HttpTransport::builder(format!("http://{addr}"))
        .retry_policy(fast_retries(1))
        .build()
        .expect("transport");

    let error = RpcProxy::new(transport).call("system/ping", ()).await.expect_err("refused");
    assert!(matches!(error, ClientError::Connection(_)));
}
