// Per-request trace id, carried in a task-local so every log line of one
// call can be correlated.

use std::future::Future;

use serde_json::Value;
use uuid::Uuid;

tokio::task_local! {
    static TRACE_ID: String;
}

pub async fn with_trace_id_scope<F>(trace_id: String, future: F) -> F::Output
where
    F: Future,
{
    TRACE_ID.scope(trace_id, future).await
}

pub fn current_trace_id() -> Option<String> {
    TRACE_ID.try_with(Clone::clone).ok()
}

/// Trace id for a raw request: top-level `trace_id`, then `meta.trace_id`,
/// then `fallback` (e.g. an `x-request-id` header), else a fresh UUID.
pub fn trace_id_for_request(raw: &[u8], fallback: Option<&str>) -> String {
    serde_json::from_slice::<Value>(raw)
        .ok()
        .and_then(|value| trace_id_from_value(&value))
        .or_else(|| fallback.filter(|id| !id.trim().is_empty()).map(ToOwned::to_owned))
        .unwrap_or_else(generate_trace_id)
}

fn trace_id_from_value(value: &Value) -> Option<String> {
    extract_trace_id(value)
        .or_else(|| value.get("meta").and_then(extract_trace_id))
        .filter(|trace_id| !trace_id.trim().is_empty())
        .map(ToOwned::to_owned)
}

fn extract_trace_id(value: &Value) -> Option<&str> {
    value.as_object()?.get("trace_id")?.as_str()
}

pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{current_trace_id, trace_id_for_request, with_trace_id_scope};

    #[test]
    fn trace_id_can_be_extracted_from_top_level_field() {
        let raw = json!({
            "jsonrpc": "2.0",
            "method": "system/ping",
            "trace_id": "trace-top-level-123",
            "id": 1
        });

        assert_eq!(trace_id_for_request(raw.to_string().as_bytes(), None), "trace-top-level-123");
    }

    #[test]
    fn trace_id_can_be_extracted_from_meta() {
        let raw = json!({
            "jsonrpc": "2.0",
            "method": "system/ping",
            "meta": { "trace_id": "trace-from-meta-456" },
            "id": 1
        });

        assert_eq!(
            trace_id_for_request(raw.to_string().as_bytes(), Some("header-id")),
            "trace-from-meta-456"
        );
    }

    #[test]
    fn params_never_supply_the_trace_id() {
        let raw = json!({
            "jsonrpc": "2.0",
            "method": "system/ping",
            "params": { "trace_id": "caller-param" },
            "id": 1
        });

        assert_eq!(trace_id_for_request(raw.to_string().as_bytes(), Some("hdr-7")), "hdr-7");
    }

    #[test]
    fn trace_id_defaults_to_generated_uuid_when_missing() {
        let generated = trace_id_for_request(b"not json", Some("  "));
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    #[tokio::test]
    async fn trace_id_scope_exposes_current_trace_id() {
        let trace_id =
            with_trace_id_scope("rpc-trace-789".to_string(), async { current_trace_id() }).await;

        assert_eq!(trace_id.as_deref(), Some("rpc-trace-789"));
        assert_eq!(current_trace_id(), None);
    }
}
