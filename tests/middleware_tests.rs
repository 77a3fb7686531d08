//! End-to-end tests of the trace middleware over a real axum router.
//!
//! Run with: `cargo test --test middleware_tests`

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tracewire::{trace_layer, BlockOptions, Trace, TraceConfig};

fn test_router() -> Router {
    Router::new()
        .route("/plain", get(plain_handler))
        .route("/instrumented", get(instrumented_handler))
        .route("/loop", get(loop_handler))
        .layer(from_fn_with_state(TraceConfig::default(), trace_layer))
}

async fn plain_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn instrumented_handler(trace: Trace) -> impl IntoResponse {
    let section = trace.start_section("Work", 0);
    trace.add_block(
        "Data",
        "x",
        &BlockOptions {
            parent: section,
            id: "A".to_string(),
            ..Default::default()
        },
    );
    trace.end_section(section).unwrap();
    "done"
}

/// Adds the same block id three times, like a handler looping over rows.
async fn loop_handler(trace: Trace) -> impl IntoResponse {
    for i in 0..3 {
        trace.add_block(
            "Item",
            &format!("payload {i}"),
            &BlockOptions {
                id: "B".to_string(),
                ..Default::default()
            },
        );
    }
    "looped"
}

struct Reply {
    status: StatusCode,
    content_type: Option<HeaderValue>,
    body: String,
}

async fn send(uri: &str, traced: bool) -> Reply {
    let mut builder = Request::builder().uri(uri);
    if traced {
        builder = builder.header("x-tracewire", "1");
    }
    let response = test_router()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    Reply {
        status,
        content_type,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

#[tokio::test]
async fn test_untraced_request_passes_through_unmodified() {
    let reply = send("/plain", false).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.content_type,
        Some(HeaderValue::from_static("application/json"))
    );
    assert_eq!(reply.body, r#"{"ok":true}"#);
    assert!(!reply.body.contains("\"cmd\""));
}

#[tokio::test]
async fn test_untraced_instrumentation_is_invisible() {
    let reply = send("/instrumented", false).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "done");
}

#[tokio::test]
async fn test_traced_request_returns_wire_records() {
    let reply = send("/instrumented", true).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.content_type,
        Some(HeaderValue::from_static("text/html"))
    );
    // The handler's real output is discarded.
    assert!(!reply.body.contains("done"));

    let body = &reply.body;
    let request_section = body.find("{\"cmd\": 1, \"name\": \"Request\"}").unwrap();
    let request_headers = body.find("\"hash\": \"RequestHeaders\"").unwrap();
    let application = body.find("{\"cmd\": 1, \"name\": \"Application\"}").unwrap();
    let work_open = body.find("{\"cmd\": 1, \"name\": \"Work\"}").unwrap();
    let block = body.find("\"hash\": \"A\"").unwrap();
    let work_close = body[work_open..].find("{\"cmd\": 2}").unwrap() + work_open;
    let response_section = body.find("{\"cmd\": 1, \"name\": \"Response\"}").unwrap();
    let times = body.find("\"hash\": \"ExecutionTimes\"").unwrap();

    assert!(request_section < request_headers);
    assert!(request_headers < application);
    assert!(application < work_open);
    assert!(work_open < block);
    assert!(block < work_close);
    assert!(work_close < response_section);
    assert!(response_section < times);

    // The timing summary includes the total timer.
    assert!(body.contains("total"));
}

#[tokio::test]
async fn test_traced_response_section_records_status_and_body() {
    let reply = send("/plain", true).await;
    let body = &reply.body;
    assert!(body.contains("\"hash\": \"ResponseHeaders\""));
    assert!(body.contains("\"hash\": \"ResponseBody\""));
    assert!(body.contains("\"HTTP Code\": \"200\""));
    assert!(body.contains("\"Content-type\": \"application/json\""));
    // JSON bodies are pretty-printed into the body block.
    assert!(body.contains("\\\"ok\\\": true"));
}

#[tokio::test]
async fn test_breakpoint_halts_at_first_match() {
    let reply = send("/loop?dump=B", true).await;
    let body = &reply.body;
    assert_eq!(body.matches("\"hash\": \"B\"").count(), 1);
    assert!(body.contains("Dump halted at \"B\""));
    assert!(body.contains("reload('-B')"));
    assert!(body.contains("reload('')"));
    assert!(!body.contains("looped"));
    // Open/close records stay balanced even when halted mid-flight.
    assert_eq!(
        body.matches("{\"cmd\": 1").count(),
        body.matches("{\"cmd\": 2}").count()
    );
}

#[tokio::test]
async fn test_skip_prefix_halts_at_second_match() {
    let reply = send("/loop?dump=-B", true).await;
    let body = &reply.body;
    assert_eq!(body.matches("\"hash\": \"B\"").count(), 2);
    assert!(body.contains("Dump halted at \"B\""));
}

#[tokio::test]
async fn test_percent_encoded_skip_prefix_halts_at_second_match() {
    // Clients that encode the breakpoint value must get the same skip
    // semantics as ones sending the literal prefix.
    let reply = send("/loop?dump=%2DB", true).await;
    let body = &reply.body;
    assert_eq!(body.matches("\"hash\": \"B\"").count(), 2);
    assert!(body.contains("Dump halted at \"B\""));
}

#[tokio::test]
async fn test_breakpoint_on_other_hash_does_not_halt() {
    let reply = send("/loop?dump=nomatch", true).await;
    let body = &reply.body;
    assert_eq!(body.matches("\"hash\": \"B\"").count(), 3);
    assert!(!body.contains("haltbox"));
    assert!(body.contains("\"hash\": \"ExecutionTimes\""));
}
