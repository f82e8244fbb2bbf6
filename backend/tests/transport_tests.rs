//! Integration tests for the Strata MCP transport.

use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use strata::state::AppState;
use strata::{create_app, create_app_with_state};

/// Helper to create a test app instance.
fn create_test_app() -> Router {
    create_app()
}

/// Helper to create a test app sharing a state handle with the test.
fn create_test_app_with_state() -> (Router, AppState) {
    let state = AppState::new();
    state.start();
    (create_app_with_state(state.clone()), state)
}

fn post_mcp(body: &Value) -> Request<Body> {
    Request::builder()
        .uri("/mcp")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// One parsed SSE record: (id, event, data).
#[derive(Debug, PartialEq)]
struct SseRecord {
    id: String,
    event: String,
    data: String,
}

/// Read the next blank-line-terminated SSE record from a body stream.
async fn read_record(
    stream: &mut (impl Stream<Item = Result<Bytes, axum::Error>> + Unpin),
    buf: &mut String,
) -> SseRecord {
    let raw = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(pos) = buf.find("\n\n") {
                let record = buf[..pos].to_string();
                buf.drain(..pos + 2);
                return record;
            }
            let chunk = stream
                .next()
                .await
                .expect("stream ended unexpectedly")
                .expect("stream error");
            buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .expect("timed out waiting for SSE record");

    let mut id = String::new();
    let mut event = String::new();
    let mut data = String::new();
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("id: ") {
            id = value.to_string();
        } else if let Some(value) = line.strip_prefix("event: ") {
            event = value.to_string();
        } else if let Some(value) = line.strip_prefix("data: ") {
            data = value.to_string();
        }
    }
    SseRecord { id, event, data }
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["transport"], "streamable-http");
    assert_eq!(health["running"], true);
    assert_eq!(health["clients"], 0);
}

#[tokio::test]
async fn test_post_rejects_bad_origin() {
    let app = create_test_app();

    let mut request = post_mcp(&json!({"jsonrpc": "2.0", "method": "notifications/progress"}));
    request
        .headers_mut()
        .insert("origin", "http://evil.example".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_post_accepts_loopback_origins() {
    for origin in ["http://localhost:3000", "http://127.0.0.1:9999"] {
        let app = create_test_app();
        let mut request = post_mcp(&json!({"jsonrpc": "2.0", "method": "notifications/progress"}));
        request.headers_mut().insert("origin", origin.parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED, "origin {}", origin);
    }
}

#[tokio::test]
async fn test_post_accepts_absent_origin() {
    let app = create_test_app();
    let request = post_mcp(&json!({"jsonrpc": "2.0", "method": "notifications/progress"}));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_protocol_version_gate() {
    for version in ["2025-06-18", "2025-03-26", "2024-11-05"] {
        let app = create_test_app();
        let mut request = post_mcp(&json!({"jsonrpc": "2.0", "method": "notifications/progress"}));
        request
            .headers_mut()
            .insert("mcp-protocol-version", version.parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED, "version {}", version);
    }

    let app = create_test_app();
    let mut request = post_mcp(&json!({"jsonrpc": "2.0", "method": "notifications/progress"}));
    request
        .headers_mut()
        .insert("mcp-protocol-version", "2023-01-01".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_requires_json_content_type() {
    let app = create_test_app();

    let request = Request::builder()
        .uri("/mcp")
        .method("POST")
        .header("content-type", "text/plain")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_rejects_malformed_json() {
    let app = create_test_app();

    let request = Request::builder()
        .uri("/mcp")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error = body_json(response).await;
    assert!(error["error"].as_str().unwrap().contains("Invalid JSON"));
}

#[tokio::test]
async fn test_post_rejects_unknown_session() {
    let app = create_test_app();

    let mut request = post_mcp(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}));
    request
        .headers_mut()
        .insert("mcp-session-id", "no-such-session".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_post_all_responses_batch_accepted() {
    let app = create_test_app();

    let request = post_mcp(&json!([
        {"jsonrpc": "2.0", "id": 1, "result": {}},
        {"jsonrpc": "2.0", "id": 2, "error": {"code": -32000, "message": "failed"}},
    ]));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_post_all_malformed_batch_accepted() {
    // Accepted limitation: a batch with no valid messages is vacuously
    // "all notifications" and acknowledged rather than rejected.
    let app = create_test_app();

    let request = post_mcp(&json!([{"nonsense": true}]));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_post_request_without_accept_gets_json_ack() {
    let app = create_test_app();

    let request = post_mcp(&json!([
        {"jsonrpc": "2.0", "id": 1, "method": "datasets/read"},
        {"jsonrpc": "2.0", "method": "notifications/progress"},
    ]));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ack = body_json(response).await;
    assert_eq!(ack["status"], "received");
    assert_eq!(ack["message_count"], 2);
}

#[tokio::test]
async fn test_initialize_mints_session() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(post_mcp(&json!({
            "jsonrpc": "2.0", "id": 0, "method": "initialize",
            "params": {"protocolVersion": "2025-06-18"}
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let session_id = response
        .headers()
        .get("mcp-session-id")
        .expect("session header missing")
        .to_str()
        .unwrap()
        .to_string();
    assert!(!session_id.is_empty());

    // The minted session is accepted on a follow-up request.
    let mut request = post_mcp(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}));
    request
        .headers_mut()
        .insert("mcp-session-id", session_id.parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_delete_session_is_idempotent() {
    let app = create_test_app();

    let response = app
        .clone()
        .oneshot(post_mcp(&json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})))
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/mcp")
                    .method("DELETE")
                    .header("mcp-session-id", &session_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    // Unknown session id also terminates without error.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .method("DELETE")
                .header("mcp-session-id", "never-existed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Missing header is the only error case.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .method("DELETE")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_stream_rejects_unknown_session() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .header("mcp-session-id", "no-such-session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_stream_rejects_bad_origin() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .header("origin", "http://evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_get_opens_stream_with_connected_event() {
    let app = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );

    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();
    let record = read_record(&mut stream, &mut buf).await;

    assert_eq!(record.event, "connected");
    assert_eq!(record.id, "client_1_1");
    let data: Value = serde_json::from_str(&record.data).unwrap();
    assert_eq!(data["client_id"], "client_1");
}

#[tokio::test]
async fn test_post_with_sse_accept_opens_seeded_stream() {
    let app = create_test_app();

    let mut request = post_mcp(&json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"}));
    request
        .headers_mut()
        .insert("accept", "text/event-stream".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("mcp-session-id").is_some());

    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();

    // The initial request fans out to the new stream, then `connected`.
    let first = read_record(&mut stream, &mut buf).await;
    assert_eq!(first.event, "message");
    let echoed: Value = serde_json::from_str(&first.data).unwrap();
    assert_eq!(echoed["method"], "initialize");

    let second = read_record(&mut stream, &mut buf).await;
    assert_eq!(second.event, "connected");
}

#[tokio::test]
async fn test_broadcast_order_and_increasing_event_ids() {
    let (app, state) = create_test_app_with_state();

    let response = app
        .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();

    let connected = read_record(&mut stream, &mut buf).await;
    assert_eq!(connected.event, "connected");

    for n in 1..=5 {
        state.broadcast_message(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/datasets/changed",
            "params": {"seq": n}
        }));
    }

    let mut last_counter = 1u64;
    for n in 1..=5 {
        let record = read_record(&mut stream, &mut buf).await;
        assert_eq!(record.event, "message");

        let payload: Value = serde_json::from_str(&record.data).unwrap();
        assert_eq!(payload["params"]["seq"], n);

        let counter: u64 = record.id.rsplit_once('_').unwrap().1.parse().unwrap();
        assert!(counter > last_counter, "ids must be strictly increasing");
        last_counter = counter;
    }
}

#[tokio::test]
async fn test_broadcast_batch_delivers_one_batch_event() {
    let (app, state) = create_test_app_with_state();

    let response = app
        .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();
    read_record(&mut stream, &mut buf).await; // connected

    state.broadcast_batch(&[
        json!({"jsonrpc": "2.0", "method": "notifications/a"}),
        json!({"jsonrpc": "2.0", "method": "notifications/b"}),
    ]);

    let record = read_record(&mut stream, &mut buf).await;
    assert_eq!(record.event, "batch");
    let payload: Value = serde_json::from_str(&record.data).unwrap();
    assert_eq!(payload.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_reconnect_replays_events_after_last_event_id() {
    let (app, state) = create_test_app_with_state();

    // First connection: connected + 10 messages.
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();
    read_record(&mut stream, &mut buf).await; // connected, client_1_1

    for n in 1..=10 {
        state.broadcast_message(&json!({"jsonrpc": "2.0", "method": "m", "params": {"n": n}}));
    }
    let mut delivered = Vec::new();
    for _ in 0..10 {
        delivered.push(read_record(&mut stream, &mut buf).await);
    }
    drop(stream); // client disconnects

    // Resume after the 5th message (event id client_1_6).
    let resume_from = delivered[4].id.clone();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .header("last-event-id", &resume_from)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();

    // Exactly messages 6..10 replay, with their original ids, before the
    // new stream's connected event.
    for expected in &delivered[5..] {
        let record = read_record(&mut stream, &mut buf).await;
        assert_eq!(record.event, "message");
        assert_eq!(record.id, expected.id);
        assert_eq!(record.data, expected.data);
    }
    let connected = read_record(&mut stream, &mut buf).await;
    assert_eq!(connected.event, "connected");
}

#[tokio::test]
async fn test_resume_with_pruned_event_id_replays_nothing() {
    // Accepted limitation: an id older than the retained window is
    // indistinguishable from "nothing to replay".
    let (app, state) = create_test_app_with_state();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();
    let connected = read_record(&mut stream, &mut buf).await;
    let first_id = connected.id.clone();

    for n in 0..150 {
        state.broadcast_message(&json!({"jsonrpc": "2.0", "method": "m", "params": {"n": n}}));
    }
    for _ in 0..150 {
        read_record(&mut stream, &mut buf).await;
    }
    drop(stream);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .header("last-event-id", &first_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let mut stream = response.into_body().into_data_stream();
    let mut buf = String::new();

    // No replay: the first record is the new stream's connected event.
    let record = read_record(&mut stream, &mut buf).await;
    assert_eq!(record.event, "connected");
}

#[tokio::test]
async fn test_stats_endpoint_reports_counters_and_clients() {
    let (app, state) = create_test_app_with_state();

    // One single message, one batch of two, one malformed item.
    app.clone()
        .oneshot(post_mcp(&json!({"jsonrpc": "2.0", "method": "notifications/progress"})))
        .await
        .unwrap();
    app.clone()
        .oneshot(post_mcp(&json!([
            {"jsonrpc": "2.0", "id": 1, "result": {}},
            {"jsonrpc": "2.0", "id": 2, "result": {}},
            {"nonsense": true},
        ])))
        .await
        .unwrap();

    let (_conn, _rx) = state.connections().register(None);

    let response = app
        .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = body_json(response).await;
    assert_eq!(stats["messages_received"], 3);
    assert_eq!(stats["batches_received"], 1);
    assert_eq!(stats["errors"], 1);
    let clients = stats["clients"].as_object().unwrap();
    assert_eq!(clients.len(), 1);
    let client = clients.values().next().unwrap();
    assert_eq!(client["queue_size"], 0);
    assert!(client["last_ping_secs"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_shutdown_clears_state_and_health_reflects_it() {
    let (app, state) = create_test_app_with_state();

    app.clone()
        .oneshot(post_mcp(&json!({"jsonrpc": "2.0", "id": 0, "method": "initialize"})))
        .await
        .unwrap();

    state.shutdown().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let health = body_json(response).await;
    assert_eq!(health["running"], false);
    assert_eq!(health["clients"], 0);
}
