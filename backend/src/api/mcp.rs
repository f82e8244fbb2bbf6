//! MCP Streamable HTTP endpoint handlers.
//!
//! Implements the MCP Streamable HTTP transport specification.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC messages (returns 202, JSON or SSE)
//! - `GET /mcp` - Open SSE stream for server-initiated messages
//! - `DELETE /mcp` - Terminate a session

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use strata_types::jsonrpc::{is_initialize_request, ClassifiedBatch, JsonRpcMessage};
use strata_types::{
    AckResponse, StreamEventKind, DEFAULT_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

use crate::mcp::{ClientConnection, StreamItem, QUEUE_WAIT};
use crate::state::AppState;

/// Header name for MCP session ID.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header name for the negotiated protocol version.
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header a resuming client uses to request replay.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Validate Origin header for DNS rebinding protection.
///
/// The server only ever binds loopback, so browser requests must come from
/// a localhost origin. Requests without an Origin header are accepted
/// (non-browser clients).
fn validate_origin(headers: &HeaderMap) -> bool {
    if let Some(origin) = headers.get(header::ORIGIN) {
        if let Ok(origin_str) = origin.to_str() {
            if origin_str.starts_with("http://localhost")
                || origin_str.starts_with("https://localhost")
                || origin_str.starts_with("http://127.0.0.1")
                || origin_str.starts_with("https://127.0.0.1")
            {
                return true;
            }
            warn!("Rejecting MCP request from origin: {}", origin_str);
            return false;
        }
        // Unparseable Origin value
        return false;
    }
    true
}

/// Validate the protocol version header, defaulting when absent.
fn validate_protocol_version(headers: &HeaderMap) -> Result<String, String> {
    let version = headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
        Ok(version.to_string())
    } else {
        Err(format!("Unsupported protocol version: {}", version))
    }
}

/// Extract session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn forbidden_origin() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": "Forbidden: Invalid origin"})),
    )
        .into_response()
}

fn client_info(protocol_version: &str) -> HashMap<String, String> {
    HashMap::from([(
        "protocol_version".to_string(),
        protocol_version.to_string(),
    )])
}

/// POST /mcp - Handle inbound JSON-RPC messages.
///
/// Pure notifications and responses are acknowledged with 202. A body
/// containing a request either opens an SSE stream (when the client
/// accepts `text/event-stream`) or gets a small JSON acknowledgement; an
/// `initialize` without a session mints one and returns it in the
/// `Mcp-Session-Id` response header.
pub async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !validate_origin(&headers) {
        return forbidden_origin();
    }

    let protocol_version = match validate_protocol_version(&headers) {
        Ok(v) => v,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response(),
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("application/json") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Content-Type must be application/json"})),
        )
            .into_response();
    }

    let body: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("Invalid JSON: {}", e)})),
            )
                .into_response();
        }
    };

    let session_id = get_session_id(&headers);
    let is_initialize = is_initialize_request(&body);

    // Initialize is the one request allowed to arrive without a live session.
    if !is_initialize {
        if let Some(ref sid) = session_id {
            if !state.sessions().validate(sid).await {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": "Session not found or expired"})),
                )
                    .into_response();
            }
        }
    }

    let classified = ClassifiedBatch::classify(&body);
    if classified.is_batch {
        state.stats().add_batch();
    }
    state.stats().add_messages(classified.messages.len());
    if classified.invalid > 0 {
        warn!(
            "Dropped {} malformed message(s) from POST body",
            classified.invalid
        );
        state.stats().add_errors(classified.invalid);
    }
    debug!(
        "MCP POST: {} message(s), session={:?}",
        classified.messages.len(),
        session_id
    );

    // Pure notifications/responses need no reply channel.
    if classified.all_notifications() || classified.all_responses() {
        return StatusCode::ACCEPTED.into_response();
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if accept.contains("text/event-stream") {
        let initial: Vec<Value> = classified.messages.iter().map(JsonRpcMessage::to_value).collect();
        return open_stream(
            state,
            &headers,
            initial,
            session_id,
            is_initialize,
            &protocol_version,
        )
        .await;
    }

    let mut response_headers = HeaderMap::new();
    if is_initialize && session_id.is_none() {
        let new_session_id = state.sessions().create(client_info(&protocol_version)).await;
        info!("MCP: New session initialized: {}", new_session_id);
        if let Ok(hv) = HeaderValue::from_str(&new_session_id) {
            response_headers.insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(AckResponse {
            status: "received".to_string(),
            message_count: classified.messages.len(),
        }),
    )
        .into_response()
}

/// GET /mcp - Open an SSE stream for server-initiated messages.
///
/// A `Mcp-Session-Id` header, when present, must already be valid; GET
/// never creates a session. Honors `Last-Event-ID` for replay.
pub async fn mcp_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_origin(&headers) {
        return forbidden_origin();
    }

    let protocol_version = match validate_protocol_version(&headers) {
        Ok(v) => v,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response(),
    };

    let session_id = get_session_id(&headers);
    if let Some(ref sid) = session_id {
        if !state.sessions().validate(sid).await {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Session not found"})),
            )
                .into_response();
        }
    }

    open_stream(state, &headers, Vec::new(), session_id, false, &protocol_version).await
}

/// DELETE /mcp - Terminate a session.
///
/// Termination is idempotent: terminating an unknown or already-terminated
/// session succeeds the same way.
pub async fn mcp_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_origin(&headers) {
        return forbidden_origin();
    }

    let session_id = match get_session_id(&headers) {
        Some(id) => id,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Mcp-Session-Id header required"})),
            )
                .into_response();
        }
    };

    state.sessions().terminate(&session_id).await;
    StatusCode::NO_CONTENT.into_response()
}

/// Shared stream bring-up for POST- and GET-opened streams.
///
/// Registers a connection, queues replay and initial messages, emits the
/// `connected` event and hands the queue to the service loop. The
/// connection is deregistered on every exit path via a drop guard.
async fn open_stream(
    state: AppState,
    headers: &HeaderMap,
    initial_messages: Vec<Value>,
    session_id: Option<String>,
    is_initialize: bool,
    protocol_version: &str,
) -> Response {
    // Origin is re-checked so the stream path stays safe even if a new
    // caller skips the gate.
    if !validate_origin(headers) {
        return forbidden_origin();
    }

    let session_id = match session_id {
        Some(id) => Some(id),
        None if is_initialize => {
            let id = state.sessions().create(client_info(protocol_version)).await;
            info!("MCP: New session initialized: {}", id);
            Some(id)
        }
        None => None,
    };

    let (connection, queue) = state.connections().register(session_id.clone());
    info!("MCP: SSE stream opened for {}", connection.id);

    // Replay first so a resuming client sees history before live traffic.
    if let Some(last_event_id) = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        let replayed = state.event_log().replay_after(last_event_id);
        info!(
            "Resuming {} from event {}: {} event(s) to replay",
            connection.id,
            last_event_id,
            replayed.len()
        );
        for record in replayed {
            if let Err(e) = connection.enqueue(StreamItem::Replay {
                event_id: record.event_id,
                data: record.data,
            }) {
                warn!("Failed to queue replay for {}: {}", connection.id, e);
            }
        }
    }

    // Initial messages fan out to every open connection, this one included.
    for message in &initial_messages {
        state.broadcast_message(message);
    }

    if let Err(e) = connection.enqueue(StreamItem::Connected) {
        warn!("Failed to queue connected event for {}: {}", connection.id, e);
    }

    let stream = service_stream(state, connection, queue);

    let mut response = Sse::new(stream).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response_headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response_headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    if let Some(ref sid) = session_id {
        if let Ok(hv) = HeaderValue::from_str(sid) {
            response_headers.insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
        }
    }
    response
}

/// Deregisters the connection on every stream exit path, including a
/// client disconnect that drops the body mid-flight.
struct StreamGuard {
    state: AppState,
    id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.connections().remove(&self.id);
        debug!("Stream for {} finished", self.id);
    }
}

/// The per-connection service loop.
///
/// Dequeues items and writes one SSE record per item. Waiting longer than
/// the queue bound is not an error: the loop feeds a ping through its own
/// queue, so ordering stays total with the sweeper's pings. Every event
/// actually written is assigned the next event id and recorded for replay;
/// replayed items keep their original ids and are not re-recorded.
fn service_stream(
    state: AppState,
    connection: Arc<ClientConnection>,
    mut queue: mpsc::Receiver<StreamItem>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = StreamGuard {
            state: state.clone(),
            id: connection.id.clone(),
        };
        loop {
            match tokio::time::timeout(QUEUE_WAIT, queue.recv()).await {
                Ok(None) => break,
                Ok(Some(item)) => match item {
                    StreamItem::Close => break,
                    StreamItem::Replay { event_id, data } => {
                        yield Ok(sse_record(event_id, StreamEventKind::Message, data));
                    }
                    StreamItem::Connected => {
                        let data = json!({"client_id": connection.id}).to_string();
                        yield Ok(deliver(&state, &connection, StreamEventKind::Connected, data));
                    }
                    StreamItem::Message(data) => {
                        yield Ok(deliver(&state, &connection, StreamEventKind::Message, data));
                    }
                    StreamItem::Batch(data) => {
                        yield Ok(deliver(&state, &connection, StreamEventKind::Batch, data));
                    }
                    StreamItem::Ping(ts) => {
                        connection.touch_ping();
                        let data = json!({"timestamp": ts}).to_string();
                        yield Ok(deliver(&state, &connection, StreamEventKind::Ping, data));
                    }
                },
                Err(_) => {
                    // Queue idle past the wait bound: self-sustaining keepalive.
                    let _ = connection.enqueue(StreamItem::Ping(
                        chrono::Utc::now().timestamp_millis(),
                    ));
                }
            }
        }
    }
}

/// Assign an event id, record the event for replay and build the record.
fn deliver(
    state: &AppState,
    connection: &ClientConnection,
    kind: StreamEventKind,
    data: String,
) -> Event {
    let event_id = connection.next_event_id();
    state
        .event_log()
        .record(&connection.id, event_id.clone(), data.clone());
    sse_record(event_id, kind, data)
}

fn sse_record(event_id: String, kind: StreamEventKind, data: String) -> Event {
    Event::default().id(event_id).event(kind.as_str()).data(data)
}
