//! Strata backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod mcp;
pub mod state;

use state::AppState;

/// Create the Axum application router with fresh, started state.
///
/// This function is used both by the main server binary and by integration
/// tests.
pub fn create_app() -> Router {
    let state = AppState::new();
    state.start();
    create_app_with_state(state)
}

/// Create the Axum application router with a given state.
pub fn create_app_with_state(state: AppState) -> Router {
    // Browser MCP clients need to read the minted session header, and send
    // the protocol/session/resume headers cross-origin. The Origin gate in
    // the handlers is the actual access control; CORS just makes the
    // allowed case work.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("mcp-session-id"),
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([HeaderName::from_static("mcp-session-id")])
        .allow_origin(Any);

    Router::new()
        .route(
            "/mcp",
            post(api::mcp::mcp_post)
                .get(api::mcp::mcp_get)
                .delete(api::mcp::mcp_delete),
        )
        .route("/health", get(api::status::health))
        .route("/stats", get(api::status::stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
