//! Health and statistics endpoints.

use axum::{extract::State, Json};

use strata_types::{ClientStats, HealthResponse, StatsResponse};

use crate::state::AppState;

/// GET /health - liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        transport: "streamable-http".to_string(),
        running: state.is_running(),
        clients: state.connections().len(),
    })
}

/// GET /stats - transport counters and per-connection details.
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let (messages_received, batches_received, errors) = state.stats().snapshot();
    let clients = state
        .connections()
        .all()
        .into_iter()
        .map(|c| {
            let entry = ClientStats {
                last_ping_secs: c.last_ping_elapsed().as_secs_f64(),
                queue_size: c.queue_depth(),
            };
            (c.id.clone(), entry)
        })
        .collect();

    Json(StatsResponse {
        messages_received,
        batches_received,
        errors,
        sessions: state.sessions().count().await,
        clients,
    })
}
