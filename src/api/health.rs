use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::coordinator::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    snapshot_generation: Option<u64>,
}

/// GET /healthz - overall health, degraded until a snapshot has been derived
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let generation = state.coordinator.view().await.map(|v| v.generation);
    let healthy = generation.is_some();

    let response = HealthResponse {
        status: if healthy { "healthy".to_string() } else { "degraded".to_string() },
        timestamp: chrono::Utc::now(),
        snapshot_generation: generation,
    };

    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(response))
}

/// GET /health/ready - ready once a derived snapshot is being served
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.coordinator.view().await.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - the process is running
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}
