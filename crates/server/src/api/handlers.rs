use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use reelfetch_core::{CredentialStatus, SanitizedConfig, SchedulerStatus};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// True while job writes are not reaching the durable tier.
    pub durability_degraded: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let degraded = state.jobs().is_degraded();
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        durability_degraded: degraded,
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

pub async fn get_scheduler_status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler().status())
}

pub async fn get_credentials_status(
    State(state): State<Arc<AppState>>,
) -> Json<CredentialStatus> {
    Json(state.credentials().status())
}

/// Prometheus text exposition.
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::collect_dynamic_metrics(&state);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}
