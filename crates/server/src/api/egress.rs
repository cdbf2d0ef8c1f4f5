//! Egress pool API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use reelfetch_core::{EgressError, PoolStats, RouteSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct EgressResponse {
    pub stats: PoolStats,
    pub routes: Vec<RouteSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct AddRouteBody {
    /// `scheme://[user:pass@]host:port`
    pub route: String,
}

#[derive(Debug, Serialize)]
pub struct AddRouteResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct TestRouteResponse {
    pub id: String,
    pub healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct EgressErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<EgressErrorResponse>);

fn egress_error(e: EgressError) -> ApiError {
    let status = match e {
        EgressError::UnknownRoute(_) => StatusCode::NOT_FOUND,
        EgressError::InvalidRoute { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(EgressErrorResponse {
            error: e.to_string(),
        }),
    )
}

/// Pool stats plus per-route snapshots. Credentials never leave the pool.
pub async fn get_egress(State(state): State<Arc<AppState>>) -> Json<EgressResponse> {
    Json(EgressResponse {
        stats: state.egress().stats(),
        routes: state.egress().snapshot(),
    })
}

pub async fn add_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddRouteBody>,
) -> Result<(StatusCode, Json<AddRouteResponse>), ApiError> {
    let id = state.egress().add_route(&body.route).map_err(egress_error)?;
    Ok((StatusCode::CREATED, Json(AddRouteResponse { id })))
}

pub async fn remove_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.egress().remove_route(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(egress_error(EgressError::UnknownRoute(id)))
    }
}

/// Probe one route now.
pub async fn test_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TestRouteResponse>, ApiError> {
    let healthy = state.egress().test_route(&id).await.map_err(egress_error)?;
    Ok(Json(TestRouteResponse { id, healthy }))
}
