//! Job API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use reelfetch_core::{AcquisitionError, AttemptRecord, Job, JobError, JobStatus, JobStoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    /// Remote video URL to acquire
    pub target: String,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: String,
    pub target: String,
    pub status: JobStatus,
    pub progress: f32,
    pub created_at: String,
    pub updated_at: String,
    pub result_ref: Option<String>,
    pub last_error: Option<JobError>,
    pub attempts: Vec<AttemptRecord>,
    pub durability_degraded: bool,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            target: job.target,
            status: job.status,
            progress: job.progress,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            result_ref: job.result_ref,
            last_error: job.last_error,
            attempts: job.attempts,
            durability_degraded: job.durability_degraded,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn error_response(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(JobErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn store_error(e: JobStoreError) -> ApiError {
    match e {
        JobStoreError::NotFound(id) => {
            error_response(StatusCode::NOT_FOUND, format!("Job not found: {}", id))
        }
        e @ (JobStoreError::InvalidTransition { .. } | JobStoreError::InvalidUpdate { .. }) => {
            error_response(StatusCode::CONFLICT, e)
        }
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other),
    }
}

fn acquisition_error(e: AcquisitionError) -> ApiError {
    match e {
        e @ AcquisitionError::InvalidTarget(_) => error_response(StatusCode::BAD_REQUEST, e),
        e @ AcquisitionError::ShuttingDown => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
        AcquisitionError::Store(inner) => store_error(inner),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new acquisition job
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let job = state
        .scheduler()
        .submit(body.target.trim())
        .map_err(acquisition_error)?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// Get a job by ID, including its attempt log
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.jobs().get_job(&id).map_err(store_error)?;
    Ok(Json(JobResponse::from(job)))
}

/// Cancel a job (DELETE endpoint)
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.scheduler().cancel(&id).map_err(acquisition_error)?;
    Ok(Json(JobResponse::from(job)))
}
