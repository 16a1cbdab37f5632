// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync job submission and status polling.
//!
//! Clients submit a job, then poll its status (every couple of seconds)
//! until it reaches `succeeded` or `failed`.

use crate::error::{AppError, Result};
use crate::models::{JobId, JobType, JobView};
use crate::services::RateLimitSnapshot;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sync/jobs", get(list_jobs))
        .route("/api/sync/jobs/{job_id}", get(get_job))
        .route("/api/sync/usage", get(get_usage))
        .route("/api/sync/{job_type}", post(submit_job))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SubmitResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub job_id: JobId,
}

/// Submit a sync job. Returns the pending job's ID if one of the same type
/// is already queued or running.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    Path(job_type): Path<String>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let job_type: JobType = job_type.parse().map_err(AppError::BadRequest)?;
    let job_id = state.queue.submit(job_type).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>> {
    let job_id: JobId = job_id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid job ID: {job_id}")))?;
    Ok(Json(state.queue.status(job_id)?))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct JobsResponse {
    pub jobs: Vec<JobView>,
}

/// Recent jobs, newest first.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.queue.list(),
    })
}

async fn get_usage(State(state): State<Arc<AppState>>) -> Json<RateLimitSnapshot> {
    Json(state.tracker.snapshot())
}
