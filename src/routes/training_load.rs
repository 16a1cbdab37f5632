// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Training load reads and rebuild.

use crate::error::{AppError, Result};
use crate::models::TrainingLoadPoint;
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Days returned when the query gives no `from`.
const DEFAULT_RANGE_DAYS: u64 = 90;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/training-load", get(get_training_load))
        .route("/api/training-load/rebuild", post(rebuild))
}

#[derive(Deserialize)]
struct RangeQuery {
    /// First day (YYYY-MM-DD); defaults to 90 days before `to`
    from: Option<NaiveDate>,
    /// Last day (YYYY-MM-DD); defaults to today (UTC)
    to: Option<NaiveDate>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TrainingLoadResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub from: NaiveDate,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub to: NaiveDate,
    pub points: Vec<TrainingLoadPoint>,
}

async fn get_training_load(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<TrainingLoadResponse>> {
    let to = params.to.unwrap_or_else(|| Utc::now().date_naive());
    let from = match params.from {
        Some(from) => from,
        None => to
            .checked_sub_days(Days::new(DEFAULT_RANGE_DAYS - 1))
            .unwrap_or(NaiveDate::MIN),
    };
    if from > to {
        return Err(AppError::BadRequest(
            "'from' must not be after 'to'".to_string(),
        ));
    }

    let points = state.engine.range(from, to).await?;
    tracing::debug!(%from, %to, points = points.len(), "Training load read");
    Ok(Json(TrainingLoadResponse { from, to, points }))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RebuildResponse {
    pub days: usize,
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub from: Option<NaiveDate>,
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub through: Option<NaiveDate>,
}

/// Recompute the whole series from the first stored activity.
async fn rebuild(State(state): State<Arc<AppState>>) -> Result<Json<RebuildResponse>> {
    tracing::info!("Training load rebuild requested");
    let points = state.engine.rebuild().await?;
    Ok(Json(RebuildResponse {
        days: points.len(),
        from: points.first().map(|p| p.date),
        through: points.last().map(|p| p.date),
    }))
}
