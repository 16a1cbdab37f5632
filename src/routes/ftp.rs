// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! FTP history import.

use crate::error::{AppError, Result};
use crate::models::FtpEntry;
use crate::services::{import_ftp_history, FtpImportSummary};
use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ftp", post(import))
}

#[derive(Debug, Deserialize, Serialize, Validate)]
struct FtpEntryInput {
    /// First day (YYYY-MM-DD) the value applies
    date: NaiveDate,
    #[validate(range(min = 1, max = 2000))]
    ftp: u32,
}

#[derive(Debug, Deserialize, Validate)]
struct FtpImportRequest {
    #[validate(length(min = 1), nested)]
    entries: Vec<FtpEntryInput>,
}

/// Store FTP history entries and rebuild training load on top of them.
async fn import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FtpImportRequest>,
) -> Result<Json<FtpImportSummary>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(format!("Invalid FTP history: {e}")))?;

    let entries: Vec<FtpEntry> = body
        .entries
        .iter()
        .map(|e| FtpEntry {
            date: e.date,
            ftp: e.ftp,
        })
        .collect();

    let summary = import_ftp_history(
        state.store.as_ref(),
        &state.engine,
        &entries,
        state.config.default_ftp,
    )
    .await?;
    Ok(Json(summary))
}
