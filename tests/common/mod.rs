// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use training_load_sync::config::Config;
use training_load_sync::db::{FirestoreDb, MemoryDb};
use training_load_sync::models::{JobId, JobView};
use training_load_sync::routes::create_router;
use training_load_sync::AppState;
use wiremock::MockServer;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Config pointing the Strava client at a mock server, with fast retries
/// and a valid cached access token.
#[allow(dead_code)]
pub fn mock_config(server: &MockServer) -> Config {
    Config {
        strava_api_url: server.uri(),
        strava_oauth_url: format!("{}/oauth/token", server.uri()),
        strava_access_token: Some("test_access_token".to_string()),
        strava_token_expires_at: (Utc::now() + ChronoDuration::hours(6)).timestamp(),
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        max_quota_wait: Duration::ZERO,
        sync_page_size: 2,
        ..Config::default()
    }
}

/// Create a test app backed by a memory store, without workers, so
/// submitted jobs stay queued. Returns the router, the state and the store.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, Arc<MemoryDb>) {
    let store = Arc::new(MemoryDb::new());
    let (state, _orchestrator) = AppState::new(Config::default(), store.clone());
    let state = Arc::new(state);
    (create_router(state.clone()), state, store)
}

/// Create a test app with workers running the real orchestrator.
#[allow(dead_code)]
pub fn create_running_app(config: Config) -> (axum::Router, Arc<AppState>, Arc<MemoryDb>) {
    let store = Arc::new(MemoryDb::new());
    let (state, orchestrator) = AppState::new(config, store.clone());
    let state = Arc::new(state);
    state.queue.start(Arc::new(orchestrator));
    (create_router(state.clone()), state, store)
}

/// Poll a job until it is terminal, like a dashboard would.
#[allow(dead_code)]
pub async fn wait_for_job(state: &AppState, job_id: JobId) -> JobView {
    for _ in 0..500 {
        let view = state.queue.status(job_id).expect("job should exist");
        if view.state.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

/// Strava activity summary as returned by `/athlete/activities`.
#[allow(dead_code)]
pub fn activity_json(id: u64, date: NaiveDate) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("Morning Ride {id}"),
        "sport_type": "Ride",
        "start_date": format!("{date}T15:00:00Z"),
        "start_date_local": format!("{date}T08:00:00Z"),
        "distance": 40000.0,
        "moving_time": 5400,
        "elapsed_time": 6000,
        "total_elevation_gain": 350.0,
        "average_speed": 7.4,
        "max_speed": 15.2,
    })
}

#[allow(dead_code)]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
