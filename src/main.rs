// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Training-Load-Sync API Server
//!
//! Runs the sync job workers and serves job submission, status polling
//! and training load reads.

use std::sync::Arc;
use training_load_sync::{
    config::Config,
    db::{FirestoreDb, MemoryDb, SyncStore},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Training-Load-Sync API");

    // Firestore when a project is configured, otherwise in-process storage
    let store: Arc<dyn SyncStore> = match &config.gcp_project_id {
        Some(project_id) => {
            let db = FirestoreDb::new(project_id).await?;
            tracing::info!(project = %project_id, "Using Firestore store");
            Arc::new(db)
        }
        None => {
            tracing::warn!("GCP_PROJECT_ID not set, using in-memory store");
            Arc::new(MemoryDb::new())
        }
    };

    let (state, orchestrator) = AppState::new(config.clone(), store);
    let state = Arc::new(state);

    // Reconcile jobs left over from a previous run, then start the workers
    state.queue.recover().await?;
    let _workers = state.queue.start(Arc::new(orchestrator));

    // Build router
    let app = training_load_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("training_load_sync=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
