// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Training-Load-Sync: rate-limited Strava sync and CTL/ATL/TSB tracking
//!
//! This crate provides the backend that pulls activities, segment efforts
//! and power streams from Strava inside the API quota, and maintains the
//! daily training load series derived from them.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::SyncStore;
use services::{JobQueue, RateLimitTracker, StravaClient, SyncOrchestrator, TrainingLoadEngine};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SyncStore>,
    pub queue: Arc<JobQueue>,
    pub tracker: Arc<RateLimitTracker>,
    pub engine: TrainingLoadEngine,
}

impl AppState {
    /// Wire the services around `store`.
    ///
    /// The returned orchestrator is the runner to hand to [`JobQueue::start`].
    pub fn new(config: Config, store: Arc<dyn SyncStore>) -> (Self, SyncOrchestrator) {
        let tracker = Arc::new(RateLimitTracker::from_config(&config));
        let client = StravaClient::new(&config, Arc::clone(&tracker));
        let engine = TrainingLoadEngine::new(Arc::clone(&store));
        let orchestrator =
            SyncOrchestrator::new(Arc::clone(&store), client, engine.clone(), &config);
        let queue = Arc::new(JobQueue::new(Arc::clone(&store), &config));

        let state = Self {
            config,
            store,
            queue,
            tracker,
            engine,
        };
        (state, orchestrator)
    }
}
