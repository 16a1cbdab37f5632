// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod ftp;
pub mod jobs;
pub mod power;
pub mod rate_limit;
pub mod retry;
pub mod strava;
pub mod sync;
pub mod training_load;

pub use ftp::{import_ftp_history, FtpImportSummary};
pub use jobs::{JobQueue, JobRunner, RecoveryReport};
pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};
pub use retry::RetryPolicy;
pub use strava::{StravaAuth, StravaClient};
pub use sync::{JobContext, SyncOrchestrator, SyncSummary};
pub use training_load::TrainingLoadEngine;
