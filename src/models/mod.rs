// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod job;
pub mod training_load;

pub use activity::{Activity, FtpEntry, PowerMetrics, SegmentEffort};
pub use job::{JobId, JobProgress, JobState, JobType, JobView, SyncJob, TransitionError};
pub use training_load::{DailyStress, TrainingLoadPoint};
