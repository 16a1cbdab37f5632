// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync job records and their state machine.
//!
//! ```text
//! Queued ──▶ Running ──▶ Succeeded
//!                    └──▶ Failed
//! ```
//!
//! `Succeeded` and `Failed` are terminal. A rerun is a new job.

use crate::error::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use uuid::Uuid;

pub type JobId = Uuid;

/// Workload class of a sync job. At most one job per type is pending at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Activity list sync (paginated summaries)
    Activities,
    /// Segment efforts for activities not yet visited
    Segments,
    /// Power streams for activities not yet visited
    Streams,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Activities, JobType::Segments, JobType::Streams];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Activities => "activities",
            JobType::Segments => "segments",
            JobType::Streams => "streams",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activities" => Ok(JobType::Activities),
            "segments" => Ok(JobType::Segments),
            "streams" => Ok(JobType::Streams),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Progress counters, updated as pages and records are processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct JobProgress {
    /// Pages (or per-activity fetches) completed
    pub pages: u32,
    /// Records received from Strava
    pub fetched: u32,
    pub created: u32,
    pub updated: u32,
    /// Records rejected by validation or left unchanged
    pub skipped: u32,
}

/// A unit of sync work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub job_type: JobType,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// HTTP attempts issued on behalf of this job, retries included
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub progress: JobProgress,
    #[serde(default)]
    pub error: Option<JobError>,
}

impl SyncJob {
    pub fn new(job_type: JobType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            state: JobState::Queued,
            submitted_at: now,
            started_at: None,
            finished_at: None,
            attempts: 0,
            progress: JobProgress::default(),
            error: None,
        }
    }

    /// The single transition function. Anything other than
    /// `Queued -> Running`, `Running -> Succeeded` and `Running -> Failed`
    /// is rejected and leaves the job untouched.
    pub fn transition(
        &mut self,
        next: JobState,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match (self.state, next) {
            (JobState::Queued, JobState::Running) => {
                self.started_at = Some(now);
            }
            (JobState::Running, JobState::Succeeded) | (JobState::Running, JobState::Failed) => {
                self.finished_at = Some(now);
            }
            (from, to) => return Err(TransitionError { from, to }),
        }
        self.state = next;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobState::Running, now)
    }

    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobState::Succeeded, now)
    }

    pub fn fail(&mut self, error: JobError, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobState::Failed, now)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id,
            job_type: self.job_type,
            state: self.state,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            attempts: self.attempts,
            progress: self.progress.clone(),
            error: self.error.clone(),
        }
    }
}

/// Polling projection of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct JobView {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub job_id: JobId,
    pub job_type: JobType,
    pub state: JobState,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub submitted_at: DateTime<Utc>,
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub started_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub progress: JobProgress,
    pub error: Option<JobError>,
}
