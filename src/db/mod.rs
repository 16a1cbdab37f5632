// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! Sync code talks to storage only through [`SyncStore`]. Two backends
//! implement it: [`FirestoreDb`] for deployments and [`MemoryDb`] for local
//! runs and tests.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::{
    Activity, DailyStress, FtpEntry, JobId, SegmentEffort, SyncJob, TrainingLoadPoint,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Collection names as constants.
pub mod collections {
    pub const ACTIVITIES: &str = "activities";
    pub const SEGMENT_EFFORTS: &str = "segment_efforts";
    /// Daily CTL/ATL/TSB points (keyed by ISO date)
    pub const TRAINING_LOAD: &str = "training_load";
    pub const FTP_HISTORY: &str = "ftp_history";
    pub const SYNC_JOBS: &str = "sync_jobs";
}

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Stored record was already identical; nothing written
    Unchanged,
}

/// Read/write contract for everything the sync engine persists.
///
/// Every method is safe to repeat with identical input.
#[async_trait]
pub trait SyncStore: Send + Sync {
    // ─── Activities ──────────────────────────────────────────────

    async fn upsert_activity(&self, activity: &Activity) -> Result<UpsertOutcome, AppError>;

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError>;

    /// Start time of the most recent stored activity.
    async fn latest_activity_start(&self) -> Result<Option<DateTime<Utc>>, AppError>;

    /// Local date of the oldest stored activity.
    async fn earliest_activity_date(&self) -> Result<Option<NaiveDate>, AppError>;

    /// Oldest activities whose streams have not been synced yet.
    async fn activities_needing_streams(&self, limit: u32) -> Result<Vec<Activity>, AppError>;

    /// Oldest activities whose segment efforts have not been synced yet.
    async fn activities_needing_segments(&self, limit: u32) -> Result<Vec<Activity>, AppError>;

    /// Activities on or after `date` (local), oldest first.
    async fn activities_since(&self, date: NaiveDate) -> Result<Vec<Activity>, AppError>;

    /// Per-day stress totals for `start..=end`, ascending, with rest days as zero.
    async fn get_daily_stress_totals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStress>, AppError>;

    // ─── Segment Efforts ─────────────────────────────────────────

    async fn upsert_segment_effort(&self, effort: &SegmentEffort)
        -> Result<UpsertOutcome, AppError>;

    // ─── Training Load ───────────────────────────────────────────

    async fn get_training_load(&self, date: NaiveDate)
        -> Result<Option<TrainingLoadPoint>, AppError>;

    async fn put_training_load(&self, point: &TrainingLoadPoint) -> Result<(), AppError>;

    /// Write a run of points. Backends may parallelize.
    async fn put_training_loads(&self, points: &[TrainingLoadPoint]) -> Result<(), AppError> {
        for point in points {
            self.put_training_load(point).await?;
        }
        Ok(())
    }

    /// Latest stored point strictly before `date`.
    async fn latest_training_load_before(
        &self,
        date: NaiveDate,
    ) -> Result<Option<TrainingLoadPoint>, AppError>;

    async fn latest_training_load_date(&self) -> Result<Option<NaiveDate>, AppError>;

    /// Stored points in `start..=end`, ascending.
    async fn training_load_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingLoadPoint>, AppError>;

    // ─── FTP History ─────────────────────────────────────────────

    /// FTP in effect on `date` (latest entry on or before it).
    async fn ftp_for_date(&self, date: NaiveDate) -> Result<Option<u32>, AppError>;

    async fn put_ftp(&self, entry: &FtpEntry) -> Result<(), AppError>;

    // ─── Jobs ────────────────────────────────────────────────────

    async fn put_job(&self, job: &SyncJob) -> Result<(), AppError>;

    async fn list_jobs(&self) -> Result<Vec<SyncJob>, AppError>;

    async fn delete_job(&self, job_id: JobId) -> Result<(), AppError>;
}

/// Fold per-activity stress into one entry per day of `start..=end`.
pub(crate) fn daily_totals<'a>(
    start: NaiveDate,
    end: NaiveDate,
    activities: impl IntoIterator<Item = &'a Activity>,
) -> Vec<DailyStress> {
    let mut totals: Vec<DailyStress> = crate::time_utils::days_inclusive(start, end)
        .map(|d| DailyStress::new(d, 0.0))
        .collect();
    for activity in activities {
        if activity.local_date < start || activity.local_date > end {
            continue;
        }
        let idx = (activity.local_date - start).num_days() as usize;
        if let Some(day) = totals.get_mut(idx) {
            day.stress += activity.training_stress;
        }
    }
    totals
}
