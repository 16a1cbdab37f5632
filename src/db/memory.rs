// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process store used when no GCP project is configured, and by tests.

use crate::db::{daily_totals, SyncStore, UpsertOutcome};
use crate::error::AppError;
use crate::models::{
    Activity, DailyStress, FtpEntry, JobId, SegmentEffort, SyncJob, TrainingLoadPoint,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    activities: HashMap<u64, Activity>,
    segment_efforts: HashMap<u64, SegmentEffort>,
    training_load: BTreeMap<NaiveDate, TrainingLoadPoint>,
    ftp_history: BTreeMap<NaiveDate, u32>,
    jobs: HashMap<JobId, SyncJob>,
}

/// Memory-backed [`SyncStore`]; share it behind an `Arc`.
#[derive(Default)]
pub struct MemoryDb {
    tables: RwLock<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn activity_count(&self) -> usize {
        self.read().activities.len()
    }

    pub fn segment_effort_count(&self) -> usize {
        self.read().segment_efforts.len()
    }

    pub fn training_load_count(&self) -> usize {
        self.read().training_load.len()
    }
}

fn upsert<K, V>(map: &mut HashMap<K, V>, key: K, value: &V) -> UpsertOutcome
where
    K: std::hash::Hash + Eq,
    V: Clone + PartialEq,
{
    match map.get(&key) {
        Some(existing) if existing == value => UpsertOutcome::Unchanged,
        Some(_) => {
            map.insert(key, value.clone());
            UpsertOutcome::Updated
        }
        None => {
            map.insert(key, value.clone());
            UpsertOutcome::Created
        }
    }
}

fn oldest_unvisited(
    activities: &HashMap<u64, Activity>,
    limit: u32,
    visited: impl Fn(&Activity) -> bool,
) -> Vec<Activity> {
    let mut pending: Vec<Activity> = activities
        .values()
        .filter(|a| !visited(a))
        .cloned()
        .collect();
    pending.sort_by_key(|a| (a.start_date, a.strava_activity_id));
    pending.truncate(limit as usize);
    pending
}

#[async_trait]
impl SyncStore for MemoryDb {
    async fn upsert_activity(&self, activity: &Activity) -> Result<UpsertOutcome, AppError> {
        Ok(upsert(
            &mut self.write().activities,
            activity.strava_activity_id,
            activity,
        ))
    }

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError> {
        Ok(self.read().activities.get(&activity_id).cloned())
    }

    async fn latest_activity_start(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self.read().activities.values().map(|a| a.start_date).max())
    }

    async fn earliest_activity_date(&self) -> Result<Option<NaiveDate>, AppError> {
        Ok(self.read().activities.values().map(|a| a.local_date).min())
    }

    async fn activities_needing_streams(&self, limit: u32) -> Result<Vec<Activity>, AppError> {
        Ok(oldest_unvisited(&self.read().activities, limit, |a| {
            a.streams_synced
        }))
    }

    async fn activities_needing_segments(&self, limit: u32) -> Result<Vec<Activity>, AppError> {
        Ok(oldest_unvisited(&self.read().activities, limit, |a| {
            a.segments_synced
        }))
    }

    async fn activities_since(&self, date: NaiveDate) -> Result<Vec<Activity>, AppError> {
        let mut found: Vec<Activity> = self
            .read()
            .activities
            .values()
            .filter(|a| a.local_date >= date)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.start_date);
        Ok(found)
    }

    async fn get_daily_stress_totals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStress>, AppError> {
        Ok(daily_totals(start, end, self.read().activities.values()))
    }

    async fn upsert_segment_effort(
        &self,
        effort: &SegmentEffort,
    ) -> Result<UpsertOutcome, AppError> {
        Ok(upsert(
            &mut self.write().segment_efforts,
            effort.effort_id,
            effort,
        ))
    }

    async fn get_training_load(
        &self,
        date: NaiveDate,
    ) -> Result<Option<TrainingLoadPoint>, AppError> {
        Ok(self.read().training_load.get(&date).copied())
    }

    async fn put_training_load(&self, point: &TrainingLoadPoint) -> Result<(), AppError> {
        self.write().training_load.insert(point.date, *point);
        Ok(())
    }

    async fn put_training_loads(&self, points: &[TrainingLoadPoint]) -> Result<(), AppError> {
        let mut tables = self.write();
        for point in points {
            tables.training_load.insert(point.date, *point);
        }
        Ok(())
    }

    async fn latest_training_load_before(
        &self,
        date: NaiveDate,
    ) -> Result<Option<TrainingLoadPoint>, AppError> {
        Ok(self
            .read()
            .training_load
            .range(..date)
            .next_back()
            .map(|(_, p)| *p))
    }

    async fn latest_training_load_date(&self) -> Result<Option<NaiveDate>, AppError> {
        Ok(self.read().training_load.keys().next_back().copied())
    }

    async fn training_load_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingLoadPoint>, AppError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .read()
            .training_load
            .range(start..=end)
            .map(|(_, p)| *p)
            .collect())
    }

    async fn ftp_for_date(&self, date: NaiveDate) -> Result<Option<u32>, AppError> {
        Ok(self
            .read()
            .ftp_history
            .range(..=date)
            .next_back()
            .map(|(_, ftp)| *ftp))
    }

    async fn put_ftp(&self, entry: &FtpEntry) -> Result<(), AppError> {
        self.write().ftp_history.insert(entry.date, entry.ftp);
        Ok(())
    }

    async fn put_job(&self, job: &SyncJob) -> Result<(), AppError> {
        self.write().jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<SyncJob>, AppError> {
        let mut jobs: Vec<SyncJob> = self.read().jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.submitted_at);
        Ok(jobs)
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), AppError> {
        self.write().jobs.remove(&job_id);
        Ok(())
    }
}
