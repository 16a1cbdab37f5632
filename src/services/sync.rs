// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync orchestration.
//!
//! Each job runs the same sequence:
//! 1. Fetch pages (or per-activity resources) through the retrying client
//! 2. Validate each record; invalid records are logged, counted and skipped
//! 3. Upsert keyed by the Strava ID
//! 4. Collect the dates whose daily stress changed
//! 5. Recompute training load from the earliest changed date
//!
//! Records persisted before a fatal error stay persisted. The training load
//! is still brought up to date for them before the error is returned.

use crate::config::Config;
use crate::db::{SyncStore, UpsertOutcome};
use crate::error::{ApiError, JobError};
use crate::models::{Activity, JobId, JobProgress, JobType, SegmentEffort};
use crate::services::power::{self, activity_stress};
use crate::services::strava::{
    CallObserver, StravaActivitySummary, StravaClient, StravaSegmentEffort,
};
use crate::services::training_load::TrainingLoadEngine;
use chrono::{Datelike, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use validator::Validate;

/// Streams are not requested for activities recorded before this year.
const STREAMS_FIRST_YEAR: i32 = 2013;

// ─── Job Context ─────────────────────────────────────────────────────────────

/// Live counters for one running job, readable while the job runs.
#[derive(Debug)]
pub struct JobContext {
    pub job_id: JobId,
    pages: AtomicU32,
    fetched: AtomicU32,
    created: AtomicU32,
    updated: AtomicU32,
    skipped: AtomicU32,
    attempts: AtomicU32,
}

impl JobContext {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            pages: AtomicU32::new(0),
            fetched: AtomicU32::new(0),
            created: AtomicU32::new(0),
            updated: AtomicU32::new(0),
            skipped: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            pages: self.pages.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// HTTP attempts issued so far, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn page_done(&self, records: usize) {
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.fetched
            .fetch_add(u32::try_from(records).unwrap_or(u32::MAX), Ordering::Relaxed);
    }

    fn record(&self, outcome: UpsertOutcome) {
        let counter = match outcome {
            UpsertOutcome::Created => &self.created,
            UpsertOutcome::Updated => &self.updated,
            UpsertOutcome::Unchanged => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
}

impl CallObserver for JobContext {
    fn on_attempt(&self, endpoint: &str, status: Option<u16>) {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(job_id = %self.job_id, endpoint, ?status, attempt, "Strava attempt");
    }
}

/// What a successful job did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    /// Earliest date whose daily stress changed (training load recomputed from here)
    pub earliest_changed: Option<NaiveDate>,
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Runs sync jobs against the store, the client and the training load engine.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: Arc<dyn SyncStore>,
    client: StravaClient,
    engine: TrainingLoadEngine,
    page_size: u32,
    max_pages: u32,
    max_items: u32,
    default_ftp: u32,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        client: StravaClient,
        engine: TrainingLoadEngine,
        config: &Config,
    ) -> Self {
        Self {
            store,
            client,
            engine,
            page_size: config.sync_page_size.max(1),
            max_pages: config.sync_max_pages,
            max_items: config.sync_max_items,
            default_ftp: config.default_ftp,
        }
    }

    pub fn client(&self) -> &StravaClient {
        &self.client
    }

    /// Run one job to completion.
    pub async fn run(&self, job_type: JobType, ctx: &JobContext) -> Result<SyncSummary, JobError> {
        tracing::info!(job_id = %ctx.job_id, %job_type, "Sync started");

        let mut changed = BTreeSet::new();
        let result = match job_type {
            JobType::Activities => self.sync_activities(ctx, &mut changed).await,
            JobType::Segments => self.sync_segments(ctx).await,
            JobType::Streams => self.sync_streams(ctx, &mut changed).await,
        };

        let earliest_changed = changed.first().copied();
        if let (Some(from), Some(last)) = (earliest_changed, changed.last().copied()) {
            let through = last.max(Utc::now().date_naive());
            if let Err(e) = self.engine.recompute_from(from, through).await {
                tracing::error!(job_id = %ctx.job_id, error = %e, "Training load recompute failed");
                // A sync error takes precedence.
                result?;
                return Err(e.into());
            }
        }
        result?;

        let progress = ctx.progress();
        Ok(SyncSummary {
            created: progress.created,
            updated: progress.updated,
            skipped: progress.skipped,
            earliest_changed,
        })
    }

    // ─── Activities ──────────────────────────────────────────────────────

    async fn sync_activities(
        &self,
        ctx: &JobContext,
        changed: &mut BTreeSet<NaiveDate>,
    ) -> Result<(), JobError> {
        let after = self
            .store
            .latest_activity_start()
            .await?
            .map(|t| t.timestamp());

        for page in 1..=self.max_pages {
            let records = self
                .client
                .list_activities(after, page, self.page_size, ctx)
                .await?;
            if records.is_empty() {
                break;
            }

            let count = records.len();
            for raw in records {
                self.ingest_activity(raw, ctx, changed).await?;
            }
            ctx.page_done(count);

            let progress = ctx.progress();
            tracing::info!(
                job_id = %ctx.job_id,
                page,
                records = count,
                created = progress.created,
                updated = progress.updated,
                skipped = progress.skipped,
                "Activity page ingested"
            );

            if count < self.page_size as usize {
                break;
            }
            if page == self.max_pages {
                tracing::warn!(job_id = %ctx.job_id, page, "Page cap reached, stopping");
            }
        }
        Ok(())
    }

    async fn ingest_activity(
        &self,
        raw: serde_json::Value,
        ctx: &JobContext,
        changed: &mut BTreeSet<NaiveDate>,
    ) -> Result<(), JobError> {
        let Some(summary) = validated::<StravaActivitySummary>(raw, ctx, "activity") else {
            return Ok(());
        };

        let mut activity = activity_from_summary(&summary);
        let existing = self.store.get_activity(activity.strava_activity_id).await?;
        if let Some(existing) = &existing {
            activity.merge_sync_state(existing);
        }
        let ftp = self.ftp_for(activity.local_date).await?;
        activity.training_stress = activity_stress(&activity, ftp);

        let outcome = self.store.upsert_activity(&activity).await?;
        ctx.record(outcome);

        match &existing {
            None => {
                changed.insert(activity.local_date);
            }
            Some(old) => {
                if old.local_date != activity.local_date {
                    changed.insert(old.local_date);
                    changed.insert(activity.local_date);
                } else if old.training_stress != activity.training_stress {
                    changed.insert(activity.local_date);
                }
            }
        }
        Ok(())
    }

    // ─── Segments ────────────────────────────────────────────────────────

    async fn sync_segments(&self, ctx: &JobContext) -> Result<(), JobError> {
        let pending = self.store.activities_needing_segments(self.max_items).await?;
        tracing::info!(job_id = %ctx.job_id, activities = pending.len(), "Segment sync");

        for mut activity in pending {
            let detail = match self
                .client
                .get_activity_detail(activity.strava_activity_id, ctx)
                .await
            {
                Ok(detail) => detail,
                Err(e) if is_record_error(&e) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        activity_id = activity.strava_activity_id,
                        error = %e,
                        "Activity detail unavailable, skipping"
                    );
                    ctx.skip();
                    activity.segments_synced = true;
                    self.store.upsert_activity(&activity).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let count = detail.segment_efforts.len();
            for raw in detail.segment_efforts {
                let Some(effort) = validated::<StravaSegmentEffort>(raw, ctx, "segment effort")
                else {
                    continue;
                };
                let effort = effort_from_strava(activity.strava_activity_id, effort);
                let outcome = self.store.upsert_segment_effort(&effort).await?;
                ctx.record(outcome);
            }
            ctx.page_done(count);

            activity.segments_synced = true;
            self.store.upsert_activity(&activity).await?;
            tracing::debug!(
                job_id = %ctx.job_id,
                activity_id = activity.strava_activity_id,
                efforts = count,
                "Segment efforts synced"
            );
        }
        Ok(())
    }

    // ─── Streams ─────────────────────────────────────────────────────────

    async fn sync_streams(
        &self,
        ctx: &JobContext,
        changed: &mut BTreeSet<NaiveDate>,
    ) -> Result<(), JobError> {
        let pending = self.store.activities_needing_streams(self.max_items).await?;
        tracing::info!(job_id = %ctx.job_id, activities = pending.len(), "Stream sync");

        for mut activity in pending {
            let activity_id = activity.strava_activity_id;

            if activity.start_date.year() < STREAMS_FIRST_YEAR {
                tracing::debug!(job_id = %ctx.job_id, activity_id, "Too old for streams");
                ctx.skip();
                activity.streams_synced = true;
                self.store.upsert_activity(&activity).await?;
                continue;
            }

            let streams = match self.client.get_activity_streams(activity_id, ctx).await {
                Ok(streams) => streams,
                Err(e) if is_record_error(&e) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        activity_id,
                        error = %e,
                        "Streams unavailable, skipping"
                    );
                    ctx.skip();
                    activity.streams_synced = true;
                    self.store.upsert_activity(&activity).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            ctx.page_done(1);

            let previous_stress = activity.training_stress;
            activity.streams_synced = true;
            let valid = match power::power_metrics(&streams) {
                Ok(metrics) => {
                    activity.power = Some(metrics);
                    let ftp = self.ftp_for(activity.local_date).await?;
                    activity.training_stress = activity_stress(&activity, ftp);
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %ctx.job_id,
                        activity_id,
                        error = %e,
                        "Skipping streams"
                    );
                    ctx.skip();
                    false
                }
            };

            let outcome = self.store.upsert_activity(&activity).await?;
            if valid {
                ctx.record(outcome);
            }
            if activity.training_stress != previous_stress {
                changed.insert(activity.local_date);
            }
        }
        Ok(())
    }

    async fn ftp_for(&self, date: NaiveDate) -> Result<u32, JobError> {
        Ok(self
            .store
            .ftp_for_date(date)
            .await?
            .unwrap_or(self.default_ftp))
    }
}

/// Decode and validate one raw record. `None` means it was skipped.
fn validated<T>(raw: serde_json::Value, ctx: &JobContext, what: &'static str) -> Option<T>
where
    T: DeserializeOwned + Validate,
{
    let id = raw.get("id").and_then(serde_json::Value::as_u64);
    let record = match serde_json::from_value::<T>(raw) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(job_id = %ctx.job_id, ?id, error = %e, "Skipping malformed {what}");
            ctx.skip();
            return None;
        }
    };
    if let Err(e) = record.validate() {
        tracing::warn!(job_id = %ctx.job_id, ?id, error = %e, "Skipping invalid {what}");
        ctx.skip();
        return None;
    }
    Some(record)
}

/// Rejections that concern one activity (deleted, private, malformed), as
/// opposed to auth or quota failures that would hit every request.
fn is_record_error(err: &ApiError) -> bool {
    matches!(err, ApiError::FatalRequest { .. } | ApiError::Decode(_))
}

fn activity_from_summary(summary: &StravaActivitySummary) -> Activity {
    Activity {
        strava_activity_id: summary.id,
        name: summary.name.clone(),
        sport_type: summary.sport_type.clone(),
        start_date: summary.start_date,
        local_date: summary.start_date_local.date_naive(),
        distance_meters: summary.distance,
        moving_time_secs: summary.moving_time,
        elapsed_time_secs: summary.elapsed_time,
        total_elevation_gain: summary.total_elevation_gain,
        average_speed: summary.average_speed,
        max_speed: summary.max_speed,
        power: None,
        training_stress: 0.0,
        streams_synced: false,
        segments_synced: false,
    }
}

fn effort_from_strava(activity_id: u64, effort: StravaSegmentEffort) -> SegmentEffort {
    SegmentEffort {
        effort_id: effort.id,
        activity_id,
        segment_id: effort.segment.id,
        segment_name: effort.segment.name,
        segment_distance_meters: effort.segment.distance,
        average_grade: effort.segment.average_grade,
        maximum_grade: effort.segment.maximum_grade,
        elapsed_time_secs: effort.elapsed_time,
        moving_time_secs: effort.moving_time,
        start_date: effort.start_date,
        distance_meters: effort.distance,
        average_watts: effort.average_watts,
        average_heartrate: effort.average_heartrate,
        max_heartrate: effort.max_heartrate,
        pr_rank: effort.pr_rank,
        kom_rank: effort.kom_rank,
    }
}
