// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper implementing [`SyncStore`].
//!
//! Collections:
//! - `activities` (keyed by Strava activity ID)
//! - `segment_efforts` (keyed by Strava effort ID)
//! - `training_load` (keyed by ISO date)
//! - `ftp_history` (keyed by ISO date)
//! - `sync_jobs` (keyed by job UUID)
//!
//! Dates are stored as ISO strings, so lexical order is date order.

use crate::db::{collections, daily_totals, SyncStore, UpsertOutcome};
use crate::error::AppError;
use crate::models::{
    Activity, DailyStress, FtpEntry, JobId, SegmentEffort, SyncJob, TrainingLoadPoint,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::{stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};

const MAX_CONCURRENT_DB_OPS: usize = 50;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── Helper Methods ────────────────────────────────────────────

    async fn get_doc<T>(&self, collection: &str, doc_id: &str) -> Result<Option<T>, AppError>
    where
        T: DeserializeOwned + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(doc_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn set_doc<T>(&self, collection: &str, doc_id: &str, value: &T) -> Result<(), AppError>
    where
        T: Serialize + DeserializeOwned + Sync + Send,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(doc_id)
            .object(value)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Read-compare-write. Firestore has no conditional upsert, so an
    /// identical document is detected client-side and left untouched.
    async fn upsert_doc<T>(
        &self,
        collection: &str,
        doc_id: &str,
        value: &T,
    ) -> Result<UpsertOutcome, AppError>
    where
        T: Serialize + DeserializeOwned + PartialEq + Sync + Send,
    {
        let outcome = match self.get_doc::<T>(collection, doc_id).await? {
            Some(existing) if existing == *value => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        self.set_doc(collection, doc_id, value).await?;
        Ok(outcome)
    }

    /// Activities not yet visited by a sync job, oldest first.
    async fn unvisited_activities(
        &self,
        flag: &'static str,
        limit: u32,
    ) -> Result<Vec<Activity>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| q.for_all([q.field(flag).eq(false)]))
            .order_by([("start_date", firestore::FirestoreQueryDirection::Ascending)])
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl SyncStore for FirestoreDb {
    // ─── Activity Operations ─────────────────────────────────────

    async fn upsert_activity(&self, activity: &Activity) -> Result<UpsertOutcome, AppError> {
        self.upsert_doc(
            collections::ACTIVITIES,
            &activity.strava_activity_id.to_string(),
            activity,
        )
        .await
    }

    async fn get_activity(&self, activity_id: u64) -> Result<Option<Activity>, AppError> {
        self.get_doc(collections::ACTIVITIES, &activity_id.to_string())
            .await
    }

    async fn latest_activity_start(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest: Vec<Activity> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .order_by([("start_date", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(latest.first().map(|a| a.start_date))
    }

    async fn earliest_activity_date(&self) -> Result<Option<NaiveDate>, AppError> {
        let earliest: Vec<Activity> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .order_by([("local_date", firestore::FirestoreQueryDirection::Ascending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(earliest.first().map(|a| a.local_date))
    }

    async fn activities_needing_streams(&self, limit: u32) -> Result<Vec<Activity>, AppError> {
        self.unvisited_activities("streams_synced", limit).await
    }

    async fn activities_needing_segments(&self, limit: u32) -> Result<Vec<Activity>, AppError> {
        self.unvisited_activities("segments_synced", limit).await
    }

    async fn activities_since(&self, date: NaiveDate) -> Result<Vec<Activity>, AppError> {
        let from = date.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| q.for_all([q.field("local_date").greater_than_or_equal(from.clone())]))
            .order_by([("local_date", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn get_daily_stress_totals(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStress>, AppError> {
        let from = start.to_string();
        let to = end.to_string();
        let activities: Vec<Activity> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| {
                q.for_all([
                    q.field("local_date").greater_than_or_equal(from.clone()),
                    q.field("local_date").less_than_or_equal(to.clone()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(daily_totals(start, end, activities.iter()))
    }

    // ─── Segment Effort Operations ───────────────────────────────

    async fn upsert_segment_effort(
        &self,
        effort: &SegmentEffort,
    ) -> Result<UpsertOutcome, AppError> {
        self.upsert_doc(
            collections::SEGMENT_EFFORTS,
            &effort.effort_id.to_string(),
            effort,
        )
        .await
    }

    // ─── Training Load Operations ────────────────────────────────

    async fn get_training_load(
        &self,
        date: NaiveDate,
    ) -> Result<Option<TrainingLoadPoint>, AppError> {
        self.get_doc(collections::TRAINING_LOAD, &date.to_string())
            .await
    }

    async fn put_training_load(&self, point: &TrainingLoadPoint) -> Result<(), AppError> {
        self.set_doc(collections::TRAINING_LOAD, &point.date.to_string(), point)
            .await
    }

    /// Uses concurrent writes with a limit to avoid overloading Firestore.
    async fn put_training_loads(&self, points: &[TrainingLoadPoint]) -> Result<(), AppError> {
        let client = self.get_client()?;

        stream::iter(points.iter().copied())
            .map(|point| async move {
                let _: () = client
                    .fluent()
                    .update()
                    .in_col(collections::TRAINING_LOAD)
                    .document_id(point.date.to_string())
                    .object(&point)
                    .execute()
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;

                Ok::<_, AppError>(())
            })
            .buffer_unordered(MAX_CONCURRENT_DB_OPS)
            .collect::<Vec<Result<(), AppError>>>()
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AppError>>()?;

        Ok(())
    }

    async fn latest_training_load_before(
        &self,
        date: NaiveDate,
    ) -> Result<Option<TrainingLoadPoint>, AppError> {
        let before = date.to_string();
        let points: Vec<TrainingLoadPoint> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::TRAINING_LOAD)
            .filter(move |q| q.for_all([q.field("date").less_than(before.clone())]))
            .order_by([("date", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(points.into_iter().next())
    }

    async fn latest_training_load_date(&self) -> Result<Option<NaiveDate>, AppError> {
        let points: Vec<TrainingLoadPoint> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::TRAINING_LOAD)
            .order_by([("date", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(points.first().map(|p| p.date))
    }

    async fn training_load_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingLoadPoint>, AppError> {
        if start > end {
            return Ok(Vec::new());
        }
        let from = start.to_string();
        let to = end.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::TRAINING_LOAD)
            .filter(move |q| {
                q.for_all([
                    q.field("date").greater_than_or_equal(from.clone()),
                    q.field("date").less_than_or_equal(to.clone()),
                ])
            })
            .order_by([("date", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── FTP History Operations ──────────────────────────────────

    async fn ftp_for_date(&self, date: NaiveDate) -> Result<Option<u32>, AppError> {
        let on_or_before = date.to_string();
        let entries: Vec<FtpEntry> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::FTP_HISTORY)
            .filter(move |q| {
                q.for_all([q.field("date").less_than_or_equal(on_or_before.clone())])
            })
            .order_by([("date", firestore::FirestoreQueryDirection::Descending)])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(entries.first().map(|e| e.ftp))
    }

    async fn put_ftp(&self, entry: &FtpEntry) -> Result<(), AppError> {
        self.set_doc(collections::FTP_HISTORY, &entry.date.to_string(), entry)
            .await
    }

    // ─── Job Operations ──────────────────────────────────────────

    async fn put_job(&self, job: &SyncJob) -> Result<(), AppError> {
        self.set_doc(collections::SYNC_JOBS, &job.id.to_string(), job)
            .await
    }

    async fn list_jobs(&self) -> Result<Vec<SyncJob>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::SYNC_JOBS)
            .order_by([("submitted_at", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn delete_job(&self, job_id: JobId) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::SYNC_JOBS)
            .document_id(job_id.to_string())
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
