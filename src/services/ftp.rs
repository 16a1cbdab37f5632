// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! FTP history import.
//!
//! Stress scores depend on the FTP in effect on the activity's day, so a new
//! history entry re-scores every stored activity from its effective date on
//! and then rebuilds the training load series.

use crate::db::SyncStore;
use crate::error::AppError;
use crate::models::FtpEntry;
use crate::services::power::activity_stress;
use crate::services::training_load::TrainingLoadEngine;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FtpImportSummary {
    pub entries: usize,
    pub rescored: usize,
    pub days: usize,
}

/// Store `entries`, re-score affected activities, then rebuild the series.
pub async fn import_ftp_history(
    store: &dyn SyncStore,
    engine: &TrainingLoadEngine,
    entries: &[FtpEntry],
    default_ftp: u32,
) -> Result<FtpImportSummary, AppError> {
    let Some(earliest) = entries.iter().map(|e| e.date).min() else {
        return Ok(FtpImportSummary {
            entries: 0,
            rescored: 0,
            days: 0,
        });
    };

    for entry in entries {
        store.put_ftp(entry).await?;
    }

    let mut rescored = 0;
    for mut activity in store.activities_since(earliest).await? {
        let ftp = store
            .ftp_for_date(activity.local_date)
            .await?
            .unwrap_or(default_ftp);
        let stress = activity_stress(&activity, ftp);
        if stress != activity.training_stress {
            activity.training_stress = stress;
            store.upsert_activity(&activity).await?;
            rescored += 1;
        }
    }

    let points = engine.rebuild().await?;
    tracing::info!(
        entries = entries.len(),
        %earliest,
        rescored,
        days = points.len(),
        "FTP history imported"
    );

    Ok(FtpImportSummary {
        entries: entries.len(),
        rescored,
        days: points.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use crate::models::Activity;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ride(id: u64, day: NaiveDate, ftp: u32) -> Activity {
        let mut activity = Activity {
            strava_activity_id: id,
            name: "Ride".to_string(),
            sport_type: "Ride".to_string(),
            start_date: Utc.from_utc_datetime(&day.and_hms_opt(9, 0, 0).unwrap()),
            local_date: day,
            distance_meters: 30000.0,
            moving_time_secs: 3600,
            elapsed_time_secs: 3700,
            total_elevation_gain: 300.0,
            average_speed: 8.3,
            max_speed: 14.0,
            power: None,
            training_stress: 0.0,
            streams_synced: false,
            segments_synced: false,
        };
        activity.training_stress = activity_stress(&activity, ftp);
        activity
    }

    #[tokio::test]
    async fn rescoring_starts_at_the_effective_date() {
        let store = Arc::new(MemoryDb::new());
        let engine = TrainingLoadEngine::new(store.clone());
        let before = ride(1, date(2025, 3, 1), 200);
        let after = ride(2, date(2025, 3, 20), 200);
        store.upsert_activity(&before).await.unwrap();
        store.upsert_activity(&after).await.unwrap();

        let entries = [FtpEntry {
            date: date(2025, 3, 10),
            ftp: 250,
        }];
        let summary = import_ftp_history(store.as_ref(), &engine, &entries, 200)
            .await
            .unwrap();
        assert_eq!(summary.entries, 1);
        assert_eq!(summary.rescored, 1);
        assert!(summary.days >= 20);

        let kept = store.get_activity(1).await.unwrap().unwrap();
        assert_eq!(kept.training_stress, before.training_stress);
        let updated = store.get_activity(2).await.unwrap().unwrap();
        assert_eq!(updated.training_stress, activity_stress(&after, 250));
        assert!(updated.training_stress < after.training_stress);

        let point = store
            .get_training_load(date(2025, 3, 20))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(point.stress, updated.training_stress);
    }

    #[tokio::test]
    async fn empty_import_is_a_no_op() {
        let store = Arc::new(MemoryDb::new());
        let engine = TrainingLoadEngine::new(store.clone());
        let summary = import_ftp_history(store.as_ref(), &engine, &[], 200)
            .await
            .unwrap();
        assert_eq!(summary.rescored, 0);
        assert_eq!(store.ftp_for_date(date(2030, 1, 1)).await.unwrap(), None);
    }
}
