// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! CTL/ATL/TSB training load series.
//!
//! The series is a first-order recurrence over consecutive calendar days:
//!
//! ```text
//! CTL(t) = CTL(t-1) + (stress(t) - CTL(t-1)) * (1 - e^(-1/42))
//! ATL(t) = ATL(t-1) + (stress(t) - ATL(t-1)) * (1 - e^(-1/7))
//! TSB(t) = CTL(t-1) - ATL(t-1)
//! ```
//!
//! Day zero starts at `CTL = ATL = stress` with `TSB = 0`. Days without
//! activities are zero-stress days, never skipped. Any change to a past
//! day's stress invalidates every later stored day, so both modes propagate
//! forward to the latest stored date. Both modes share [`step`], so an
//! incremental run and a batch run over the same inputs agree bit for bit.

use crate::db::SyncStore;
use crate::error::AppError;
use crate::models::TrainingLoadPoint;
use chrono::{Days, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CTL_TIME_CONSTANT_DAYS: f64 = 42.0;
pub const ATL_TIME_CONSTANT_DAYS: f64 = 7.0;

fn smoothing(time_constant: f64) -> f64 {
    1.0 - (-1.0 / time_constant).exp()
}

/// First day of a series.
pub fn seed(date: NaiveDate, stress: f64) -> TrainingLoadPoint {
    TrainingLoadPoint {
        date,
        stress,
        ctl: stress,
        atl: stress,
        tsb: 0.0,
    }
}

/// The day after `prev`, given that day's stress.
pub fn step(prev: &TrainingLoadPoint, stress: f64) -> TrainingLoadPoint {
    let ctl = prev.ctl + (stress - prev.ctl) * smoothing(CTL_TIME_CONSTANT_DAYS);
    let atl = prev.atl + (stress - prev.atl) * smoothing(ATL_TIME_CONSTANT_DAYS);
    TrainingLoadPoint {
        date: prev.date + Days::new(1),
        stress,
        ctl,
        atl,
        tsb: prev.ctl - prev.atl,
    }
}

/// Batch recurrence over consecutive days starting at `start`.
///
/// `stresses[i]` is the stress of `start + i`. With no `prior`, the first
/// day is seeded. A `prior` older than the day before `start` is bridged
/// with zero-stress days, which are included in the output.
pub fn backfill(
    start: NaiveDate,
    stresses: &[f64],
    prior: Option<TrainingLoadPoint>,
) -> Vec<TrainingLoadPoint> {
    let mut out = Vec::with_capacity(stresses.len());
    let mut prev = prior;

    if let Some(mut p) = prev {
        while p.date + Days::new(1) < start {
            p = step(&p, 0.0);
            out.push(p);
        }
        prev = Some(p);
    }

    for (i, stress) in stresses.iter().enumerate() {
        let point = match &prev {
            Some(p) => step(p, *stress),
            None => seed(start + Days::new(i as u64), *stress),
        };
        out.push(point);
        prev = Some(point);
    }
    out
}

/// Maintains the stored series through the persistence layer.
/// Reads stress totals and writes the derived series. Clones share one lock,
/// so at most one read-compute-write pass runs at a time.
#[derive(Clone)]
pub struct TrainingLoadEngine {
    store: Arc<dyn SyncStore>,
    serial: Arc<Mutex<()>>,
}

impl TrainingLoadEngine {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self {
            store,
            serial: Arc::new(Mutex::new(())),
        }
    }

    /// Incremental update: set `date`'s stress and recompute it and every
    /// later stored day. Later days keep their stored stress inputs.
    pub async fn update_day(
        &self,
        date: NaiveDate,
        stress: f64,
    ) -> Result<Vec<TrainingLoadPoint>, AppError> {
        let _serial = self.serial.lock().await;
        let prior = self.store.latest_training_load_before(date).await?;
        let end = self.propagation_end(date).await?;

        let mut stresses = vec![stress];
        if end > date {
            let later = self.store.training_load_range(date + Days::new(1), end).await?;
            let mut later = later.into_iter().peekable();
            for day in crate::time_utils::days_inclusive(date + Days::new(1), end) {
                let stored = later.next_if(|p| p.date == day).map(|p| p.stress);
                stresses.push(stored.unwrap_or(0.0));
            }
        }

        let points = backfill(date, &stresses, prior);
        self.store.put_training_loads(&points).await?;

        tracing::info!(
            %date,
            stress,
            through = %end,
            days = points.len(),
            "Training load updated incrementally"
        );
        Ok(points)
    }

    /// Re-read daily stress totals for `from..=max(through, latest stored)`
    /// and recompute the series over that span.
    ///
    /// Starts right after the latest stored point before `from`. With no
    /// such point, the series restarts at the earliest activity.
    pub async fn recompute_from(
        &self,
        from: NaiveDate,
        through: NaiveDate,
    ) -> Result<Vec<TrainingLoadPoint>, AppError> {
        let _serial = self.serial.lock().await;
        let prior = self.store.latest_training_load_before(from).await?;
        let start = match &prior {
            Some(p) => p.date + Days::new(1),
            None => match self.store.earliest_activity_date().await? {
                Some(earliest) => earliest.min(from),
                None => from,
            },
        };
        let end = self.propagation_end(from).await?.max(through);

        self.recompute_span(start, end, prior).await
    }

    /// Batch mode over the full history: from the first activity (with no
    /// prior load) through today or the latest stored day.
    pub async fn rebuild(&self) -> Result<Vec<TrainingLoadPoint>, AppError> {
        let _serial = self.serial.lock().await;
        let Some(start) = self.store.earliest_activity_date().await? else {
            tracing::info!("No activities stored, nothing to rebuild");
            return Ok(Vec::new());
        };
        let end = self
            .propagation_end(start)
            .await?
            .max(Utc::now().date_naive());

        self.recompute_span(start, end, None).await
    }

    pub async fn range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TrainingLoadPoint>, AppError> {
        self.store.training_load_range(from, to).await
    }

    async fn recompute_span(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        prior: Option<TrainingLoadPoint>,
    ) -> Result<Vec<TrainingLoadPoint>, AppError> {
        let totals = self.store.get_daily_stress_totals(start, end).await?;
        let stresses: Vec<f64> = totals.iter().map(|d| d.stress).collect();

        let points = backfill(start, &stresses, prior);
        self.store.put_training_loads(&points).await?;

        tracing::info!(
            from = %start,
            through = %end,
            days = points.len(),
            "Training load recomputed"
        );
        Ok(points)
    }

    async fn propagation_end(&self, date: NaiveDate) -> Result<NaiveDate, AppError> {
        Ok(self
            .store
            .latest_training_load_date()
            .await?
            .map_or(date, |latest| latest.max(date)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn seed_day_has_equal_loads_and_zero_balance() {
        let p = seed(date(2025, 1, 1), 80.0);
        assert_eq!((p.ctl, p.atl, p.tsb), (80.0, 80.0, 0.0));
    }

    #[test]
    fn three_day_scenario() {
        let points = backfill(date(2025, 1, 1), &[80.0, 0.0, 100.0], None);
        assert_eq!(points.len(), 3);

        let day1 = points[1];
        assert!((day1.ctl - 80.0 * (-1.0_f64 / 42.0).exp()).abs() < 1e-9);
        assert!((day1.atl - 80.0 * (-1.0_f64 / 7.0).exp()).abs() < 1e-9);
        assert!((day1.ctl - 78.118).abs() < 1e-3);
        assert!((day1.atl - 69.350).abs() < 1e-3);
        assert_eq!(day1.tsb, 0.0);

        let day2 = points[2];
        assert_eq!(day2.date, date(2025, 1, 3));
        assert!((day2.tsb - (day1.ctl - day1.atl)).abs() < 1e-12);
        assert!(day2.ctl > day1.ctl);
        assert!(day2.atl > day1.atl);
    }

    #[test]
    fn stale_prior_is_bridged_with_rest_days() {
        let prior = seed(date(2025, 1, 1), 50.0);
        let points = backfill(date(2025, 1, 4), &[60.0], Some(prior));
        let dates: Vec<NaiveDate> = points.iter().map(|p| p.date).collect();
        assert_eq!(
            dates,
            vec![date(2025, 1, 2), date(2025, 1, 3), date(2025, 1, 4)]
        );
        assert_eq!(points[0].stress, 0.0);
        assert_eq!(points[2].stress, 60.0);
    }

    #[test]
    fn chained_steps_match_batch() {
        let stresses = [55.0, 0.0, 120.5, 33.3, 0.0, 0.0, 210.0];
        let batch = backfill(date(2025, 6, 1), &stresses, None);

        let mut prev = seed(date(2025, 6, 1), stresses[0]);
        assert_eq!(prev, batch[0]);
        for (i, s) in stresses.iter().enumerate().skip(1) {
            prev = step(&prev, *s);
            assert_eq!(prev, batch[i]);
        }
    }
}
