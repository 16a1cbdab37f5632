// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Daily training load series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// One day of the CTL/ATL/TSB series (document ID is the ISO date).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct TrainingLoadPoint {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub date: NaiveDate,
    /// Sum of the day's activity stress scores (zero on rest days)
    pub stress: f64,
    /// Chronic training load (fitness)
    pub ctl: f64,
    /// Acute training load (fatigue)
    pub atl: f64,
    /// Balance from the previous day's CTL and ATL (form)
    pub tsb: f64,
}

/// Total stress for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyStress {
    pub date: NaiveDate,
    pub stress: f64,
}

impl DailyStress {
    pub fn new(date: NaiveDate, stress: f64) -> Self {
        Self { date, stress }
    }
}
