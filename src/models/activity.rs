// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Activity and segment effort models for storage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stored activity record, keyed by the Strava activity ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Strava activity ID (also used as document ID)
    pub strava_activity_id: u64,
    /// Activity name/title
    pub name: String,
    /// Sport type (Ride, Run, VirtualRide, etc.)
    pub sport_type: String,
    /// Start time (UTC)
    pub start_date: DateTime<Utc>,
    /// Calendar day of the start in the athlete's local time; daily stress is bucketed on this
    pub local_date: NaiveDate,
    /// Distance in meters
    pub distance_meters: f64,
    pub moving_time_secs: u32,
    pub elapsed_time_secs: u32,
    /// Elevation gain in meters
    pub total_elevation_gain: f64,
    /// Average speed in m/s
    pub average_speed: f64,
    /// Max speed in m/s
    pub max_speed: f64,
    /// Power metrics derived from the activity's streams, once synced
    #[serde(default)]
    pub power: Option<PowerMetrics>,
    /// Training stress score attributed to this activity
    pub training_stress: f64,
    /// Whether the stream job has visited this activity
    #[serde(default)]
    pub streams_synced: bool,
    /// Whether the segment job has visited this activity
    #[serde(default)]
    pub segments_synced: bool,
}

impl Activity {
    /// Carry over state owned by the stream and segment jobs when an activity
    /// summary is re-ingested by the activity job.
    pub fn merge_sync_state(&mut self, existing: &Activity) {
        self.power = existing.power.clone();
        self.streams_synced = existing.streams_synced;
        self.segments_synced = existing.segments_synced;
    }
}

/// Power metrics computed from `time`/`watts` streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerMetrics {
    pub max_power: f64,
    pub best_10m_power: f64,
    pub best_20m_power: f64,
    pub best_30m_power: f64,
    pub best_45m_power: f64,
    pub best_60m_power: f64,
    pub normalized_power: f64,
    pub variability_index: f64,
}

/// Stored segment effort, keyed by the Strava effort ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEffort {
    /// Strava segment effort ID (also used as document ID)
    pub effort_id: u64,
    /// Parent activity
    pub activity_id: u64,
    pub segment_id: u64,
    pub segment_name: String,
    pub segment_distance_meters: f64,
    pub average_grade: Option<f64>,
    pub maximum_grade: Option<f64>,
    pub elapsed_time_secs: u32,
    pub moving_time_secs: u32,
    pub start_date: DateTime<Utc>,
    pub distance_meters: f64,
    pub average_watts: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub pr_rank: Option<u32>,
    pub kom_rank: Option<u32>,
}

/// FTP history entry; applies from `date` until the next entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpEntry {
    pub date: NaiveDate,
    pub ftp: u32,
}
