// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Power metrics from activity streams and per-activity training stress.

use crate::models::{Activity, PowerMetrics};
use crate::services::strava::StravaStreams;

const MPS_TO_MPH: f64 = 2.23694;
const METERS_TO_MILES: f64 = 0.000621371;

/// Rolling window for normalized power, in seconds.
const NP_WINDOW_SECS: f64 = 30.0;

/// Best-effort windows: 10, 20, 30, 45 and 60 minutes.
const BEST_WINDOWS_SECS: [f64; 5] = [600.0, 1200.0, 1800.0, 2700.0, 3600.0];

/// Why a stream set cannot yield power metrics.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PowerDataError {
    #[error("missing {0} stream")]
    MissingStream(&'static str),
    #[error("time and watts streams differ in length ({time} vs {watts})")]
    LengthMismatch { time: usize, watts: usize },
    #[error("time stream has null samples or runs backwards")]
    BadTimeStream,
    #[error("no power data")]
    NoPower,
}

/// Compute power metrics from `time`/`watts` streams.
///
/// Null watts samples count as zero (coasting).
pub fn power_metrics(streams: &StravaStreams) -> Result<PowerMetrics, PowerDataError> {
    let time = streams
        .time
        .as_ref()
        .ok_or(PowerDataError::MissingStream("time"))?;
    let watts = streams
        .watts
        .as_ref()
        .ok_or(PowerDataError::MissingStream("watts"))?;

    if time.data.len() != watts.data.len() {
        return Err(PowerDataError::LengthMismatch {
            time: time.data.len(),
            watts: watts.data.len(),
        });
    }

    let time: Vec<f64> = time
        .data
        .iter()
        .map(|t| t.ok_or(PowerDataError::BadTimeStream))
        .collect::<Result<_, _>>()?;
    if time.windows(2).any(|w| w[1] < w[0]) {
        return Err(PowerDataError::BadTimeStream);
    }

    let watts: Vec<f64> = watts
        .data
        .iter()
        .map(|w| w.unwrap_or(0.0).max(0.0))
        .collect();
    if watts.iter().all(|w| *w == 0.0) {
        return Err(PowerDataError::NoPower);
    }

    Ok(metrics_from_samples(&time, &watts))
}

fn metrics_from_samples(time: &[f64], watts: &[f64]) -> PowerMetrics {
    let best = |window: f64| {
        rolling_averages(time, watts, window)
            .into_iter()
            .fold(0.0_f64, f64::max)
    };

    let normalized_power = normalized_power(time, watts);
    let mean = watts.iter().sum::<f64>() / watts.len() as f64;

    PowerMetrics {
        max_power: watts.iter().copied().fold(0.0_f64, f64::max),
        best_10m_power: best(BEST_WINDOWS_SECS[0]),
        best_20m_power: best(BEST_WINDOWS_SECS[1]),
        best_30m_power: best(BEST_WINDOWS_SECS[2]),
        best_45m_power: best(BEST_WINDOWS_SECS[3]),
        best_60m_power: best(BEST_WINDOWS_SECS[4]),
        normalized_power,
        variability_index: if mean > 0.0 {
            normalized_power / mean
        } else {
            0.0
        },
    }
}

/// Fourth root of the mean fourth power of 30-second rolling averages.
/// Zero with fewer than 30 samples.
pub fn normalized_power(time: &[f64], watts: &[f64]) -> f64 {
    if watts.len() < NP_WINDOW_SECS as usize {
        return 0.0;
    }
    let averages = rolling_averages(time, watts, NP_WINDOW_SECS);
    if averages.is_empty() {
        return 0.0;
    }
    let mean_fourth = averages.iter().map(|a| a.powi(4)).sum::<f64>() / averages.len() as f64;
    mean_fourth.powf(0.25)
}

/// Average power over every complete time window of `window` seconds.
///
/// A window starting at sample `i` spans the samples with
/// `time[j] - time[i] < window`. It is complete when the recording extends
/// for the full window after `time[i]`.
fn rolling_averages(time: &[f64], watts: &[f64], window: f64) -> Vec<f64> {
    let n = time.len().min(watts.len());
    let Some(last) = time.get(n.wrapping_sub(1)).copied() else {
        return Vec::new();
    };

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for w in &watts[..n] {
        let acc = prefix.last().copied().unwrap_or(0.0);
        prefix.push(acc + w);
    }

    let mut out = Vec::new();
    let mut end = 0;
    for start in 0..n {
        end = end.max(start + 1);
        while end < n && time[end] - time[start] < window {
            end += 1;
        }
        let complete = end < n || last - time[start] + 1.0 >= window;
        if !complete {
            break;
        }
        out.push((prefix[end] - prefix[start]) / (end - start) as f64);
    }
    out
}

/// Regression estimate of normalized power for rides without power data.
///
/// Inputs are in SI units (m/s, metres); the fit itself works in mph and miles.
pub fn estimate_normalized_power(
    average_speed_mps: f64,
    distance_meters: f64,
    elevation_gain_meters: f64,
) -> f64 {
    let v = average_speed_mps * MPS_TO_MPH;
    let d = distance_meters * METERS_TO_MILES;
    29.604638 + 7.300535 * v - 0.002229 * v.powi(3)
        + 0.149428 * d
        + 0.050259 * elevation_gain_meters
}

/// TSS = hours * NP * IF / FTP * 100, rounded to two decimals.
pub fn training_stress(moving_time_secs: u32, normalized_power: f64, ftp: u32) -> f64 {
    if normalized_power <= 0.0 || ftp == 0 {
        return 0.0;
    }
    let ftp = f64::from(ftp);
    let intensity = normalized_power / ftp;
    let tss = f64::from(moving_time_secs) / 3600.0 * normalized_power * intensity / ftp * 100.0;
    (tss * 100.0).round() / 100.0
}

/// Stress of one activity: stream NP when known, otherwise the regression estimate.
pub fn activity_stress(activity: &Activity, ftp: u32) -> f64 {
    let np = activity
        .power
        .as_ref()
        .map(|p| p.normalized_power)
        .filter(|np| *np > 0.0)
        .unwrap_or_else(|| {
            estimate_normalized_power(
                activity.average_speed,
                activity.distance_meters,
                activity.total_elevation_gain,
            )
        });
    training_stress(activity.moving_time_secs, np, ftp)
}
