//! Fall detection
//!
//! [`SignalProcessor`] turns the sample stream into a per-sample
//! classification using bounded magnitude histories, short-window moving
//! averages, and a weighted confidence score. The algorithm is online
//! and causal: each result depends only on the accumulated history and
//! the new sample.
//!
//! One processor instance monitors one subject; history is never shared.

use crate::config::FallThresholds;
use crate::types::{
    DetectionDetails, DetectionResult, DetectionStatus, MovementStatus, SensorSample,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Detection tunables.
///
/// The defaults are the values the pipeline has been field-tested with;
/// none of them carry an empirical calibration beyond that, so they are
/// injected at construction rather than baked in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorTunables {
    /// Jump over the short-window acceleration baseline counted as
    /// sudden (m/s²).
    pub sudden_accel_threshold: f64,
    /// Jump over the short-window rotation baseline counted as sudden
    /// (deg/s).
    pub sudden_gyro_threshold: f64,
    /// Acceleration magnitude counted as an impact (m/s²).
    pub impact_threshold: f64,
    /// Acceleration magnitude below which a post-impact sample reads as
    /// recovery (m/s²).
    pub post_impact_threshold: f64,
    /// Smoothed-magnitude level separating moving from stationary.
    pub movement_threshold: f64,
    /// EMA smoothing factor for movement detection.
    pub smoothing_factor: f64,
    /// Samples in the short baseline window.
    pub baseline_window: usize,
    /// Impact history cap, in samples.
    pub impact_window: usize,
    /// Movement averaging window, in samples.
    pub movement_window: usize,
    /// Confidence at or above which a sample is a detected fall.
    pub fall_confidence: f64,
    /// Confidence above which a sample is a potential fall.
    pub potential_confidence: f64,
    pub sudden_accel_weight: f64,
    pub sudden_gyro_weight: f64,
    pub impact_weight: f64,
}

impl Default for DetectorTunables {
    fn default() -> Self {
        Self {
            sudden_accel_threshold: 20.0,
            sudden_gyro_threshold: 300.0,
            impact_threshold: 15.0,
            post_impact_threshold: 5.0,
            movement_threshold: 0.5,
            smoothing_factor: 0.3,
            baseline_window: 5,
            impact_window: 500,
            movement_window: 1_000,
            fall_confidence: 0.7,
            potential_confidence: 0.4,
            sudden_accel_weight: 0.3,
            sudden_gyro_weight: 0.3,
            impact_weight: 0.4,
        }
    }
}

impl DetectorTunables {
    /// Apply the settings-layer threshold bundle on top of the defaults.
    ///
    /// Only the quantities the bundle names are overridden; windows,
    /// weights, and confidence bands keep their defaults.
    pub fn overridden_by(thresholds: &FallThresholds) -> Self {
        Self {
            sudden_accel_threshold: thresholds.accelerometer,
            sudden_gyro_threshold: thresholds.gyroscope,
            impact_threshold: thresholds.impact,
            ..Self::default()
        }
    }

    fn history_cap(&self) -> usize {
        self.impact_window.max(self.movement_window)
    }
}

/// Stateful per-subject fall detector.
#[derive(Debug)]
pub struct SignalProcessor {
    tunables: DetectorTunables,
    accel_history: VecDeque<f64>,
    gyro_history: VecDeque<f64>,
    last_timestamp_ms: i64,
}

impl Default for SignalProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalProcessor {
    pub fn new() -> Self {
        Self::with_tunables(DetectorTunables::default())
    }

    pub fn with_tunables(tunables: DetectorTunables) -> Self {
        let cap = tunables.history_cap();
        Self {
            tunables,
            accel_history: VecDeque::with_capacity(cap.min(1_024)),
            gyro_history: VecDeque::with_capacity(cap.min(1_024)),
            last_timestamp_ms: 0,
        }
    }

    pub fn tunables(&self) -> &DetectorTunables {
        &self.tunables
    }

    /// Classify one sample.
    ///
    /// Baselines are taken over the history before this sample so that a
    /// first impact against a quiet baseline registers as sudden; the
    /// sample is appended afterwards.
    pub fn process(&mut self, sample: &SensorSample) -> DetectionResult {
        let t = self.tunables;
        let acc_mag = sample.accelerometer.magnitude();
        let gyro_mag = sample.gyroscope.magnitude();

        let baseline_accel = moving_average(&self.accel_history, t.baseline_window);
        let baseline_gyro = moving_average(&self.gyro_history, t.baseline_window);

        let sudden_accel = (acc_mag - baseline_accel).abs() > t.sudden_accel_threshold;
        let sudden_gyro = (gyro_mag - baseline_gyro).abs() > t.sudden_gyro_threshold;
        let impact_detected = acc_mag > t.impact_threshold;
        let recovery_detected =
            acc_mag < t.post_impact_threshold && !self.accel_history.is_empty();

        let mut confidence = 0.0;
        if sudden_accel {
            confidence += t.sudden_accel_weight;
        }
        if sudden_gyro {
            confidence += t.sudden_gyro_weight;
        }
        if impact_detected {
            confidence += t.impact_weight;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let status = if confidence >= t.fall_confidence {
            DetectionStatus::FallDetected
        } else if confidence > t.potential_confidence {
            DetectionStatus::PotentialFall
        } else if recovery_detected {
            DetectionStatus::Recovery
        } else {
            DetectionStatus::Normal
        };

        let movement_status = self.movement_status(acc_mag, gyro_mag);

        self.update_history(acc_mag, gyro_mag, sample.timestamp_ms);

        DetectionResult {
            is_fall: status == DetectionStatus::FallDetected,
            confidence,
            status,
            movement_status,
            details: DetectionDetails {
                acceleration_magnitude: acc_mag,
                orientation_change: gyro_mag,
                impact_detected,
                recovery_detected,
            },
        }
    }

    /// Smooth the combined magnitude against the longer movement window.
    fn movement_status(&self, acc_mag: f64, gyro_mag: f64) -> MovementStatus {
        let t = self.tunables;
        let baseline = moving_average(&self.accel_history, t.movement_window);
        let smoothed = ema(acc_mag + gyro_mag, baseline, t.smoothing_factor);

        if smoothed > t.movement_threshold {
            MovementStatus::Moving
        } else {
            MovementStatus::Stationary
        }
    }

    /// Append both magnitudes, evicting the oldest beyond the cap.
    /// Samples with non-advancing timestamps do not extend history.
    fn update_history(&mut self, acc_mag: f64, gyro_mag: f64, timestamp_ms: i64) {
        if timestamp_ms <= self.last_timestamp_ms {
            return;
        }

        let cap = self.tunables.history_cap();
        self.accel_history.push_back(acc_mag);
        while self.accel_history.len() > cap {
            self.accel_history.pop_front();
        }
        self.gyro_history.push_back(gyro_mag);
        while self.gyro_history.len() > cap {
            self.gyro_history.pop_front();
        }

        self.last_timestamp_ms = timestamp_ms;
    }
}

/// Mean of the most recent `window` values; zero when empty.
fn moving_average(values: &VecDeque<f64>, window: usize) -> f64 {
    if values.is_empty() || window == 0 {
        return 0.0;
    }
    let take = window.min(values.len());
    let sum: f64 = values.iter().rev().take(take).sum();
    sum / take as f64
}

/// Exponentially weighted mean biased toward `current` by `factor`.
fn ema(current: f64, previous: f64, factor: f64) -> f64 {
    current * factor + previous * (1.0 - factor)
}
