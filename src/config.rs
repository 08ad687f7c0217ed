//! Engine configuration
//!
//! All tunables are passed in at construction with defaults supplied
//! here; no component reads module-global alert or connection settings.

use crate::types::AlertType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wearable endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://192.168.1.73:8080";

/// Top-level configuration consumed by [`crate::engine::MonitorEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wearable websocket endpoint (`ws://host[:port][/path]`).
    pub server_url: String,
    /// Play the looping alert sound during an episode.
    pub sound_enabled: bool,
    /// Issue a haptic pattern when an episode starts.
    pub vibration_enabled: bool,
    /// Threshold bundle exposed to the settings layer.
    pub thresholds: FallThresholds,
    pub reconnect: ReconnectPolicy,
    pub alert: AlertPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            sound_enabled: true,
            vibration_enabled: true,
            thresholds: FallThresholds::default(),
            reconnect: ReconnectPolicy::default(),
            alert: AlertPolicy::default(),
        }
    }
}

/// Fall-detection threshold bundle owned by the external settings
/// collaborator.
///
/// Kept distinct from [`crate::detector::DetectorTunables`]: the two
/// disagree on defaults, and the detector only honors this bundle when
/// the caller opts in via `DetectorTunables::overridden_by`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallThresholds {
    /// Sudden-acceleration threshold override (m/s²).
    pub accelerometer: f64,
    /// Sudden-rotation threshold override (deg/s).
    pub gyroscope: f64,
    /// Impact threshold override (m/s²).
    pub impact: f64,
    /// Post-impact recovery observation window (milliseconds).
    pub recovery_ms: u64,
}

impl Default for FallThresholds {
    fn default() -> Self {
        Self {
            accelerometer: 15.0,
            gyroscope: 500.0,
            impact: 20.0,
            recovery_ms: 5_000,
        }
    }
}

/// Automatic reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Base delay before the first retry (milliseconds).
    pub base_interval_ms: u64,
    /// Retries before the connection is declared failed.
    pub max_attempts: u32,
    /// Backoff ceiling (milliseconds).
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval_ms: 3_000,
            max_attempts: 5,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the retry following `attempts` prior attempts:
    /// `base * 2^attempts`, capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.min(31);
        let delay = self
            .base_interval_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

/// Alert episode policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Total episode duration in seconds.
    pub countdown_secs: u32,
    /// Countdown tick interval (milliseconds).
    pub tick_interval_ms: u64,
    /// Haptic pattern per alert type: [wait, vibrate, wait, vibrate, ...]
    /// in milliseconds.
    pub fall_pattern: Vec<u64>,
    pub warning_pattern: Vec<u64>,
    pub success_pattern: Vec<u64>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            countdown_secs: 30,
            tick_interval_ms: 1_000,
            fall_pattern: vec![0, 500, 200, 500],
            warning_pattern: vec![0, 200, 100, 200],
            success_pattern: vec![0, 100],
        }
    }
}

impl AlertPolicy {
    /// Haptic pattern for the given alert type.
    pub fn pattern_for(&self, alert_type: AlertType) -> &[u64] {
        match alert_type {
            AlertType::Fall => &self.fall_pattern,
            AlertType::Warning => &self.warning_pattern,
            AlertType::Success => &self.success_pattern,
        }
    }
}
