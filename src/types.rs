//! Core types for the NoFall monitoring pipeline
//!
//! This module defines the values that flow between the pipeline stages:
//! raw sensor samples, connection snapshots, detection results, and alert
//! snapshots.

use serde::{Deserialize, Serialize};

/// Three-axis sensor reading, unit-agnostic at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// All components are finite numbers (no NaN or infinity).
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One validated sample from the wearable device.
///
/// Immutable once constructed. `timestamp_ms` is milliseconds since the
/// Unix epoch and defaults to receipt time when the device omits it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub accelerometer: Vector3,
    pub gyroscope: Vector3,
    pub timestamp_ms: i64,
}

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Snapshot of the connection manager's state.
///
/// Owned exclusively by the manager and mutated only through its
/// transition logic; everyone else sees cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Most recent error message, cleared on successful open.
    pub last_error: Option<String>,
    /// Receipt time of the last valid frame (epoch milliseconds).
    pub last_message_ms: Option<i64>,
    /// Automatic retries performed since the last explicit connect.
    pub reconnect_attempts: u32,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            last_error: None,
            last_message_ms: None,
            reconnect_attempts: 0,
        }
    }
}

/// Classification assigned to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Normal,
    PotentialFall,
    FallDetected,
    Recovery,
}

/// Coarse movement classification from the smoothed magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Moving,
    Stationary,
}

/// Evidence behind a detection result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionDetails {
    pub acceleration_magnitude: f64,
    pub orientation_change: f64,
    pub impact_detected: bool,
    pub recovery_detected: bool,
}

/// Per-sample classification, recomputed fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_fall: bool,
    /// Fall likelihood in [0, 1].
    pub confidence: f64,
    pub status: DetectionStatus,
    pub movement_status: MovementStatus,
    pub details: DetectionDetails,
}

/// Kind of alert episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Fall,
    Warning,
    Success,
}

/// Snapshot of the alert supervisor's state.
///
/// At most one episode is active at any instant; a new trigger fully
/// tears down the previous episode before starting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub is_active: bool,
    pub alert_type: AlertType,
    /// Remaining countdown in whole seconds, floored at zero.
    pub countdown: u32,
    pub message: String,
}

impl AlertState {
    /// The inactive resting state.
    pub fn idle() -> Self {
        Self {
            is_active: false,
            alert_type: AlertType::Success,
            countdown: 0,
            message: String::new(),
        }
    }
}

impl Default for AlertState {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_magnitude() {
        let v = Vector3::new(3.0, 4.0, 0.0);
        assert!((v.magnitude() - 5.0).abs() < 1e-9);

        let gravity = Vector3::new(0.0, 0.0, 9.81);
        assert!((gravity.magnitude() - 9.81).abs() < 1e-9);
    }

    #[test]
    fn test_is_finite() {
        assert!(Vector3::new(1.0, -2.0, 0.5).is_finite());
        assert!(!Vector3::new(f64::NAN, 0.0, 0.0).is_finite());
        assert!(!Vector3::new(0.0, f64::INFINITY, 0.0).is_finite());
    }

    #[test]
    fn test_sample_round_trip() {
        let sample = SensorSample {
            accelerometer: Vector3::new(0.1, 0.2, 9.81),
            gyroscope: Vector3::new(1.0, 2.0, 3.0),
            timestamp_ms: 1_700_000_000_000,
        };

        let json = serde_json::to_string(&sample).unwrap();
        let back: SensorSample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, back);
    }

    #[test]
    fn test_status_serialization_uses_snake_case() {
        let json = serde_json::to_string(&DetectionStatus::PotentialFall).unwrap();
        assert_eq!(json, "\"potential_fall\"");

        let json = serde_json::to_string(&MovementStatus::Stationary).unwrap();
        assert_eq!(json, "\"stationary\"");
    }

    #[test]
    fn test_idle_alert_state() {
        let idle = AlertState::idle();
        assert!(!idle.is_active);
        assert_eq!(idle.alert_type, AlertType::Success);
        assert_eq!(idle.countdown, 0);
        assert!(idle.message.is_empty());
    }
}
