//! Inbound wire format
//!
//! One JSON object per message:
//!
//! ```json
//! {
//!   "accelerometer": {"x": 0.1, "y": 0.2, "z": 9.8},
//!   "gyroscope":     {"x": 1.0, "y": 2.0, "z": 3.0},
//!   "timestamp": 1700000000000
//! }
//! ```
//!
//! `timestamp` is optional and defaults to receipt time. A malformed
//! frame is an [`EngineError::MessageFormat`]; it never tears down the
//! connection.

use crate::error::EngineError;
use crate::types::{SensorSample, Vector3};
use serde::{Deserialize, Serialize};

/// Raw inbound frame as sent by the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorFrame {
    pub accelerometer: Vector3,
    pub gyroscope: Vector3,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SensorFrame {
    /// Shape validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.accelerometer.is_finite() {
            return Err(EngineError::MessageFormat(
                "accelerometer components must be finite".to_string(),
            ));
        }
        if !self.gyroscope.is_finite() {
            return Err(EngineError::MessageFormat(
                "gyroscope components must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert into a sample, defaulting the timestamp to receipt time.
    pub fn into_sample(self, received_at_ms: i64) -> SensorSample {
        SensorSample {
            accelerometer: self.accelerometer,
            gyroscope: self.gyroscope,
            timestamp_ms: self.timestamp.unwrap_or(received_at_ms),
        }
    }
}

/// Parse and validate one inbound frame.
pub fn parse_frame(text: &str, received_at_ms: i64) -> Result<SensorSample, EngineError> {
    let frame: SensorFrame = serde_json::from_str(text)
        .map_err(|e| EngineError::MessageFormat(e.to_string()))?;
    frame.validate()?;
    Ok(frame.into_sample(received_at_ms))
}
