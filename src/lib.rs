//! NoFall Engine - on-device monitoring core for wearable fall detection
//!
//! The engine ingests accelerometer/gyroscope samples streamed over a
//! websocket from a wearable device, classifies the stream in real time,
//! and drives supervised, auto-dismissing alert episodes:
//! connection management → frame validation → fall classification →
//! alert supervision.
//!
//! ## Modules
//!
//! - **connection / client**: socket lifecycle, URL and frame
//!   validation, bounded-backoff reconnection
//! - **detector**: bounded-history online fall classification
//! - **alert**: single-episode alert supervision with audio and haptic
//!   channels
//! - **engine**: the wired pipeline plus subscribe streams for UIs
//! - **sim**: synthetic sensor feed for development without hardware

pub mod alert;
pub mod client;
pub mod config;
pub mod connection;
pub mod detector;
pub mod engine;
pub mod error;
pub mod sim;
pub mod types;
pub mod wire;

pub use alert::{AlertSounder, AlertSupervisor, HapticDriver};
pub use client::SocketClient;
pub use config::{EngineConfig, FallThresholds, ReconnectPolicy};
pub use connection::ConnectionManager;
pub use detector::{DetectorTunables, SignalProcessor};
pub use engine::MonitorEngine;
pub use error::EngineError;
pub use types::{
    AlertState, AlertType, ConnectionPhase, ConnectionState, DetectionResult, DetectionStatus,
    MovementStatus, SensorSample, Vector3,
};

/// Engine version embedded in telemetry and the CLI.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
