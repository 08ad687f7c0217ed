//! Pipeline orchestration
//!
//! [`MonitorEngine`] wires the pieces together: the socket driver feeds
//! validated samples into the signal processor, every sample yields one
//! detection result on the detection stream, and a detected fall with no
//! episode already active raises a fall alert.
//!
//! External collaborators (UI, settings) interact only through the
//! config passed at construction, the command methods, and the three
//! broadcast streams; no polling is required.

use crate::alert::{AlertSounder, AlertSupervisor, DebugHaptics, DebugSounder, HapticDriver};
use crate::client::SocketClient;
use crate::config::EngineConfig;
use crate::detector::{DetectorTunables, SignalProcessor};
use crate::error::EngineError;
use crate::types::{ConnectionState, DetectionResult, SensorSample};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Stateful monitoring engine for one wearable subject.
pub struct MonitorEngine {
    config: EngineConfig,
    client: SocketClient,
    alerts: Arc<AlertSupervisor>,
    detections: broadcast::Sender<DetectionResult>,
    pipeline: JoinHandle<()>,
}

impl MonitorEngine {
    /// Engine with default detector tunables and the given alert
    /// channels. Must be called within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        sounder: Arc<dyn AlertSounder>,
        haptics: Arc<dyn HapticDriver>,
    ) -> Self {
        Self::with_tunables(config, DetectorTunables::default(), sounder, haptics)
    }

    /// Engine with logging-only alert channels, for hosts without audio
    /// or haptic devices.
    pub fn with_debug_channels(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(DebugSounder), Arc::new(DebugHaptics))
    }

    pub fn with_tunables(
        config: EngineConfig,
        tunables: DetectorTunables,
        sounder: Arc<dyn AlertSounder>,
        haptics: Arc<dyn HapticDriver>,
    ) -> Self {
        let client = SocketClient::spawn(config.reconnect);
        let alerts = Arc::new(AlertSupervisor::new(
            config.alert.clone(),
            config.sound_enabled,
            config.vibration_enabled,
            sounder,
            haptics,
        ));
        let (detections, _) = broadcast::channel(256);

        let processor = SignalProcessor::with_tunables(tunables);
        let pipeline = tokio::spawn(run_pipeline(
            client.subscribe_samples(),
            processor,
            Arc::clone(&alerts),
            detections.clone(),
        ));

        Self {
            config,
            client,
            alerts,
            detections,
            pipeline,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connect to the configured endpoint.
    pub async fn connect(&self) -> Result<(), EngineError> {
        let url = self.config.server_url.clone();
        self.client.connect(&url).await
    }

    /// Connect to an explicit endpoint instead of the configured one.
    pub async fn connect_to(&self, url: &str) -> Result<(), EngineError> {
        self.client.connect(url).await
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.client.disconnect().await
    }

    pub async fn reconnect(&self) -> Result<(), EngineError> {
        self.client.reconnect().await
    }

    /// Best-effort telemetry to the device; a reported no-op while
    /// disconnected.
    pub async fn send_telemetry(&self, payload: serde_json::Value) -> Result<(), EngineError> {
        self.client.send(payload).await
    }

    /// Connection state stream.
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionState> {
        self.client.subscribe_state()
    }

    /// One detection result per sample.
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionResult> {
        self.detections.subscribe()
    }

    /// Alert state stream, one snapshot per change.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<crate::types::AlertState> {
        self.alerts.subscribe()
    }

    /// Direct access to the alert supervisor (dismiss, "I'm OK", manual
    /// triggers).
    pub fn alerts(&self) -> &AlertSupervisor {
        &self.alerts
    }

    /// Tear everything down: socket, pipeline, alert episode, audio.
    pub fn shutdown(&self) {
        self.pipeline.abort();
        self.client.shutdown();
        self.alerts.shutdown();
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        self.pipeline.abort();
    }
}

/// Sample loop: classify, publish, and apply the alert policy.
async fn run_pipeline(
    mut samples: broadcast::Receiver<SensorSample>,
    mut processor: SignalProcessor,
    alerts: Arc<AlertSupervisor>,
    detections: broadcast::Sender<DetectionResult>,
) {
    loop {
        match samples.recv().await {
            Ok(sample) => {
                let result = processor.process(&sample);
                if result.is_fall && !alerts.is_active() {
                    tracing::warn!(
                        confidence = result.confidence,
                        acceleration = result.details.acceleration_magnitude,
                        "fall detected, raising alert"
                    );
                    alerts.trigger_fall_alert();
                }
                let _ = detections.send(result);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "detection pipeline lagged behind the sample stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertPolicy;
    use crate::sim::FeedServer;
    use crate::types::{
        AlertType, ConnectionPhase, DetectionStatus, MovementStatus, Vector3,
    };
    use pretty_assertions::assert_eq;
    use tokio::time::{timeout, Duration};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn fall_sample(timestamp_ms: i64) -> SensorSample {
        SensorSample {
            accelerometer: Vector3::new(0.0, 0.0, 25.0),
            gyroscope: Vector3::new(0.0, 400.0, 0.0),
            timestamp_ms,
        }
    }

    #[tokio::test]
    async fn test_pipeline_classifies_and_raises_one_fall_alert() {
        let (sample_tx, sample_rx) = broadcast::channel(16);
        let alerts = Arc::new(AlertSupervisor::with_debug_channels(AlertPolicy::default()));
        let (detection_tx, mut detections) = broadcast::channel(16);
        let mut alert_updates = alerts.subscribe();

        let pipeline = tokio::spawn(run_pipeline(
            sample_rx,
            SignalProcessor::new(),
            Arc::clone(&alerts),
            detection_tx,
        ));

        sample_tx.send(fall_sample(1_000)).unwrap();

        let result = timeout(TEST_TIMEOUT, detections.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(result.is_fall);
        assert_eq!(result.status, DetectionStatus::FallDetected);

        let state = timeout(TEST_TIMEOUT, alert_updates.recv())
            .await
            .expect("timed out")
            .unwrap();
        assert!(state.is_active);
        assert_eq!(state.alert_type, AlertType::Fall);

        pipeline.abort();
    }

    #[tokio::test]
    async fn test_engine_end_to_end_with_simulated_feed() {
        let feed = FeedServer::bind("127.0.0.1:0", 20).await.unwrap();

        let config = EngineConfig {
            server_url: feed.url(),
            ..EngineConfig::default()
        };
        let engine = MonitorEngine::with_debug_channels(config);

        let mut connection = engine.subscribe_connection();
        let mut detections = engine.subscribe_detections();

        engine.connect().await.unwrap();

        timeout(TEST_TIMEOUT, async {
            loop {
                let state = connection.recv().await.unwrap();
                if state.phase == ConnectionPhase::Connected {
                    return;
                }
            }
        })
        .await
        .expect("never connected");

        // Gentle simulated motion classifies as normal movement.
        let result = timeout(TEST_TIMEOUT, detections.recv())
            .await
            .expect("no detection arrived")
            .unwrap();
        assert_eq!(result.status, DetectionStatus::Normal);
        assert_eq!(result.movement_status, MovementStatus::Moving);
        assert!(!result.is_fall);

        engine.shutdown();
        feed.shutdown();
    }
}
