//! Synthetic sensor feed
//!
//! Development aid for running the pipeline without hardware: a
//! circular-motion frame generator and a small websocket server that
//! streams it to every client.

use crate::error::EngineError;
use crate::types::Vector3;
use crate::wire::SensorFrame;
use futures_util::SinkExt;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_tungstenite::tungstenite::protocol::Message;

/// Default cadence between synthetic frames.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 100;

/// Generates frames tracing gentle circular motion on top of gravity.
#[derive(Debug)]
pub struct MotionSimulator {
    angle: f64,
}

impl Default for MotionSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSimulator {
    pub fn new() -> Self {
        Self { angle: 0.0 }
    }

    /// Next frame. Timestamps are left to the receiver.
    pub fn next_frame(&mut self) -> SensorFrame {
        self.angle += 0.1;
        let a = self.angle;

        SensorFrame {
            accelerometer: Vector3::new(
                a.sin() * 2.0,
                a.cos() * 2.0,
                9.81 + (a * 2.0).sin() * 0.5,
            ),
            gyroscope: Vector3::new(
                a.cos() * 0.5,
                a.sin() * 0.5,
                (a * 3.0).sin() * 0.2,
            ),
            timestamp: None,
        }
    }
}

/// Websocket server streaming synthetic frames, for demos and tests.
pub struct FeedServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl FeedServer {
    /// Bind and start accepting. Pass port 0 for an ephemeral port.
    pub async fn bind(addr: &str, frame_interval_ms: u64) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        tracing::info!(%addr, "simulated sensor feed listening");
        let task = tokio::spawn(accept_loop(listener, frame_interval_ms));

        Ok(Self { addr, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint URL clients should connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, frame_interval_ms: u64) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "feed client connected");
                tokio::spawn(stream_frames(stream, frame_interval_ms));
            }
            Err(err) => {
                tracing::warn!(error = %err, "feed accept failed");
            }
        }
    }
}

async fn stream_frames(stream: tokio::net::TcpStream, frame_interval_ms: u64) {
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            tracing::warn!(error = %err, "feed handshake failed");
            return;
        }
    };

    let mut simulator = MotionSimulator::new();
    let mut ticker = time::interval(Duration::from_millis(frame_interval_ms));

    loop {
        ticker.tick().await;
        let frame = simulator.next_frame();
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode frame");
                continue;
            }
        };
        if ws.send(Message::Text(text)).await.is_err() {
            tracing::debug!("feed client went away");
            return;
        }
    }
}
