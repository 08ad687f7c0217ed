//! Websocket transport driver
//!
//! [`SocketClient`] runs the actual socket on a single owner task: it
//! feeds transport events into the sans-IO [`ConnectionManager`] and
//! executes the directives that come back (dialing, closing, backoff
//! sleeps). State snapshots and validated samples fan out on broadcast
//! channels.

use crate::config::ReconnectPolicy;
use crate::connection::{self, ConnectionManager, Directive};
use crate::error::EngineError;
use crate::types::{ConnectionState, SensorSample};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Give up on a dial attempt after this long and treat it as a
/// connection error.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Command {
    Connect(String),
    Disconnect,
    Reconnect,
    Send(serde_json::Value),
}

/// Handle to the socket driver task.
pub struct SocketClient {
    commands: mpsc::Sender<Command>,
    states: broadcast::Sender<ConnectionState>,
    samples: broadcast::Sender<SensorSample>,
    task: JoinHandle<()>,
}

impl SocketClient {
    /// Spawn the driver task. Must be called within a Tokio runtime.
    pub fn spawn(policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::channel(16);
        let (states, _) = broadcast::channel(64);
        let (samples, _) = broadcast::channel(256);

        let manager = ConnectionManager::new(policy);
        let task = tokio::spawn(run(manager, command_rx, states.clone(), samples.clone()));

        Self {
            commands,
            states,
            samples,
            task,
        }
    }

    /// Subscribe to connection state snapshots.
    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.states.subscribe()
    }

    /// Subscribe to validated sensor samples.
    pub fn subscribe_samples(&self) -> broadcast::Receiver<SensorSample> {
        self.samples.subscribe()
    }

    /// Validate the URL and ask the driver to connect.
    ///
    /// Validation errors are synchronous; no network action is taken.
    pub async fn connect(&self, url: &str) -> Result<(), EngineError> {
        connection::validate_url(url)?;
        self.send_command(Command::Connect(url.to_string())).await
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.send_command(Command::Disconnect).await
    }

    /// Explicit retry against the last known endpoint.
    pub async fn reconnect(&self) -> Result<(), EngineError> {
        self.send_command(Command::Reconnect).await
    }

    /// Best-effort telemetry transmission; a no-op unless connected.
    pub async fn send(&self, payload: serde_json::Value) -> Result<(), EngineError> {
        self.send_command(Command::Send(payload)).await
    }

    /// Stop the driver task.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    async fn send_command(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Connection("socket driver has shut down".to_string()))
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut manager: ConnectionManager,
    mut commands: mpsc::Receiver<Command>,
    states: broadcast::Sender<ConnectionState>,
    samples: broadcast::Sender<SensorSample>,
) {
    let mut socket: Option<WsStream> = None;
    let mut retry_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                handle_command(
                    command,
                    &mut manager,
                    &mut socket,
                    &mut retry_deadline,
                ).await;
                publish_state(&states, &manager);
            }

            frame = next_frame(&mut socket), if socket.is_some() => {
                handle_frame(
                    frame,
                    &mut manager,
                    &mut socket,
                    &mut retry_deadline,
                    &samples,
                ).await;
                publish_state(&states, &manager);
            }

            _ = wait_until(retry_deadline), if retry_deadline.is_some() => {
                retry_deadline = None;
                let directive = manager.retry();
                apply_directive(directive, &mut manager, &mut socket, &mut retry_deadline).await;
                publish_state(&states, &manager);
            }
        }
    }

    close_socket(&mut socket).await;
}

async fn handle_command(
    command: Command,
    manager: &mut ConnectionManager,
    socket: &mut Option<WsStream>,
    retry_deadline: &mut Option<Instant>,
) {
    match command {
        Command::Connect(url) => match manager.connect(&url) {
            Ok(directive) => {
                apply_directive(directive, manager, socket, retry_deadline).await;
            }
            Err(err) => {
                // The public API validates before enqueueing; anything
                // landing here is a driver-internal inconsistency.
                tracing::warn!(error = %err, "rejected connect command");
            }
        },
        Command::Disconnect => {
            let directive = manager.disconnect();
            apply_directive(directive, manager, socket, retry_deadline).await;
        }
        Command::Reconnect => match manager.reconnect() {
            Ok(directive) => {
                apply_directive(directive, manager, socket, retry_deadline).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "reconnect unavailable");
            }
        },
        Command::Send(payload) => {
            if !manager.can_send() {
                tracing::warn!("dropping outbound payload: socket is not connected");
                return;
            }
            if let Some(ws) = socket.as_mut() {
                if let Err(err) = ws.send(Message::Text(payload.to_string())).await {
                    tracing::warn!(error = %err, "outbound send failed");
                    let directive = manager.handle_error(&err.to_string());
                    *socket = None;
                    apply_directive(directive, manager, socket, retry_deadline).await;
                }
            }
        }
    }
}

async fn handle_frame(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    manager: &mut ConnectionManager,
    socket: &mut Option<WsStream>,
    retry_deadline: &mut Option<Instant>,
    samples: &broadcast::Sender<SensorSample>,
) {
    match frame {
        Some(Ok(Message::Text(text))) => {
            let received_at_ms = chrono::Utc::now().timestamp_millis();
            if let Some(sample) = manager.handle_message(&text, received_at_ms) {
                let _ = samples.send(sample);
            }
        }
        Some(Ok(Message::Close(close))) => {
            let reason = close.map(|frame| frame.reason.to_string());
            *socket = None;
            let directive = manager.handle_close(reason.as_deref());
            apply_directive(directive, manager, socket, retry_deadline).await;
        }
        Some(Ok(_)) => {
            // Binary, ping, and pong frames carry no samples.
        }
        Some(Err(err)) => {
            *socket = None;
            let directive = manager.handle_error(&err.to_string());
            apply_directive(directive, manager, socket, retry_deadline).await;
        }
        None => {
            *socket = None;
            let directive = manager.handle_close(None);
            apply_directive(directive, manager, socket, retry_deadline).await;
        }
    }
}

/// Execute a directive, following dial failures into their retry
/// directives until the machine settles.
async fn apply_directive(
    mut directive: Directive,
    manager: &mut ConnectionManager,
    socket: &mut Option<WsStream>,
    retry_deadline: &mut Option<Instant>,
) {
    loop {
        match directive {
            Directive::Open(url) => {
                close_socket(socket).await;
                *retry_deadline = None;

                match time::timeout(DIAL_TIMEOUT, connect_async(url.as_str())).await {
                    Ok(Ok((ws, _response))) => {
                        tracing::info!(url = %url, "socket connected");
                        manager.handle_open();
                        *socket = Some(ws);
                        return;
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(url = %url, error = %err, "socket dial failed");
                        directive = manager.handle_error(&err.to_string());
                    }
                    Err(_) => {
                        tracing::warn!(url = %url, "socket dial timed out");
                        directive = manager.handle_error("connection attempt timed out");
                    }
                }
            }
            Directive::Close => {
                close_socket(socket).await;
                *retry_deadline = None;
                return;
            }
            Directive::ScheduleRetry(delay) => {
                *retry_deadline = Some(Instant::now() + delay);
                return;
            }
            Directive::Idle => return,
        }
    }
}

async fn close_socket(socket: &mut Option<WsStream>) {
    if let Some(mut ws) = socket.take() {
        let _ = ws.close(None).await;
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn publish_state(states: &broadcast::Sender<ConnectionState>, manager: &ConnectionManager) {
    let _ = states.send(manager.state().clone());
}
