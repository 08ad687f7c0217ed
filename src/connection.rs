//! Connection management
//!
//! [`ConnectionManager`] owns one logical connection to the wearable:
//! URL validation, frame validation, and the reconnect state machine.
//! It is expressed sans-IO (the transport driver feeds it socket events
//! and executes the [`Directive`]s it returns), so every transition is
//! testable without a network.
//!
//! Lifecycle: `Disconnected → Connecting → Connected`; socket errors and
//! closes retry with exponential backoff until the attempt budget is
//! exhausted, after which the phase is `Failed` until an explicit
//! `connect`/`reconnect`.

use crate::config::ReconnectPolicy;
use crate::error::EngineError;
use crate::types::{ConnectionPhase, ConnectionState, SensorSample};
use crate::wire;
use std::time::Duration;

/// Required URL scheme.
pub const URL_SCHEME: &str = "ws://";

/// Maximum accepted URL length in characters.
pub const URL_MAX_LENGTH: usize = 200;

/// Validate a wearable endpoint URL: `ws://host[.label]*[:port][/path]`.
///
/// Hosts may be names or dotted-quad addresses; the port must be all
/// digits and the path must not contain whitespace.
pub fn validate_url(url: &str) -> Result<(), EngineError> {
    if !url.starts_with(URL_SCHEME) {
        return Err(EngineError::UrlValidation(format!(
            "URL must start with {URL_SCHEME}"
        )));
    }
    if url.len() > URL_MAX_LENGTH {
        return Err(EngineError::UrlValidation(format!(
            "URL is longer than {URL_MAX_LENGTH} characters"
        )));
    }

    let rest = &url[URL_SCHEME.len()..];
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(&rest[idx..])),
        None => (rest, None),
    };

    let (host, port) = match authority.rfind(':') {
        Some(idx) => (&authority[..idx], Some(&authority[idx + 1..])),
        None => (authority, None),
    };

    if host.is_empty() {
        return Err(EngineError::UrlValidation("URL is missing a host".to_string()));
    }
    for label in host.split('.') {
        if label.is_empty() || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(EngineError::UrlValidation(format!(
                "invalid host in URL: {host}"
            )));
        }
    }

    if let Some(port) = port {
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(EngineError::UrlValidation(format!(
                "invalid port in URL: {port}"
            )));
        }
    }

    if let Some(path) = path {
        if path.chars().any(char::is_whitespace) {
            return Err(EngineError::UrlValidation(
                "URL path must not contain whitespace".to_string(),
            ));
        }
    }

    Ok(())
}

/// Transport event delivered by the socket driver.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// The socket finished its handshake.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// Transport-level error (dial failure or mid-session error).
    Error(String),
    /// The peer closed the socket.
    Closed(Option<String>),
}

/// What the transport driver must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Close any existing socket, then open one to the URL.
    Open(String),
    /// Close the socket and cancel any pending retry.
    Close,
    /// Wait for the delay, then call [`ConnectionManager::retry`].
    ScheduleRetry(Duration),
    /// Nothing to do.
    Idle,
}

/// Sans-IO connection state machine.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// The endpoint this manager was last asked to reach. Stored here
    /// rather than read back off the socket handle, so a reconnect
    /// mid-teardown cannot race against a stale handle.
    current_url: Option<String>,
    policy: ReconnectPolicy,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::default(),
            current_url: None,
            policy,
        }
    }

    /// Read-only snapshot of the connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The endpoint given to the last `connect` call, if any.
    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    /// Transmission is only allowed while connected.
    pub fn can_send(&self) -> bool {
        self.state.phase == ConnectionPhase::Connected
    }

    /// Validate the URL and begin connecting.
    ///
    /// Validation failure is synchronous and leaves the state untouched.
    /// On success any existing connection is replaced, the attempt
    /// counter resets, and the phase moves to `Connecting`.
    pub fn connect(&mut self, url: &str) -> Result<Directive, EngineError> {
        validate_url(url)?;

        self.current_url = Some(url.to_string());
        self.state.phase = ConnectionPhase::Connecting;
        self.state.last_error = None;
        self.state.reconnect_attempts = 0;

        Ok(Directive::Open(url.to_string()))
    }

    /// Close the connection and clear transient state. Idempotent.
    pub fn disconnect(&mut self) -> Directive {
        self.state = ConnectionState::default();
        Directive::Close
    }

    /// Explicit user-initiated retry against the last known endpoint,
    /// resetting the attempt counter.
    pub fn reconnect(&mut self) -> Result<Directive, EngineError> {
        let url = self
            .current_url
            .clone()
            .ok_or_else(|| EngineError::Connection("no endpoint to reconnect to".to_string()))?;
        self.connect(&url)
    }

    /// The socket finished opening.
    pub fn handle_open(&mut self) {
        self.state.phase = ConnectionPhase::Connected;
        self.state.last_error = None;
        self.state.reconnect_attempts = 0;
    }

    /// An inbound text frame arrived. Valid frames become samples;
    /// malformed frames are dropped with `last_error` set and the
    /// connection left open.
    pub fn handle_message(&mut self, text: &str, received_at_ms: i64) -> Option<SensorSample> {
        match wire::parse_frame(text, received_at_ms) {
            Ok(sample) => {
                self.state.last_message_ms = Some(received_at_ms);
                Some(sample)
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed frame");
                self.state.last_error = Some(err.to_string());
                None
            }
        }
    }

    /// Transport error: dial failures and mid-session errors take the
    /// same retry path.
    pub fn handle_error(&mut self, reason: &str) -> Directive {
        if matches!(
            self.state.phase,
            ConnectionPhase::Disconnected | ConnectionPhase::Failed
        ) {
            return Directive::Idle;
        }
        self.state.last_error = Some(EngineError::Connection(reason.to_string()).to_string());
        self.schedule_reconnect()
    }

    /// The peer closed the socket.
    pub fn handle_close(&mut self, reason: Option<&str>) -> Directive {
        if matches!(
            self.state.phase,
            ConnectionPhase::Disconnected | ConnectionPhase::Failed
        ) {
            return Directive::Idle;
        }
        self.state.last_error = Some(
            reason
                .filter(|r| !r.is_empty())
                .unwrap_or("Connection closed")
                .to_string(),
        );
        self.schedule_reconnect()
    }

    /// A scheduled retry delay elapsed; begin the next attempt.
    pub fn retry(&mut self) -> Directive {
        if self.state.phase != ConnectionPhase::Reconnecting {
            return Directive::Idle;
        }
        let Some(url) = self.current_url.clone() else {
            return Directive::Idle;
        };
        self.state.reconnect_attempts += 1;
        self.state.phase = ConnectionPhase::Connecting;
        Directive::Open(url)
    }

    fn schedule_reconnect(&mut self) -> Directive {
        if self.state.reconnect_attempts >= self.policy.max_attempts {
            self.state.phase = ConnectionPhase::Failed;
            self.state.last_error = Some(EngineError::MaxReconnectAttempts.to_string());
            return Directive::Idle;
        }
        self.state.phase = ConnectionPhase::Reconnecting;
        let delay = self.policy.backoff_delay(self.state.reconnect_attempts);
        tracing::debug!(
            attempts = self.state.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        Directive::ScheduleRetry(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ReconnectPolicy::default())
    }

    #[test]
    fn test_validate_url_accepts_hosts_and_addresses() {
        assert!(validate_url("ws://sensor.local").is_ok());
        assert!(validate_url("ws://192.168.1.73:8080").is_ok());
        assert!(validate_url("ws://device-7.home.lan:9000/stream").is_ok());
        assert!(validate_url("ws://localhost:8080").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_bad_inputs() {
        assert!(validate_url("wss://sensor.local").is_err());
        assert!(validate_url("http://sensor.local").is_err());
        assert!(validate_url("ws://").is_err());
        assert!(validate_url("ws://host:port").is_err());
        assert!(validate_url("ws://ho st").is_err());
        assert!(validate_url("ws://host/pa th").is_err());
        assert!(validate_url(&format!("ws://h/{}", "x".repeat(200))).is_err());
    }

    #[test]
    fn test_connect_moves_disconnected_to_connecting() {
        let mut m = manager();
        let directive = m.connect("ws://192.168.1.73:8080").unwrap();

        assert_eq!(directive, Directive::Open("ws://192.168.1.73:8080".to_string()));
        assert_eq!(m.state().phase, ConnectionPhase::Connecting);
        assert_eq!(m.state().reconnect_attempts, 0);
        assert_eq!(m.current_url(), Some("ws://192.168.1.73:8080"));
    }

    #[test]
    fn test_invalid_connect_leaves_state_untouched() {
        let mut m = manager();
        let err = m.connect("wss://sensor.local").unwrap_err();

        assert!(matches!(err, EngineError::UrlValidation(_)));
        assert_eq!(m.state(), &ConnectionState::default());
        assert_eq!(m.current_url(), None);
    }

    #[test]
    fn test_open_clears_error_and_attempts() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        m.handle_open();

        assert_eq!(m.state().phase, ConnectionPhase::Connected);
        assert_eq!(m.state().last_error, None);
        assert!(m.can_send());
    }

    #[test]
    fn test_error_cascade_exhausts_attempts_then_fails() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        m.handle_open();

        let mut seen_attempts = Vec::new();
        loop {
            match m.handle_error("io failure") {
                Directive::ScheduleRetry(delay) => {
                    // Backoff doubles with the attempt count.
                    let expected =
                        ReconnectPolicy::default().backoff_delay(m.state().reconnect_attempts);
                    assert_eq!(delay, expected);
                    assert_eq!(m.state().phase, ConnectionPhase::Reconnecting);

                    assert_eq!(m.retry(), Directive::Open("ws://sensor.local".to_string()));
                    seen_attempts.push(m.state().reconnect_attempts);
                }
                Directive::Idle => break,
                other => panic!("unexpected directive: {other:?}"),
            }
        }

        // Attempts grow monotonically up to the budget, then terminal.
        assert_eq!(seen_attempts, vec![1, 2, 3, 4, 5]);
        assert_eq!(m.state().phase, ConnectionPhase::Failed);
        assert_eq!(
            m.state().last_error.as_deref(),
            Some("Maximum reconnection attempts reached")
        );

        // Failed is sticky: further errors change nothing.
        assert_eq!(m.handle_error("io failure"), Directive::Idle);
        assert_eq!(m.state().phase, ConnectionPhase::Failed);
    }

    #[test]
    fn test_reconnect_leaves_failed_state() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        for _ in 0..10 {
            m.handle_error("down");
            m.retry();
        }
        assert_eq!(m.state().phase, ConnectionPhase::Failed);

        let directive = m.reconnect().unwrap();
        assert_eq!(directive, Directive::Open("ws://sensor.local".to_string()));
        assert_eq!(m.state().phase, ConnectionPhase::Connecting);
        assert_eq!(m.state().reconnect_attempts, 0);
    }

    #[test]
    fn test_reconnect_without_prior_connect_errors() {
        let mut m = manager();
        assert!(matches!(m.reconnect(), Err(EngineError::Connection(_))));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        m.handle_open();
        m.handle_message(
            r#"{"accelerometer":{"x":0,"y":0,"z":9.81},"gyroscope":{"x":0,"y":0,"z":0}}"#,
            1_700_000_000_000,
        );

        assert_eq!(m.disconnect(), Directive::Close);
        let after_first = m.state().clone();
        assert_eq!(m.disconnect(), Directive::Close);

        assert_eq!(m.state(), &after_first);
        assert_eq!(m.state(), &ConnectionState::default());
    }

    #[test]
    fn test_close_after_disconnect_does_not_reconnect() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        m.handle_open();
        m.disconnect();

        assert_eq!(m.handle_close(Some("going away")), Directive::Idle);
        assert_eq!(m.state().phase, ConnectionPhase::Disconnected);
    }

    #[test]
    fn test_valid_frame_updates_last_message_time() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        m.handle_open();

        let sample = m
            .handle_message(
                r#"{"accelerometer":{"x":1,"y":2,"z":3},"gyroscope":{"x":4,"y":5,"z":6},"timestamp":42}"#,
                1_700_000_000_000,
            )
            .unwrap();

        assert_eq!(sample.timestamp_ms, 42);
        assert_eq!(m.state().last_message_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_malformed_frame_keeps_connection_open() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();
        m.handle_open();

        assert!(m.handle_message("{\"bogus\":true}", 1).is_none());
        assert_eq!(m.state().phase, ConnectionPhase::Connected);
        assert!(m
            .state()
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("Invalid message format"));

        // Subsequent valid frames keep flowing.
        assert!(m
            .handle_message(
                r#"{"accelerometer":{"x":0,"y":0,"z":9.81},"gyroscope":{"x":0,"y":0,"z":0}}"#,
                2,
            )
            .is_some());
    }

    #[test]
    fn test_dial_failure_retries_like_session_error() {
        let mut m = manager();
        m.connect("ws://sensor.local").unwrap();

        // Never opened: the dial itself failed.
        let directive = m.handle_error("connection refused");
        assert!(matches!(directive, Directive::ScheduleRetry(_)));
        assert_eq!(m.state().phase, ConnectionPhase::Reconnecting);
    }
}
