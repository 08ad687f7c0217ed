//! Alert supervision
//!
//! [`AlertSupervisor`] turns a trigger into a supervised, time-bounded
//! episode combining three channels: the published [`AlertState`]
//! countdown, a looping alert sound, and a haptic pattern. The channels
//! run independently: an unavailable audio or haptic device degrades
//! that channel only.
//!
//! Exactly zero or one episode is active at any instant. A single task
//! drives both the one-second tick and the expiry teardown, so the two
//! timers cannot outlive each other; an episode generation counter
//! fences superseded tasks out of publishing stale ticks.
//!
//! Trigger methods must be called from within a Tokio runtime.

use crate::config::AlertPolicy;
use crate::error::EngineError;
use crate::types::{AlertState, AlertType};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

/// Message shown for a detected fall.
pub const FALL_ALERT_MESSAGE: &str = "Fall Detected! Are you OK?";

/// Acknowledgement shown after an "I'm OK" response.
pub const IM_OK_MESSAGE: &str = "Glad you're OK!";

/// Audio channel for alert episodes.
pub trait AlertSounder: Send + Sync {
    /// Rewind and start the looping alert sound.
    fn play_looping(&self) -> Result<(), EngineError>;
    /// Stop playback. Safe to call when nothing is playing.
    fn stop(&self) -> Result<(), EngineError>;
    /// Release the loaded audio resource. Safe to call repeatedly.
    fn unload(&self) -> Result<(), EngineError>;
}

/// Haptic channel for alert episodes.
pub trait HapticDriver: Send + Sync {
    /// Issue a vibration pattern: [wait, vibrate, wait, vibrate, ...] ms.
    fn vibrate(&self, pattern: &[u64]) -> Result<(), EngineError>;
}

/// Sounder that only logs, for hosts without an audio device.
pub struct DebugSounder;

impl AlertSounder for DebugSounder {
    fn play_looping(&self) -> Result<(), EngineError> {
        tracing::debug!("would start looping alert sound");
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        tracing::debug!("would stop alert sound");
        Ok(())
    }

    fn unload(&self) -> Result<(), EngineError> {
        tracing::debug!("would unload alert sound");
        Ok(())
    }
}

/// Haptic driver that only logs.
pub struct DebugHaptics;

impl HapticDriver for DebugHaptics {
    fn vibrate(&self, pattern: &[u64]) -> Result<(), EngineError> {
        tracing::debug!(?pattern, "would issue haptic pattern");
        Ok(())
    }
}

/// Shared episode state, owned behind an `Arc` so the episode task can
/// finish the countdown and tear itself down.
struct AlertCore {
    policy: AlertPolicy,
    sound_enabled: bool,
    vibration_enabled: bool,
    sounder: Arc<dyn AlertSounder>,
    haptics: Arc<dyn HapticDriver>,
    state: Mutex<AlertState>,
    updates: broadcast::Sender<AlertState>,
    /// Bumped on every trigger/teardown; an episode task only publishes
    /// while its captured generation is current.
    generation: AtomicU64,
}

impl AlertCore {
    fn publish(&self, snapshot: AlertState) {
        let _ = self.updates.send(snapshot);
    }

    /// Cancel the running episode's effects: invalidate its generation,
    /// stop audio, reset state. Publishes only when an episode was
    /// actually active, which makes dismissal idempotent.
    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.sounder.stop() {
            tracing::warn!(error = %err, "failed to stop alert sound");
        }

        let snapshot = {
            let mut state = self.state.lock();
            if !state.is_active {
                return;
            }
            *state = AlertState::idle();
            state.clone()
        };
        self.publish(snapshot);
    }
}

/// Supervisor for alert episodes.
pub struct AlertSupervisor {
    core: Arc<AlertCore>,
    episode: Mutex<Option<JoinHandle<()>>>,
}

impl AlertSupervisor {
    pub fn new(
        policy: AlertPolicy,
        sound_enabled: bool,
        vibration_enabled: bool,
        sounder: Arc<dyn AlertSounder>,
        haptics: Arc<dyn HapticDriver>,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            core: Arc::new(AlertCore {
                policy,
                sound_enabled,
                vibration_enabled,
                sounder,
                haptics,
                state: Mutex::new(AlertState::idle()),
                updates,
                generation: AtomicU64::new(0),
            }),
            episode: Mutex::new(None),
        }
    }

    /// Supervisor with logging-only channels.
    pub fn with_debug_channels(policy: AlertPolicy) -> Self {
        Self::new(policy, true, true, Arc::new(DebugSounder), Arc::new(DebugHaptics))
    }

    /// Subscribe to alert state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertState> {
        self.core.updates.subscribe()
    }

    /// Current snapshot.
    pub fn state(&self) -> AlertState {
        self.core.state.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.core.state.lock().is_active
    }

    pub fn trigger_fall_alert(&self) {
        self.trigger(AlertType::Fall, FALL_ALERT_MESSAGE);
    }

    pub fn trigger_warning_alert(&self, message: &str) {
        self.trigger(AlertType::Warning, message);
    }

    pub fn trigger_success_alert(&self, message: &str) {
        self.trigger(AlertType::Success, message);
    }

    /// The user confirmed they are fine; replaces the current episode
    /// with a success acknowledgement.
    pub fn handle_im_ok_response(&self) {
        self.trigger_success_alert(IM_OK_MESSAGE);
    }

    /// Cancel the current episode. Dismissing an inactive supervisor is
    /// a no-op with no notification.
    pub fn dismiss_alert(&self) {
        self.abort_episode();
        self.core.teardown();
    }

    /// Stop any episode and release the audio resource. Safe to call
    /// multiple times.
    pub fn shutdown(&self) {
        self.dismiss_alert();
        if let Err(err) = self.core.sounder.unload() {
            tracing::warn!(error = %err, "failed to unload alert sound");
        }
    }

    fn abort_episode(&self) {
        if let Some(handle) = self.episode.lock().take() {
            handle.abort();
        }
    }

    fn trigger(&self, alert_type: AlertType, message: &str) {
        // Tear down first: at no observable instant do two episodes
        // overlap, and the previous episode's timers are dead before the
        // new ones start.
        self.abort_episode();
        self.core.teardown();

        let my_generation = self.core.generation.load(Ordering::SeqCst);
        let total = self.core.policy.countdown_secs;

        let snapshot = {
            let mut state = self.core.state.lock();
            *state = AlertState {
                is_active: true,
                alert_type,
                countdown: total,
                message: message.to_string(),
            };
            state.clone()
        };
        tracing::info!(alert_type = ?alert_type, countdown = total, "alert triggered");
        self.core.publish(snapshot);

        if self.core.sound_enabled {
            if let Err(err) = self.core.sounder.play_looping() {
                tracing::warn!(error = %err, "alert sound unavailable, continuing without audio");
            }
        }
        if self.core.vibration_enabled {
            let pattern = self.core.policy.pattern_for(alert_type);
            if let Err(err) = self.core.haptics.vibrate(pattern) {
                tracing::warn!(error = %err, "haptics unavailable, continuing without vibration");
            }
        }

        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(async move {
            let mut ticker =
                time::interval(Duration::from_millis(core.policy.tick_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately.
            ticker.tick().await;

            for _ in 0..total {
                ticker.tick().await;
                if core.generation.load(Ordering::SeqCst) != my_generation {
                    return;
                }
                let snapshot = {
                    let mut state = core.state.lock();
                    state.countdown = state.countdown.saturating_sub(1);
                    state.clone()
                };
                core.publish(snapshot);
            }

            // Countdown expired with the episode still current.
            if core.generation.load(Ordering::SeqCst) == my_generation {
                tracing::info!("alert countdown expired, auto-dismissing");
                core.teardown();
            }
        });
        *self.episode.lock() = Some(handle);
    }
}

impl Drop for AlertSupervisor {
    fn drop(&mut self) {
        self.abort_episode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::broadcast::error::TryRecvError;

    fn short_policy(countdown_secs: u32) -> AlertPolicy {
        AlertPolicy {
            countdown_secs,
            ..AlertPolicy::default()
        }
    }

    struct UnavailableSounder;

    impl AlertSounder for UnavailableSounder {
        fn play_looping(&self) -> Result<(), EngineError> {
            Err(EngineError::ResourceInit {
                resource: "audio",
                reason: "no output device".to_string(),
            })
        }

        fn stop(&self) -> Result<(), EngineError> {
            Ok(())
        }

        fn unload(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct RecordingHaptics {
        fired: AtomicBool,
    }

    impl HapticDriver for RecordingHaptics {
        fn vibrate(&self, _pattern: &[u64]) -> Result<(), EngineError> {
            self.fired.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_to_zero_then_auto_dismisses() {
        let supervisor = AlertSupervisor::with_debug_channels(short_policy(3));
        let mut updates = supervisor.subscribe();

        supervisor.trigger_fall_alert();

        let mut countdowns = Vec::new();
        for _ in 0..4 {
            let state = updates.recv().await.unwrap();
            assert!(state.is_active);
            assert_eq!(state.alert_type, AlertType::Fall);
            assert_eq!(state.message, FALL_ALERT_MESSAGE);
            countdowns.push(state.countdown);
        }
        assert_eq!(countdowns, vec![3, 2, 1, 0]);

        // Auto-dismiss arrives without any explicit call.
        let state = updates.recv().await.unwrap();
        assert!(!state.is_active);
        assert_eq!(state, AlertState::idle());
        assert!(!supervisor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_trigger_supersedes_previous_episode() {
        let supervisor = AlertSupervisor::with_debug_channels(short_policy(30));
        let mut updates = supervisor.subscribe();

        supervisor.trigger_fall_alert();
        let state = updates.recv().await.unwrap();
        assert_eq!(state.alert_type, AlertType::Fall);

        supervisor.trigger_warning_alert("device battery low");

        // Teardown of the fall episode, then the warning episode.
        let state = updates.recv().await.unwrap();
        assert!(!state.is_active);
        let state = updates.recv().await.unwrap();
        assert!(state.is_active);
        assert_eq!(state.alert_type, AlertType::Warning);
        assert_eq!(state.countdown, 30);
        assert_eq!(state.message, "device battery low");

        // Every subsequent tick belongs to the warning episode; the fall
        // episode's timer is dead.
        for expected in [29, 28, 27] {
            let state = updates.recv().await.unwrap();
            assert_eq!(state.alert_type, AlertType::Warning);
            assert_eq!(state.countdown, expected);
        }

        assert_eq!(supervisor.state().alert_type, AlertType::Warning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_is_idempotent() {
        let supervisor = AlertSupervisor::with_debug_channels(short_policy(30));
        let mut updates = supervisor.subscribe();

        supervisor.trigger_fall_alert();
        let _ = updates.recv().await.unwrap();

        supervisor.dismiss_alert();
        let state = updates.recv().await.unwrap();
        assert!(!state.is_active);

        // A second dismissal produces no further notification, even
        // after time passes.
        supervisor.dismiss_alert();
        time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_im_ok_replaces_fall_with_success() {
        let supervisor = AlertSupervisor::with_debug_channels(short_policy(30));
        let mut updates = supervisor.subscribe();

        supervisor.trigger_fall_alert();
        let _ = updates.recv().await.unwrap();

        supervisor.handle_im_ok_response();

        let state = updates.recv().await.unwrap();
        assert!(!state.is_active);
        let state = updates.recv().await.unwrap();
        assert!(state.is_active);
        assert_eq!(state.alert_type, AlertType::Success);
        assert_eq!(state.message, IM_OK_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_audio_degrades_that_channel_only() {
        let haptics = Arc::new(RecordingHaptics {
            fired: AtomicBool::new(false),
        });
        let supervisor = AlertSupervisor::new(
            short_policy(3),
            true,
            true,
            Arc::new(UnavailableSounder),
            haptics.clone(),
        );
        let mut updates = supervisor.subscribe();

        supervisor.trigger_fall_alert();

        // Visual channel still runs.
        let state = updates.recv().await.unwrap();
        assert!(state.is_active);
        assert_eq!(state.countdown, 3);
        // Haptic channel still fired.
        assert!(haptics.fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_safe_to_repeat() {
        let supervisor = AlertSupervisor::with_debug_channels(short_policy(30));
        supervisor.trigger_fall_alert();

        supervisor.shutdown();
        supervisor.shutdown();
        assert!(!supervisor.is_active());
    }
}
