//! [`ControlLoop`] – the real-time driver of the vehicle.
//!
//! Each iteration:
//!
//! 1. **Read** – wait at most `input_poll` for one event from the
//!    [`InputSource`].
//! 2. **Merge** – fold the event into the loop's own state.  If the merged
//!    state carries `should_exit`, the loop moves to [`LoopPhase::Exiting`]
//!    and dispatches nothing further.
//! 3. **Dispatch** – in manual mode the event itself goes to
//!    [`DeviceManager::batch_update`]; in autonomous mode the next command
//!    from the [`CommandSource`] does.
//! 4. **Full sync** – every `full_sync_interval` the state plus every
//!    device's readiness is stamped and broadcast.
//! 5. **Delta** – otherwise, every `delta_interval`, drained device telemetry
//!    (if any) is stamped and broadcast together with the iteration's event.
//!
//! Both cadences share one "last broadcast" clock: nothing is broadcast
//! within `delta_interval` of the previous message, so a due full sync waits
//! for the window to reopen.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rover_hal::DeviceManager;
use rover_types::{
    Broadcaster, CommandSource, IS_MANUAL_MODE, InputSource, Payload, SHOULD_EXIT, Value, stamp,
};
use tracing::{debug, info, info_span, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing and start-up mode for [`ControlLoop`].
#[derive(Debug, Clone)]
pub struct ControlLoopConfig {
    /// Longest a single input read may block.
    pub input_poll: Duration,
    /// Spacing of full-state broadcasts.
    pub full_sync_interval: Duration,
    /// Spacing of delta broadcasts, and the minimum spacing of any two
    /// broadcasts.
    pub delta_interval: Duration,
    /// Initial value of `is_manual_mode`.
    pub start_manual: bool,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            input_poll: Duration::from_millis(50),
            full_sync_interval: Duration::from_millis(500),
            delta_interval: Duration::from_millis(100),
            start_manual: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Running,
    /// Terminal: no further commands are dispatched.
    Exiting,
}

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub dispatched: u64,
    pub full_syncs: u64,
    pub deltas: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// ControlLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Wires input → [`DeviceManager`] → actuators, and device state →
/// [`Broadcaster`].
///
/// Owns the manager and the loop state outright; only device callbacks run
/// on other threads, and they reach the manager through per-device mailboxes.
pub struct ControlLoop {
    manager: DeviceManager,
    input: Box<dyn InputSource>,
    autonomy: Box<dyn CommandSource>,
    broadcaster: Arc<dyn Broadcaster>,
    config: ControlLoopConfig,
    state: Payload,
    phase: LoopPhase,
    last_full_sync: Option<Instant>,
    last_broadcast: Option<Instant>,
    // Wall-clock moment of the latest send; `last_broadcast` follows the
    // caller's `now`.
    last_sent: Option<Instant>,
    stats: LoopStats,
}

impl ControlLoop {
    pub fn new(
        manager: DeviceManager,
        input: Box<dyn InputSource>,
        autonomy: Box<dyn CommandSource>,
        broadcaster: Arc<dyn Broadcaster>,
        config: ControlLoopConfig,
    ) -> Self {
        let mut state = Payload::new();
        state.insert(SHOULD_EXIT.to_string(), Value::Bool(false));
        state.insert(IS_MANUAL_MODE.to_string(), Value::Bool(config.start_manual));
        Self {
            manager,
            input,
            autonomy,
            broadcaster,
            config,
            state,
            phase: LoopPhase::Running,
            last_full_sync: None,
            last_broadcast: None,
            last_sent: None,
            stats: LoopStats::default(),
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// The merged loop state (control fields plus the last readiness snapshot).
    pub fn state(&self) -> &Payload {
        &self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn manager(&self) -> &DeviceManager {
        &self.manager
    }

    pub fn is_manual_mode(&self) -> bool {
        self.state
            .get(IS_MANUAL_MODE)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    fn should_exit(&self) -> bool {
        self.state
            .get(SHOULD_EXIT)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Run until an input event requests exit, then flush once and return
    /// the loop counters.
    pub fn run(mut self) -> LoopStats {
        let _span = info_span!("control_loop").entered();
        info!(
            manual = self.is_manual_mode(),
            devices = self.manager.len(),
            "control loop running"
        );
        while self.step() == LoopPhase::Running {}
        self.flush();
        info!(stats = ?self.stats, "control loop stopped");
        self.stats
    }

    /// Read one input event (waiting at most `input_poll`) and process it.
    pub fn step(&mut self) -> LoopPhase {
        let event = match self.input.next_event(self.config.input_poll) {
            Ok(event) => event.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "input source failed; retrying next iteration");
                thread::sleep(self.config.input_poll);
                Payload::new()
            }
        };
        self.process(event, Instant::now())
    }

    /// Merge, dispatch and broadcast for one iteration observed at `now`.
    pub fn process(&mut self, event: Payload, now: Instant) -> LoopPhase {
        if self.phase == LoopPhase::Exiting {
            return self.phase;
        }
        self.stats.iterations += 1;

        self.state.extend(event.iter().map(|(k, v)| (k.clone(), v.clone())));
        if self.should_exit() {
            info!("exit requested");
            self.phase = LoopPhase::Exiting;
            return self.phase;
        }

        self.dispatch(&event);
        self.publish(&event, now);
        self.phase
    }

    fn dispatch(&mut self, event: &Payload) {
        let applied = if self.is_manual_mode() {
            self.manager.batch_update(event)
        } else {
            match self.autonomy.next_command() {
                Ok(command) => self.manager.batch_update(&command),
                Err(e) => {
                    warn!(error = %e, "autonomous command unavailable");
                    0
                }
            }
        };
        self.stats.dispatched += applied as u64;
    }

    fn publish(&mut self, event: &Payload, now: Instant) {
        let window_open = self
            .last_broadcast
            .is_none_or(|t| now.duration_since(t) >= self.config.delta_interval);
        if !window_open {
            return;
        }

        let full_due = self
            .last_full_sync
            .is_none_or(|t| now.duration_since(t) >= self.config.full_sync_interval);
        if full_due {
            let readiness = self.manager.get_state();
            self.state.extend(readiness);
            let message = self.state.clone();
            self.send(message);
            self.last_full_sync = Some(now);
            self.last_broadcast = Some(now);
            self.stats.full_syncs += 1;
            return;
        }

        let delta = self.manager.get_event();
        if delta.is_empty() {
            return;
        }
        let mut message = event.clone();
        message.extend(delta);
        self.send(message);
        self.last_broadcast = Some(now);
        self.stats.deltas += 1;
    }

    /// Final message after exit: state, readiness and any pending telemetry,
    /// sent once the current broadcast window has closed.
    fn flush(&mut self) {
        if let Some(last) = self.last_sent {
            let remaining = self.config.delta_interval.saturating_sub(last.elapsed());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
        let mut message = self.state.clone();
        message.extend(self.manager.get_state());
        message.extend(self.manager.get_event());
        self.send(message);
        self.last_broadcast = Some(Instant::now());
        self.stats.full_syncs += 1;
    }

    fn send(&mut self, mut message: Payload) {
        stamp(&mut message);
        debug!(fields = message.len(), "broadcasting");
        self.last_sent = Some(Instant::now());
        self.broadcaster.broadcast(&message);
    }
}
