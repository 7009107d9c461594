//! `rover-types` – shared vocabulary for the rover control core.
//!
//! Holds the message shape exchanged between the input source, the device
//! layer and the broadcast channel ([`Payload`]), the closed set of actuator
//! operations ([`Setter`]), the workspace-wide error type ([`RoverError`])
//! and the traits implemented by the external collaborators
//! ([`InputSource`], [`Broadcaster`], [`CommandSource`]).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use serde_json::Value;

/// Flat, string-keyed, JSON-compatible message.
///
/// Used for operator input events, autonomous commands, device telemetry and
/// every message handed to a [`Broadcaster`].
pub type Payload = BTreeMap<String, Value>;

/// Input key that requests a cooperative shutdown of the control loop.
pub const SHOULD_EXIT: &str = "should_exit";
/// Input key selecting manual (`true`) or autonomous (`false`) dispatch.
pub const IS_MANUAL_MODE: &str = "is_manual_mode";
/// Timestamp key stamped onto every broadcast message.
pub const TS: &str = "ts";

/// Insert [`TS`] into `payload` as the current UNIX time in fractional seconds.
pub fn stamp(payload: &mut Payload) {
    let micros = Utc::now().timestamp_micros();
    payload.insert(TS.to_string(), Value::from(micros as f64 / 1_000_000.0));
}

// ─────────────────────────────────────────────────────────────────────────────
// Setter
// ─────────────────────────────────────────────────────────────────────────────

/// Closed set of single-value operations a device channel may expose.
///
/// A link resolves its operation name into a `Setter` once, at registration
/// time, so the control loop never dispatches on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setter {
    /// Drive a motor at a target velocity (duty cycle, `-1.0..=1.0`).
    #[serde(alias = "setTargetVelocity")]
    SetTargetVelocity,
    /// Move a servo to a target position (degrees).
    #[serde(alias = "setTargetPosition")]
    SetTargetPosition,
}

impl Setter {
    /// Canonical configuration name of this operation.
    pub fn name(self) -> &'static str {
        match self {
            Setter::SetTargetVelocity => "set_target_velocity",
            Setter::SetTargetPosition => "set_target_position",
        }
    }
}

impl fmt::Display for Setter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Setter {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set_target_velocity" | "setTargetVelocity" => Ok(Setter::SetTargetVelocity),
            "set_target_position" | "setTargetPosition" => Ok(Setter::SetTargetPosition),
            other => Err(RoverError::UnknownOperation(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type covering setup wiring, readiness and runtime
/// hardware or channel failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoverError {
    #[error("device name '{0}' is already registered")]
    DuplicateName(String),

    #[error("device '{0}' is not registered")]
    UnknownDevice(String),

    #[error("input '{0}' is already linked")]
    DuplicateLink(String),

    #[error("device '{device}' does not support operation '{operation}'")]
    UnsupportedOperation { device: String, operation: Setter },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("devices not ready before timeout: {}", .unstable.join(", "))]
    ReadinessTimeout { unstable: Vec<String> },

    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl RoverError {
    /// `true` for wiring mistakes that must abort setup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RoverError::DuplicateName(_)
                | RoverError::UnknownDevice(_)
                | RoverError::DuplicateLink(_)
                | RoverError::UnsupportedOperation { .. }
                | RoverError::UnknownOperation(_)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator seams
// ─────────────────────────────────────────────────────────────────────────────

/// Source of operator control events (joystick, cockpit, scripted input).
pub trait InputSource: Send {
    /// Wait at most `timeout` for the next event.
    ///
    /// Returns `Ok(None)` when nothing arrived within the interval.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Channel`] when the source has failed.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Payload>, RoverError>;
}

/// Delivers a message to every currently connected observer.
///
/// Sends are fire-and-forget: implementations must not block the caller on a
/// slow or disconnected subscriber.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, payload: &Payload);
}

/// Produces control commands while the vehicle is in autonomous mode.
pub trait CommandSource: Send {
    /// # Errors
    ///
    /// Returns an error when no command can be produced this iteration.
    fn next_command(&mut self) -> Result<Payload, RoverError>;
}
