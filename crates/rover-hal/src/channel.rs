//! Generic `Channel` trait for motors, servos, positioning receivers and any
//! other hardware capability a [`Device`][crate::device::Device] wraps.
//!
//! Drivers implement this trait and are handed to the
//! [`DeviceManager`][crate::manager::DeviceManager] inside a `Device`.  The
//! manager never reaches into a channel: it only invokes [`Setter`]
//! operations the channel declared support for, and hands it a
//! [`DeviceReporter`] for asynchronous callbacks.

use rover_types::{RoverError, Setter};

use crate::device::DeviceReporter;

/// One hardware capability: an actuator output, a sensor feed, or both.
pub trait Channel: Send {
    /// Short driver name used in log lines, e.g. `"dc_motor"` or `"gps"`.
    fn kind(&self) -> &str;

    /// Whether this channel can perform `setter`.
    fn supports(&self, setter: Setter) -> bool;

    /// Apply a single-value command.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the hardware rejects the value
    /// (out of range, fault state, disconnected).
    fn apply(&mut self, setter: Setter, value: f64) -> Result<(), RoverError>;

    /// Readiness at construction.  Actuators without a liveness signal are
    /// usable immediately; sensors override this and report readiness later
    /// through their [`DeviceReporter`].
    fn initially_stable(&self) -> bool {
        true
    }

    /// Called once when the owning device is registered.  Channels with
    /// asynchronous callbacks keep `reporter` and forward every callback
    /// through it.
    fn attach(&mut self, _reporter: DeviceReporter) {}

    /// Release the hardware handle.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::HardwareFault`] if the driver fails to close.
    fn close(&mut self) -> Result<(), RoverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-process channel used only for tests.
    struct MockMotor {
        velocity: f64,
    }

    impl Channel for MockMotor {
        fn kind(&self) -> &str {
            "mock_motor"
        }

        fn supports(&self, setter: Setter) -> bool {
            setter == Setter::SetTargetVelocity
        }

        fn apply(&mut self, _setter: Setter, value: f64) -> Result<(), RoverError> {
            self.velocity = value;
            Ok(())
        }
    }

    #[test]
    fn defaults_are_stable_and_close_cleanly() {
        let mut motor = MockMotor { velocity: 0.0 };
        assert!(motor.initially_stable());
        assert!(motor.supports(Setter::SetTargetVelocity));
        assert!(!motor.supports(Setter::SetTargetPosition));

        motor.apply(Setter::SetTargetVelocity, 0.5).unwrap();
        assert!((motor.velocity - 0.5).abs() < f64::EPSILON);
        assert!(motor.close().is_ok());
    }
}
