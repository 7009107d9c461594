//! In-process simulated channels for running the control core without the
//! vehicle's hardware hub attached.
//!
//! | Channel | Behaviour |
//! |---|---|
//! | [`SimDcMotor`] | Accepts `SetTargetVelocity` in `-1.0..=1.0`; stable at construction. |
//! | [`SimServo`]   | Accepts `SetTargetPosition` in `0..=180` degrees; engaged and stable at construction. |
//! | [`SimGps`]     | Unstable until a driver thread reports a fix, then emits position and heading callbacks. |
//!
//! # Example
//!
//! ```rust
//! use rover_hal::{Device, DeviceManager};
//! use rover_hal::sim::{SimDcMotor, SimServo};
//! use rover_types::Setter;
//!
//! let mut dm = DeviceManager::new();
//! dm.add("dc_motor", Device::new(Box::new(SimDcMotor::new(15.0)))).unwrap();
//! dm.add("servo", Device::new(Box::new(SimServo::new(500.0, 2500.0, 90.0)))).unwrap();
//! dm.link("dc_motor", Setter::SetTargetVelocity, "throttle").unwrap();
//! dm.wait_until_all_ready(None).unwrap();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rover_types::{RoverError, Setter};
use tracing::{debug, info, info_span, warn};

use crate::channel::Channel;
use crate::device::DeviceReporter;

/// Lock a shared readout, recovering the value if a reader panicked.
fn read<T: Copy>(cell: &Mutex<T>) -> T {
    match cell.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn write<T>(cell: &Mutex<T>, value: T) {
    match cell.lock() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// DC motor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated DC motor controller.
pub struct SimDcMotor {
    current_limit: f64,
    velocity: Arc<Mutex<f64>>,
}

impl SimDcMotor {
    /// Create a motor with the given current limit in amps.
    pub fn new(current_limit: f64) -> Self {
        Self {
            current_limit,
            velocity: Arc::new(Mutex::new(0.0)),
        }
    }

    pub fn current_limit(&self) -> f64 {
        self.current_limit
    }

    /// Shared readout of the commanded velocity, usable after the motor has
    /// been moved into a [`Device`][crate::device::Device].
    pub fn commanded_velocity(&self) -> Arc<Mutex<f64>> {
        Arc::clone(&self.velocity)
    }
}

impl Channel for SimDcMotor {
    fn kind(&self) -> &str {
        "dc_motor"
    }

    fn supports(&self, setter: Setter) -> bool {
        setter == Setter::SetTargetVelocity
    }

    fn apply(&mut self, setter: Setter, value: f64) -> Result<(), RoverError> {
        if setter != Setter::SetTargetVelocity {
            return Err(RoverError::HardwareFault {
                component: "dc_motor".to_string(),
                details: format!("operation {setter} not supported"),
            });
        }
        if !(-1.0..=1.0).contains(&value) {
            return Err(RoverError::HardwareFault {
                component: "dc_motor".to_string(),
                details: format!("target velocity {value} outside -1.0..=1.0"),
            });
        }
        write(&self.velocity, value);
        Ok(())
    }

    fn close(&mut self) -> Result<(), RoverError> {
        // Stop the motor before releasing it.
        write(&self.velocity, 0.0);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RC servo
// ────────────────────────────────────────────────────────────────────────────

/// A simulated RC servo.
pub struct SimServo {
    min_pulse_us: f64,
    max_pulse_us: f64,
    engaged: bool,
    position: Arc<Mutex<f64>>,
}

impl SimServo {
    /// Maximum target position in degrees.
    pub const MAX_POSITION: f64 = 180.0;

    /// Create an engaged servo parked at `initial_position` degrees.
    pub fn new(min_pulse_us: f64, max_pulse_us: f64, initial_position: f64) -> Self {
        Self {
            min_pulse_us,
            max_pulse_us,
            engaged: true,
            position: Arc::new(Mutex::new(initial_position.clamp(0.0, Self::MAX_POSITION))),
        }
    }

    pub fn commanded_position(&self) -> Arc<Mutex<f64>> {
        Arc::clone(&self.position)
    }

    /// Pulse width in microseconds for the current position.
    pub fn pulse_width_us(&self) -> f64 {
        let span = self.max_pulse_us - self.min_pulse_us;
        self.min_pulse_us + span * read(&self.position) / Self::MAX_POSITION
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }
}

impl Channel for SimServo {
    fn kind(&self) -> &str {
        "rc_servo"
    }

    fn supports(&self, setter: Setter) -> bool {
        setter == Setter::SetTargetPosition
    }

    fn apply(&mut self, setter: Setter, value: f64) -> Result<(), RoverError> {
        if setter != Setter::SetTargetPosition {
            return Err(RoverError::HardwareFault {
                component: "rc_servo".to_string(),
                details: format!("operation {setter} not supported"),
            });
        }
        if !self.engaged {
            return Err(RoverError::HardwareFault {
                component: "rc_servo".to_string(),
                details: "servo is disengaged".to_string(),
            });
        }
        if !(0.0..=Self::MAX_POSITION).contains(&value) {
            return Err(RoverError::HardwareFault {
                component: "rc_servo".to_string(),
                details: format!("target position {value} outside 0..={}", Self::MAX_POSITION),
            });
        }
        write(&self.position, value);
        Ok(())
    }

    fn close(&mut self) -> Result<(), RoverError> {
        self.engaged = false;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// GPS receiver
// ────────────────────────────────────────────────────────────────────────────

/// Parameters for [`SimGps`].
#[derive(Debug, Clone)]
pub struct SimGpsConfig {
    /// Time from attach until the receiver reports a position fix.
    pub fix_delay: Duration,
    /// Interval between position/heading callbacks once fixed.
    pub report_interval: Duration,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub origin_alt: f64,
    /// Simulated ground speed in m/s.
    pub ground_speed: f64,
}

impl Default for SimGpsConfig {
    fn default() -> Self {
        Self {
            fix_delay: Duration::from_millis(1500),
            report_interval: Duration::from_millis(200),
            origin_lat: 49.2827,
            origin_lng: -123.1207,
            origin_alt: 70.0,
            ground_speed: 1.2,
        }
    }
}

/// A simulated GPS receiver.
///
/// Starts unstable.  On [`Channel::attach`] a driver thread is spawned that
/// reports a fix after `fix_delay`, then every `report_interval` fires a
/// position callback (`lat`, `lng`, `alt`) and a heading callback
/// (`ground_speed`).
pub struct SimGps {
    config: SimGpsConfig,
    stop: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl SimGps {
    pub fn new(config: SimGpsConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.driver.take() {
            if handle.join().is_err() {
                warn!("sim gps driver thread panicked");
            }
        }
    }
}

impl Channel for SimGps {
    fn kind(&self) -> &str {
        "gps"
    }

    fn supports(&self, _setter: Setter) -> bool {
        false
    }

    fn apply(&mut self, setter: Setter, _value: f64) -> Result<(), RoverError> {
        Err(RoverError::HardwareFault {
            component: "gps".to_string(),
            details: format!("operation {setter} not supported"),
        })
    }

    fn initially_stable(&self) -> bool {
        false
    }

    fn attach(&mut self, reporter: DeviceReporter) {
        if self.driver.is_some() {
            warn!(device = reporter.device(), "sim gps already attached");
            return;
        }
        let config = self.config.clone();
        let stop = Arc::clone(&self.stop);
        let spawned = thread::Builder::new()
            .name("sim-gps".to_string())
            .spawn(move || run_gps_driver(config, stop, reporter));
        match spawned {
            Ok(handle) => self.driver = Some(handle),
            Err(e) => warn!(error = %e, "failed to spawn sim gps driver"),
        }
    }

    fn close(&mut self) -> Result<(), RoverError> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for SimGps {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep for `total` in short slices so a stop request is noticed promptly.
/// Returns `false` if stopped.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(10);
    let mut left = total;
    while !left.is_zero() {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let step = left.min(SLICE);
        thread::sleep(step);
        left -= step;
    }
    !stop.load(Ordering::Acquire)
}

fn run_gps_driver(config: SimGpsConfig, stop: Arc<AtomicBool>, reporter: DeviceReporter) {
    let _span = info_span!("sim_gps", device = reporter.device()).entered();
    debug!("sim gps driver started");
    if !sleep_unless_stopped(config.fix_delay, &stop) {
        return;
    }
    info!("sim gps position fix acquired");
    reporter.set_stable(true);

    // Drift north-east at the configured ground speed (~111 km per degree).
    let step_deg = config.ground_speed * config.report_interval.as_secs_f64() / 111_000.0;
    let mut tick: u64 = 0;
    while sleep_unless_stopped(config.report_interval, &stop) {
        tick += 1;
        let offset = step_deg * tick as f64;
        let (lat, lng, alt) = (config.origin_lat + offset, config.origin_lng + offset, config.origin_alt);
        debug!(lat, lng, alt, "position changed");
        reporter.set_event_vals([("lat", lat), ("lng", lng), ("alt", alt)]);
        debug!(ground_speed = config.ground_speed, "heading changed");
        reporter.set_event_val("ground_speed", config.ground_speed);
    }
    debug!("sim gps driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::manager::DeviceManager;
    use rover_types::Value;

    fn fast_gps() -> SimGps {
        SimGps::new(SimGpsConfig {
            fix_delay: Duration::from_millis(20),
            report_interval: Duration::from_millis(10),
            ..SimGpsConfig::default()
        })
    }

    #[test]
    fn motor_rejects_out_of_range_velocity() {
        let mut motor = SimDcMotor::new(15.0);
        let velocity = motor.commanded_velocity();
        motor.apply(Setter::SetTargetVelocity, -0.4).unwrap();
        assert!((read(&velocity) + 0.4).abs() < f64::EPSILON);

        let err = motor.apply(Setter::SetTargetVelocity, 1.5).unwrap_err();
        assert!(matches!(err, RoverError::HardwareFault { .. }));
        assert!((read(&velocity) + 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn motor_stops_on_close() {
        let mut motor = SimDcMotor::new(15.0);
        let velocity = motor.commanded_velocity();
        motor.apply(Setter::SetTargetVelocity, 0.8).unwrap();
        motor.close().unwrap();
        assert_eq!(read(&velocity), 0.0);
    }

    #[test]
    fn servo_maps_position_to_pulse_width() {
        let mut servo = SimServo::new(500.0, 2500.0, 90.0);
        let position = servo.commanded_position();
        assert!((servo.pulse_width_us() - 1500.0).abs() < 1e-9);
        servo.apply(Setter::SetTargetPosition, 180.0).unwrap();
        assert!((servo.pulse_width_us() - 2500.0).abs() < 1e-9);
        assert_eq!(read(&position), 180.0);
    }

    #[test]
    fn servo_rejects_commands_once_disengaged() {
        let mut servo = SimServo::new(500.0, 2500.0, 90.0);
        assert!(servo.is_engaged());
        assert!(servo.apply(Setter::SetTargetPosition, 200.0).is_err());
        servo.close().unwrap();
        assert!(servo.apply(Setter::SetTargetPosition, 45.0).is_err());
    }

    #[test]
    fn gps_supports_no_setters() {
        let mut gps = fast_gps();
        assert!(!gps.initially_stable());
        assert!(!gps.supports(Setter::SetTargetPosition));
        assert!(gps.apply(Setter::SetTargetVelocity, 0.0).is_err());
    }

    #[test]
    fn gps_reports_fix_then_telemetry() {
        let mut dm = DeviceManager::new().with_ready_poll(Duration::from_millis(5));
        dm.add("gps", Device::new(Box::new(fast_gps()))).unwrap();
        assert_eq!(dm.get_state()["gps"], Value::Bool(false));

        dm.wait_until_all_ready(Some(Duration::from_secs(2))).unwrap();
        thread::sleep(Duration::from_millis(50));

        let event = dm.get_event();
        assert!(event.contains_key("gps.lat"));
        assert!(event.contains_key("gps.lng"));
        assert!(event.contains_key("gps.alt"));
        assert_eq!(event["gps.ground_speed"], Value::from(1.2));
    }

    #[test]
    fn gps_driver_stops_on_close() {
        let mut gps = fast_gps();
        let host = Device::new(Box::new(SimDcMotor::new(1.0)));
        gps.attach(host.reporter("gps"));
        gps.close().unwrap();
        assert!(gps.driver.is_none());
    }
}
