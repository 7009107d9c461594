//! Assembles the simulated rover: one drive motor, one steering servo and a
//! positioning receiver, wired to the configured control inputs.

use std::time::Duration;

use rover_hal::sim::{SimDcMotor, SimGps, SimGpsConfig, SimServo};
use rover_hal::{Device, DeviceManager};
use rover_types::RoverError;
use tracing::info;

use crate::config::Config;

pub const MOTOR: &str = "dc_motor";
pub const SERVO: &str = "servo";
pub const GPS: &str = "gps";

/// Register every device and apply every configured link.
///
/// # Errors
///
/// Any registration or link error; all of them are configuration mistakes
/// and must abort startup.
pub fn build_device_manager(cfg: &Config) -> Result<DeviceManager, RoverError> {
    let sim = &cfg.sim;
    let mut manager = DeviceManager::new();

    manager.add(MOTOR, Device::new(Box::new(SimDcMotor::new(sim.motor_current_limit))))?;
    manager.add(
        SERVO,
        Device::new(Box::new(SimServo::new(
            sim.servo_min_pulse_us,
            sim.servo_max_pulse_us,
            sim.servo_initial_position,
        ))),
    )?;
    manager.add(
        GPS,
        Device::new(Box::new(SimGps::new(SimGpsConfig {
            fix_delay: Duration::from_millis(sim.gps_fix_delay_ms),
            report_interval: Duration::from_millis(sim.gps_report_ms),
            origin_lat: sim.gps_lat,
            origin_lng: sim.gps_lng,
            origin_alt: sim.gps_alt,
            ..SimGpsConfig::default()
        }))),
    )?;

    for link in &cfg.links {
        manager.link_named(&link.device, &link.operation, &link.input)?;
        info!(input = %link.input, device = %link.device, operation = %link.operation, "linked");
    }
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use rover_types::{Payload, Value};

    fn fast_config() -> Config {
        let mut cfg = Config::default();
        cfg.sim.gps_fix_delay_ms = 10;
        cfg.sim.gps_report_ms = 10;
        cfg
    }

    #[test]
    fn default_rig_registers_three_devices_in_order() {
        let manager = build_device_manager(&fast_config()).expect("rig");
        let names: Vec<&str> = manager.device_names().collect();
        assert_eq!(names, vec![MOTOR, SERVO, GPS]);
    }

    #[test]
    fn default_rig_becomes_ready_and_dispatches() {
        let mut manager = build_device_manager(&fast_config())
            .expect("rig")
            .with_ready_poll(Duration::from_millis(5));
        manager
            .wait_until_all_ready(Some(Duration::from_secs(5)))
            .expect("ready");

        let mut inputs = Payload::new();
        inputs.insert("throttle".to_string(), Value::from(0.5));
        inputs.insert("direction".to_string(), Value::from(45));
        assert_eq!(manager.batch_update(&inputs), 2);

        let state = manager.get_state();
        assert!(state.values().all(|v| v == &Value::Bool(true)));
    }

    #[test]
    fn link_to_unknown_device_aborts() {
        let mut cfg = fast_config();
        cfg.links.push(LinkConfig {
            input: "camera_tilt".to_string(),
            device: "gimbal".to_string(),
            operation: "set_target_position".to_string(),
        });
        let err = build_device_manager(&cfg).err().expect("should fail");
        assert!(matches!(err, RoverError::UnknownDevice(_)));
    }

    #[test]
    fn link_to_unsupported_operation_aborts() {
        let mut cfg = fast_config();
        cfg.links = vec![LinkConfig {
            input: "throttle".to_string(),
            device: GPS.to_string(),
            operation: "set_target_velocity".to_string(),
        }];
        let err = build_device_manager(&cfg).err().expect("should fail");
        assert!(err.is_configuration());
    }
}
