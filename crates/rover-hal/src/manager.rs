//! [`DeviceManager`] – device registry, input-to-operation links and the
//! aggregated state/event view the control loop reads.
//!
//! # Wiring
//!
//! Devices are registered once with [`DeviceManager::add`].  A
//! [`DeviceManager::link`] declares that a logical control input (for
//! example `"throttle"`) drives one [`Setter`] on one device; the link is
//! resolved into a typed handle at registration, so
//! [`DeviceManager::batch_update`] never looks anything up by operation name.
//!
//! # Callbacks
//!
//! Every registered channel receives a [`DeviceReporter`].  Posts from
//! hardware threads wait in the device's mailbox until the owning thread
//! calls a read ([`get_state`][DeviceManager::get_state],
//! [`get_event`][DeviceManager::get_event],
//! [`wait_until_all_ready`][DeviceManager::wait_until_all_ready]), which
//! collects them first.  A post made after the collection stays for the next
//! read; a post collected before it is drained exactly once.

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use rover_types::{Payload, RoverError, Setter, Value};
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceReporter};

/// Default interval between readiness checks in
/// [`DeviceManager::wait_until_all_ready`].
pub const DEFAULT_READY_POLL: Duration = Duration::from_millis(50);

/// A link resolved at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    device: usize,
    setter: Setter,
}

/// Owns every [`Device`] and the input links that drive them.
pub struct DeviceManager {
    // Insertion-ordered; `index` maps names into `devices`.
    devices: Vec<(String, Device)>,
    index: HashMap<String, usize>,
    links: HashMap<String, Link>,
    ready_poll: Duration,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            index: HashMap::new(),
            links: HashMap::new(),
            ready_poll: DEFAULT_READY_POLL,
        }
    }

    /// Override the readiness polling interval (builder-style).
    pub fn with_ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    /// Register `device` under `name` and hand its channel a reporter.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::DuplicateName`] if `name` is already registered.
    pub fn add(&mut self, name: &str, mut device: Device) -> Result<(), RoverError> {
        if self.index.contains_key(name) {
            return Err(RoverError::DuplicateName(name.to_string()));
        }
        let reporter = device.reporter(name);
        device.attach(reporter);
        info!(device = name, kind = device.kind(), stable = device.is_stable(), "device registered");
        self.index.insert(name.to_string(), self.devices.len());
        self.devices.push((name.to_string(), device));
        Ok(())
    }

    /// Declare that control updates keyed by `input` invoke `setter` on the
    /// device registered as `device`.  Nothing is invoked now.
    ///
    /// # Errors
    ///
    /// - [`RoverError::UnknownDevice`] if `device` is not registered.
    /// - [`RoverError::UnsupportedOperation`] if its channel cannot perform
    ///   `setter`.
    /// - [`RoverError::DuplicateLink`] if `input` is already linked.
    pub fn link(&mut self, device: &str, setter: Setter, input: &str) -> Result<(), RoverError> {
        let &slot = self
            .index
            .get(device)
            .ok_or_else(|| RoverError::UnknownDevice(device.to_string()))?;
        if !self.devices[slot].1.supports(setter) {
            return Err(RoverError::UnsupportedOperation {
                device: device.to_string(),
                operation: setter,
            });
        }
        if self.links.contains_key(input) {
            return Err(RoverError::DuplicateLink(input.to_string()));
        }
        info!(device, operation = %setter, input, "input linked");
        self.links.insert(input.to_string(), Link { device: slot, setter });
        Ok(())
    }

    /// [`link`][Self::link] with the operation given by its configuration name.
    ///
    /// # Errors
    ///
    /// As [`link`][Self::link], plus [`RoverError::UnknownOperation`] for a
    /// name outside [`Setter`].
    pub fn link_named(&mut self, device: &str, operation: &str, input: &str) -> Result<(), RoverError> {
        let setter = operation.parse::<Setter>()?;
        self.link(device, setter, input)
    }

    /// Block until every registered device reports stable.
    ///
    /// Checks every `ready_poll` interval.  With `timeout` set, gives up once
    /// it has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::ReadinessTimeout`] naming the devices that were
    /// still unstable when the timeout expired.
    pub fn wait_until_all_ready(&mut self, timeout: Option<Duration>) -> Result<(), RoverError> {
        let started = Instant::now();
        loop {
            self.pump();
            let unstable = self.unstable_devices();
            if unstable.is_empty() {
                info!(waited_ms = started.elapsed().as_millis() as u64, "all devices ready");
                return Ok(());
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    warn!(?unstable, "readiness barrier timed out");
                    return Err(RoverError::ReadinessTimeout { unstable });
                }
            }
            debug!(?unstable, "waiting for devices");
            thread::sleep(self.ready_poll);
        }
    }

    /// Invoke the linked operation for every key in `inputs` that has a link.
    ///
    /// Keys without a link are ignored.  A failing invocation is logged and
    /// does not stop the rest of the batch.  Returns the number of operations
    /// that succeeded.
    pub fn batch_update(&mut self, inputs: &Payload) -> usize {
        let mut applied = 0;
        for (input, value) in inputs {
            let Some(&Link { device, setter }) = self.links.get(input) else {
                continue;
            };
            let (name, dev) = &mut self.devices[device];
            let Some(number) = value.as_f64() else {
                warn!(device = %name, operation = %setter, input = %input, %value, "non-numeric control value ignored");
                continue;
            };
            match dev.apply(setter, number) {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(device = %name, operation = %setter, input = %input, value = number, error = %e, "device operation failed");
                }
            }
        }
        applied
    }

    /// Snapshot of every device's readiness keyed by device name.
    pub fn get_state(&mut self) -> Payload {
        self.pump();
        self.devices
            .iter()
            .map(|(name, dev)| (name.clone(), Value::Bool(dev.is_stable())))
            .collect()
    }

    /// Drain every device's buffered telemetry.
    ///
    /// Keys are namespaced `<device>.<key>` (e.g. `gps.lat`).  A second call
    /// with no callback activity in between returns an empty payload.
    pub fn get_event(&mut self) -> Payload {
        self.pump();
        let mut out = Payload::new();
        for (name, dev) in &mut self.devices {
            for (key, value) in dev.take_event_values() {
                out.insert(format!("{name}.{key}"), value);
            }
        }
        out
    }

    /// Names of devices currently reporting unstable, in registration order.
    pub fn unstable_devices(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|(_, dev)| !dev.is_stable())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Registered device names in registration order.
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|(name, _)| name.as_str())
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.index.get(name).map(|&slot| &self.devices[slot].1)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// A reporter for `device`, for callbacks wired outside its channel.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::UnknownDevice`] if `device` is not registered.
    pub fn reporter(&self, device: &str) -> Result<DeviceReporter, RoverError> {
        let &slot = self
            .index
            .get(device)
            .ok_or_else(|| RoverError::UnknownDevice(device.to_string()))?;
        Ok(self.devices[slot].1.reporter(device))
    }

    // Collect every device's pending callback posts.
    fn pump(&mut self) {
        for (name, dev) in &mut self.devices {
            let before = dev.is_stable();
            if let Some(stable) = dev.collect_mailbox() {
                if stable != before {
                    info!(device = %name, stable, "device readiness changed");
                }
            }
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        for (name, dev) in &mut self.devices {
            if let Err(e) = dev.close() {
                warn!(device = %name, error = %e, "failed to close device");
            }
        }
        debug!(count = self.devices.len(), "device handles released");
    }
}
