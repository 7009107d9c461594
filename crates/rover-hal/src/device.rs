//! [`Device`] – one hardware channel plus its readiness flag and latest
//! telemetry, and [`DeviceReporter`] – the handle hardware callbacks use to
//! feed a device from their own threads.
//!
//! Callbacks never touch a `Device` directly.  Each callback posts into the
//! device's [`Mailbox`], which keeps only the newest value per key and the
//! newest readiness; the manager collects the mailbox on its owning thread
//! before each read.  Posting never waits on the manager and never drops a
//! newer value in favour of an older one.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rover_types::{RoverError, Setter, Value};

use crate::channel::Channel;

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

/// Software wrapper around one hardware [`Channel`].
///
/// The device exclusively owns its channel.  `stable` starts from
/// [`Channel::initially_stable`]; `event_values` holds only the latest value
/// per key and is drained whenever the control loop reads a delta.
pub struct Device {
    channel: Box<dyn Channel>,
    stable: bool,
    event_values: HashMap<String, Value>,
    mailbox: Arc<Mutex<Mailbox>>,
}

impl Device {
    pub fn new(channel: Box<dyn Channel>) -> Self {
        let stable = channel.initially_stable();
        Self {
            channel,
            stable,
            event_values: HashMap::new(),
            mailbox: Arc::default(),
        }
    }

    /// Override the construction-time readiness (builder-style).
    pub fn with_stable(mut self, stable: bool) -> Self {
        self.stable = stable;
        self
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn set_stable(&mut self, stable: bool) {
        self.stable = stable;
    }

    /// Overwrite the latest value for `key`.
    pub fn set_event_val(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.event_values.insert(key.into(), value.into());
    }

    /// Latest buffered value for `key`, if any.
    pub fn event_val(&self, key: &str) -> Option<&Value> {
        self.event_values.get(key)
    }

    /// Take every buffered value, leaving the buffer empty.
    pub fn take_event_values(&mut self) -> HashMap<String, Value> {
        mem::take(&mut self.event_values)
    }

    pub fn kind(&self) -> &str {
        self.channel.kind()
    }

    /// A callback handle posting into this device's mailbox.
    pub(crate) fn reporter(&self, name: &str) -> DeviceReporter {
        DeviceReporter {
            device: Arc::from(name),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// Fold everything posted since the last collection into the device.
    /// Returns the new readiness if a callback reported one.
    pub(crate) fn collect_mailbox(&mut self) -> Option<bool> {
        let (values, stable) = lock(&self.mailbox).take();
        self.event_values.extend(values);
        if let Some(stable) = stable {
            self.stable = stable;
        }
        stable
    }

    pub(crate) fn supports(&self, setter: Setter) -> bool {
        self.channel.supports(setter)
    }

    pub(crate) fn apply(&mut self, setter: Setter, value: f64) -> Result<(), RoverError> {
        self.channel.apply(setter, value)
    }

    pub(crate) fn attach(&mut self, reporter: DeviceReporter) {
        self.channel.attach(reporter);
    }

    pub(crate) fn close(&mut self) -> Result<(), RoverError> {
        self.channel.close()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mailbox
// ─────────────────────────────────────────────────────────────────────────────

/// Callback output waiting to be collected, coalesced per key.
///
/// Bounded by the number of distinct keys a channel reports, so it never
/// overflows and a post never waits for the reader beyond the lock.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    values: HashMap<String, Value>,
    stable: Option<bool>,
}

impl Mailbox {
    fn take(&mut self) -> (HashMap<String, Value>, Option<bool>) {
        (mem::take(&mut self.values), self.stable.take())
    }
}

// A callback thread that panicked mid-post leaves at worst one stale key.
fn lock(mailbox: &Mutex<Mailbox>) -> MutexGuard<'_, Mailbox> {
    mailbox.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle given to a channel's callbacks.
///
/// Safe to use from any thread, and outlives the manager harmlessly: posts
/// after teardown land in a mailbox nobody reads.
#[derive(Clone, Debug)]
pub struct DeviceReporter {
    device: Arc<str>,
    mailbox: Arc<Mutex<Mailbox>>,
}

impl DeviceReporter {
    /// Name of the device this reporter feeds.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Post the latest value for `key`, replacing any uncollected one.
    pub fn set_event_val(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.mailbox).values.insert(key.into(), value.into());
    }

    /// Report several keys from one multi-value callback, e.g.
    /// `(lat, lng, alt)` from a position change.  All keys become visible to
    /// the same read.
    pub fn set_event_vals<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut mailbox = lock(&self.mailbox);
        for (key, value) in values {
            mailbox.values.insert(key.into(), value.into());
        }
    }

    pub fn set_stable(&self, stable: bool) {
        lock(&self.mailbox).stable = Some(stable);
    }
}
