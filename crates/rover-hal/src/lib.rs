//! `rover-hal` – the hardware layer of the rover: the [`Channel`] seam,
//! [`Device`] wrappers and the [`DeviceManager`] that links logical control
//! inputs to device operations.
//!
//! # Modules
//!
//! - [`channel`] – [`Channel`]: one hardware capability (motor, servo,
//!   positioning receiver) with a declared set of [`Setter`][rover_types::Setter]
//!   operations.
//! - [`device`] – [`Device`] and the callback-side [`DeviceReporter`].
//! - [`manager`] – [`DeviceManager`]: registration, links, readiness
//!   barrier, batch dispatch and aggregated state/event reads.
//! - [`sim`] – simulated channels for running without hardware.

pub mod channel;
pub mod device;
pub mod manager;
pub mod sim;

pub use channel::Channel;
pub use device::{Device, DeviceReporter};
pub use manager::{DEFAULT_READY_POLL, DeviceManager};
