//! `rover-runtime` – the real-time side of the rover.
//!
//! # Modules
//!
//! - [`control_loop`] – [`ControlLoop`]: reads operator input, dispatches it
//!   (or the autonomous command) through the
//!   [`DeviceManager`][rover_hal::DeviceManager], and broadcasts full state
//!   and telemetry deltas on two cadences.
//! - [`input`] – [`ChannelInput`]: the channel-fed [`InputSource`][rover_types::InputSource].
//! - [`autonomy`] – [`FixedCommand`]: placeholder autonomous command source.
//! - [`telemetry`] – [`init_tracing`]: global `tracing` subscriber with
//!   optional OTLP export.

pub mod autonomy;
pub mod control_loop;
pub mod input;
pub mod telemetry;

pub use autonomy::FixedCommand;
pub use control_loop::{ControlLoop, ControlLoopConfig, LoopPhase, LoopStats};
pub use input::ChannelInput;
pub use telemetry::{TracerProviderGuard, init_tracing};
