//! Autonomous command sources.
//!
//! The planner that would drive the vehicle on its own is not part of this
//! workspace; [`FixedCommand`] stands in for it behind the
//! [`CommandSource`] seam so a real planner can be plugged in later.

use rover_types::{CommandSource, Payload, RoverError, Value};

/// Returns the same command on every call.
#[derive(Debug, Clone)]
pub struct FixedCommand {
    command: Payload,
}

impl FixedCommand {
    pub fn new(command: Payload) -> Self {
        Self { command }
    }
}

impl Default for FixedCommand {
    /// Slow forward crawl with the wheels turned to 30 degrees.
    fn default() -> Self {
        let mut command = Payload::new();
        command.insert("throttle".to_string(), Value::from(0.2));
        command.insert("direction".to_string(), Value::from(30));
        Self { command }
    }
}

impl CommandSource for FixedCommand {
    fn next_command(&mut self) -> Result<Payload, RoverError> {
        Ok(self.command.clone())
    }
}
