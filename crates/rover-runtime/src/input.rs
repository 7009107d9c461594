//! [`ChannelInput`] – an [`InputSource`] fed through a std mpsc channel.
//!
//! Anything that produces operator events (the cockpit's upstream messages,
//! a Ctrl-C handler, a test) holds a [`Sender`] and pushes flat payloads;
//! the control loop reads them one per iteration with a bounded wait.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use rover_types::{InputSource, Payload, RoverError, SHOULD_EXIT, Value};
use tracing::warn;

pub struct ChannelInput {
    rx: Receiver<Payload>,
    disconnected: bool,
}

impl ChannelInput {
    /// Create a connected sender / input source pair.
    pub fn channel() -> (Sender<Payload>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            Self {
                rx,
                disconnected: false,
            },
        )
    }
}

impl InputSource for ChannelInput {
    /// A closed channel means nobody can steer the vehicle any more, so it is
    /// reported as an exit request rather than an error.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<Payload>, RoverError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                if !self.disconnected {
                    warn!("all input senders dropped; requesting exit");
                    self.disconnected = true;
                }
                let mut exit = Payload::new();
                exit.insert(SHOULD_EXIT.to_string(), Value::Bool(true));
                Ok(Some(exit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn delivers_events_in_order() {
        let (tx, mut input) = ChannelInput::channel();
        let mut first = Payload::new();
        first.insert("throttle".to_string(), Value::from(0.1));
        let mut second = Payload::new();
        second.insert("throttle".to_string(), Value::from(0.2));
        tx.send(first.clone()).unwrap();
        tx.send(second.clone()).unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(input.next_event(timeout).unwrap(), Some(first));
        assert_eq!(input.next_event(timeout).unwrap(), Some(second));
    }

    #[test]
    fn times_out_without_events() {
        let (_tx, mut input) = ChannelInput::channel();
        let started = Instant::now();
        assert_eq!(input.next_event(Duration::from_millis(20)).unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn disconnect_requests_exit() {
        let (tx, mut input) = ChannelInput::channel();
        drop(tx);
        let event = input.next_event(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(event[SHOULD_EXIT], Value::Bool(true));
    }
}
