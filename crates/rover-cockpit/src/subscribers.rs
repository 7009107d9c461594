//! [`SubscriberSet`] – the live set of cockpit WebSocket clients and the
//! [`Broadcaster`] the control loop publishes through.
//!
//! Each subscriber owns a bounded queue drained by its connection task.  A
//! broadcast encodes the payload once as UTF-8 JSON text and `try_send`s it
//! to every queue, so the control loop never waits on the network.  A
//! subscriber whose queue is full or closed is dropped from the set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rover_types::{Broadcaster, Payload};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Messages buffered per subscriber before it is considered too slow.
pub const SUBSCRIBER_QUEUE: usize = 64;

#[derive(Clone, Default)]
pub struct SubscriberSet {
    inner: Arc<Mutex<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; its messages arrive on the returned receiver.
    pub fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        debug!(subscriber = %id, "subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber.  Returns `false` if it was already gone.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<String>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Broadcaster for SubscriberSet {
    fn broadcast(&self, payload: &Payload) {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to encode broadcast payload");
                return;
            }
        };
        self.lock().retain(|id, tx| match tx.try_send(text.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %id, "subscriber too slow; dropping it");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(subscriber = %id, "subscriber disconnected; dropping it");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::Value;

    fn payload() -> Payload {
        let mut p = Payload::new();
        p.insert("throttle".to_string(), Value::from(0.5));
        p.insert("ts".to_string(), Value::from(1_700_000_000.25));
        p
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_as_json_text() {
        let set = SubscriberSet::new();
        let (_a, mut rx_a) = set.register();
        let (_b, mut rx_b) = set.register();

        set.broadcast(&payload());

        for rx in [&mut rx_a, &mut rx_b] {
            let text = rx.recv().await.unwrap();
            let decoded: Payload = serde_json::from_str(&text).unwrap();
            assert_eq!(decoded, payload());
        }
    }

    #[test]
    fn closed_subscriber_is_removed_without_affecting_others() {
        let set = SubscriberSet::new();
        let (_gone, rx_gone) = set.register();
        let (_live, mut rx_live) = set.register();
        drop(rx_gone);

        set.broadcast(&payload());

        assert_eq!(set.len(), 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn slow_subscriber_is_dropped_once_its_queue_fills() {
        let set = SubscriberSet::new();
        let (_slow, _rx_slow) = set.register();

        for _ in 0..SUBSCRIBER_QUEUE {
            set.broadcast(&payload());
        }
        assert_eq!(set.len(), 1);

        set.broadcast(&payload());
        assert!(set.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let set = SubscriberSet::new();
        let (id, _rx) = set.register();
        assert!(set.remove(&id));
        assert!(!set.remove(&id));
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        SubscriberSet::new().broadcast(&payload());
    }
}
