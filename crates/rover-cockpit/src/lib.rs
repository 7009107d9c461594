//! `rover-cockpit` – live state for remote observers.
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8080`) that:
//!
//! 1. **Serves** a small embedded cockpit page at every non-WebSocket path.
//! 2. **Broadcasts** every message the control loop publishes through the
//!    [`SubscriberSet`] to each connected WebSocket client, as UTF-8 JSON
//!    text.  Slow or disconnected clients are dropped, never waited on.
//! 3. **Accepts** upstream operator messages:
//!    - `"/control"` → the linked control inputs in the `msg` object
//!      (`throttle`, `direction`, …) are forwarded as an input event.
//!    - `"/agent/mode"` → switches between manual and autonomous dispatch.

pub mod server;
pub mod subscribers;

pub use server::{CockpitServer, DEFAULT_CONTROL_INPUTS, DEFAULT_PORT, parse_upstream_message};
pub use subscribers::{SUBSCRIBER_QUEUE, SubscriberSet};
