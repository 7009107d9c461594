//! [`CockpitServer`] – HTTP + WebSocket server for remote observers.
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! * Regular HTTP requests → 200 OK with the embedded cockpit page.
//! * WebSocket upgrades → the client joins the [`SubscriberSet`] and
//!   receives every broadcast; its text messages are parsed as operator
//!   input and forwarded to the control loop.
//!
//! Observers can only steer: `/control` forwards the linked control inputs
//! and nothing else, so a remote client cannot inject `should_exit` or
//! overwrite device readiness in the loop state.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use futures_util::{SinkExt, StreamExt};
use rover_types::{IS_MANUAL_MODE, Payload, RoverError, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::subscribers::SubscriberSet;

/// Default TCP port for the cockpit HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 8080;

/// Control inputs forwarded when none are configured.
pub const DEFAULT_CONTROL_INPUTS: [&str; 2] = ["throttle", "direction"];

/// The compiled-in cockpit page (HTML + JS).
const COCKPIT_HTML: &str = include_str!("cockpit.html");

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Serves the cockpit page and bridges WebSocket clients to the control loop.
///
/// # Example
///
/// ```rust,no_run
/// use rover_cockpit::{CockpitServer, SubscriberSet};
///
/// #[tokio::main]
/// async fn main() {
///     let (input_tx, _input_rx) = std::sync::mpsc::channel();
///     CockpitServer::new(SubscriberSet::new(), input_tx)
///         .run()
///         .await
///         .expect("cockpit server failed");
/// }
/// ```
pub struct CockpitServer {
    subscribers: SubscriberSet,
    input: Sender<Payload>,
    control_inputs: Arc<BTreeSet<String>>,
    port: u16,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(subscribers: SubscriberSet, input: Sender<Payload>) -> Self {
        Self {
            subscribers,
            input,
            control_inputs: Arc::new(DEFAULT_CONTROL_INPUTS.iter().map(|k| k.to_string()).collect()),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replace the set of `/control` keys forwarded to the control loop
    /// (builder-style).  Normally the inputs that have a device link.
    pub fn with_control_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.control_inputs = Arc::new(inputs.into_iter().map(Into::into).collect());
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept connections until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RoverError::Serialization`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), RoverError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RoverError::Serialization(format!("bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    ///
    /// # Errors
    ///
    /// Never returns under normal operation; accept errors are logged.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RoverError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "cockpit listening");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let subscribers = self.subscribers.clone();
                    let upstream = Upstream {
                        input: self.input.clone(),
                        control_inputs: Arc::clone(&self.control_inputs),
                    };
                    tokio::spawn(
                        async move {
                            if let Err(e) = handle_connection(stream, peer, subscribers, upstream).await {
                                warn!(error = %e, "cockpit client error");
                            }
                        }
                        .instrument(info_span!("observer", %peer)),
                    );
                }
                Err(e) => warn!(error = %e, "cockpit accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

/// Where a connection's upstream messages go.
struct Upstream {
    input: Sender<Payload>,
    control_inputs: Arc<BTreeSet<String>>,
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    subscribers: SubscriberSet,
    upstream: Upstream,
) -> Result<(), RoverError> {
    // `peek` leaves the request in the socket for tungstenite's handshake.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| RoverError::Channel(format!("peek error from {peer}: {e}")))?;

    let header_preview = String::from_utf8_lossy(&buf[..n]);
    let is_ws_upgrade = header_preview.lines().any(|line| {
        let line = line.to_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    if is_ws_upgrade {
        handle_ws(stream, peer, subscribers, upstream).await
    } else {
        serve_html(stream).await
    }
}

async fn serve_html(mut stream: TcpStream) -> Result<(), RoverError> {
    let body = COCKPIT_HTML;
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| RoverError::Channel(format!("HTTP write error: {e}")))?;
    Ok(())
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    subscribers: SubscriberSet,
    upstream: Upstream,
) -> Result<(), RoverError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RoverError::Channel(format!("WS handshake from {peer}: {e}")))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (id, mut outbound) = subscribers.register();
    info!(%peer, subscriber = %id, "observer connected");

    loop {
        tokio::select! {
            // ── Downstream: broadcasts → browser ───────────────────────────
            next = outbound.recv() => {
                let Some(text) = next else {
                    // Dropped from the set by a failed broadcast.
                    break;
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    warn!(%peer, error = %e, "send to observer failed");
                    break;
                }
            }
            // ── Upstream: browser → control loop ───────────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_upstream_message(text.as_str(), &upstream.control_inputs) {
                            if upstream.input.send(event).is_err() {
                                debug!("control loop gone; closing observer");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%peer, error = %e, "observer stream error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    subscribers.remove(&id);
    info!(%peer, subscriber = %id, "observer disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Upstream message parser
// ---------------------------------------------------------------------------

/// Turn a cockpit text message into a control-loop input event.
///
/// | Topic | Event |
/// |---|---|
/// | `/control` | the fields of `msg` named in `control_inputs` (e.g. `{"throttle":0.4,"direction":80}`) |
/// | `/agent/mode` | `{"is_manual_mode": msg.manual}` |
///
/// Anything else, including invalid JSON or a `/control` message with no
/// permitted field, yields `None`.
pub fn parse_upstream_message(text: &str, control_inputs: &BTreeSet<String>) -> Option<Payload> {
    let json = serde_json::from_str::<Value>(text).ok()?;
    let topic = json.get("topic").and_then(Value::as_str)?;
    let msg = json.get("msg")?;

    match topic {
        "/control" => {
            let fields = msg.as_object()?;
            let mut event = Payload::new();
            for (key, value) in fields {
                if control_inputs.contains(key) {
                    event.insert(key.clone(), value.clone());
                } else {
                    debug!(key = %key, "ignoring unlinked control field");
                }
            }
            (!event.is_empty()).then_some(event)
        }
        "/agent/mode" => {
            let manual = msg.get("manual").and_then(Value::as_bool)?;
            let mut event = Payload::new();
            event.insert(IS_MANUAL_MODE.to_string(), Value::Bool(manual));
            Some(event)
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use rover_types::Broadcaster;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    fn server() -> CockpitServer {
        let (tx, _rx) = std::sync::mpsc::channel();
        CockpitServer::new(SubscriberSet::new(), tx)
    }

    fn inputs() -> BTreeSet<String> {
        DEFAULT_CONTROL_INPUTS.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn default_port_is_8080() {
        assert_eq!(server().port(), DEFAULT_PORT);
    }

    #[test]
    fn with_port_overrides_default() {
        assert_eq!(server().with_port(9999).port(), 9999);
    }

    // ── Upstream message parsing ──────────────────────────────────────────────

    #[test]
    fn control_message_becomes_input_event() {
        let event =
            parse_upstream_message(r#"{"topic":"/control","msg":{"throttle":0.4,"direction":80}}"#, &inputs())
                .unwrap();
        assert_eq!(event["throttle"], Value::from(0.4));
        assert_eq!(event["direction"], Value::from(80));
        assert_eq!(event.len(), 2);
    }

    #[test]
    fn mode_message_toggles_manual_mode() {
        let event = parse_upstream_message(r#"{"topic":"/agent/mode","msg":{"manual":false}}"#, &inputs())
            .unwrap();
        assert_eq!(event[IS_MANUAL_MODE], Value::Bool(false));
    }

    #[test]
    fn unknown_or_malformed_messages_are_ignored() {
        assert!(parse_upstream_message("not json at all", &inputs()).is_none());
        assert!(parse_upstream_message(r#"{"topic":"/unknown","msg":{}}"#, &inputs()).is_none());
        assert!(parse_upstream_message(r#"{"topic":"/control","msg":3}"#, &inputs()).is_none());
        assert!(parse_upstream_message(r#"{"topic":"/agent/mode","msg":{}}"#, &inputs()).is_none());
    }

    #[test]
    fn control_message_cannot_carry_loop_fields() {
        let event = parse_upstream_message(
            r#"{"topic":"/control","msg":{"throttle":0.1,"should_exit":true,"gps":false,"is_manual_mode":false}}"#,
            &inputs(),
        )
        .unwrap();
        assert_eq!(event.len(), 1);
        assert_eq!(event["throttle"], Value::from(0.1));

        let exit_only = r#"{"topic":"/control","msg":{"should_exit":true}}"#;
        assert!(parse_upstream_message(exit_only, &inputs()).is_none());
    }

    #[test]
    fn configured_inputs_replace_the_defaults() {
        let custom: BTreeSet<String> = ["speed".to_string()].into();
        let text = r#"{"topic":"/control","msg":{"speed":0.7,"throttle":0.2}}"#;
        let event = parse_upstream_message(text, &custom).unwrap();
        assert_eq!(event.keys().collect::<Vec<_>>(), vec!["speed"]);
    }

    // ── HTML embedding ────────────────────────────────────────────────────────

    #[test]
    fn cockpit_html_contains_websocket_connect_code() {
        assert!(COCKPIT_HTML.contains("WebSocket"));
        assert!(COCKPIT_HTML.contains("/control"));
    }

    // ── End to end ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn websocket_client_receives_broadcasts_and_sends_input() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let subscribers = SubscriberSet::new();
        let (input_tx, input_rx) = std::sync::mpsc::channel();
        let server = CockpitServer::new(subscribers.clone(), input_tx).with_control_inputs(["throttle"]);
        tokio::spawn(server.serve(listener));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        // Wait for the server side to register the subscriber.
        for _ in 0..100 {
            if !subscribers.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(subscribers.len(), 1);

        let mut payload = Payload::new();
        payload.insert("gps.lat".to_string(), Value::from(49.5));
        subscribers.broadcast(&payload);

        let msg = ws.next().await.unwrap().unwrap();
        let decoded: Payload = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(decoded, payload);

        ws.send(Message::Text(
            r#"{"topic":"/control","msg":{"throttle":0.25,"should_exit":true}}"#.into(),
        ))
        .await
        .unwrap();

        let event = tokio::task::spawn_blocking(move || {
            input_rx.recv_timeout(Duration::from_secs(2))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(event["throttle"], Value::from(0.25));
        assert!(!event.contains_key("should_exit"));

        ws.close(None).await.unwrap();
        for _ in 0..100 {
            if subscribers.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(subscribers.is_empty());
    }
}
