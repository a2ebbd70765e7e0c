//! WebSocket hub transport (`HttpPush` mode).
//!
//! Persistent, full-duplex channel to the hub endpoint. The hub pushes
//! `execute` envelopes; the transport runs them through the command
//! dispatcher and replies with `command_result` envelopes.
//!
//! # Architecture
//!
//! ```text
//! WebSocketTransport
//!     ├── writer gate (Arc<Mutex<Option<WsWriter>>>)
//!     │   └── serializes register / pong / command_result frames
//!     ├── supervisor task
//!     │   ├── session loop (receive + keep-alive ticks)
//!     │   └── reconnect walk over the finite schedule
//!     └── per-execute dispatch tasks (timeout-bounded)
//! ```
//!
//! # Lifecycle
//!
//! Connecting → Connected (register sent, loops running) → Closed (stop,
//! socket error, or server close) → Reconnecting (schedule walk) →
//! Connected again, or Disconnected with "Failed to reconnect" once the
//! schedule is exhausted.

// Rust guideline compliant 2025-11

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;

use crate::constants::{
    DEFAULT_KEEP_ALIVE_INTERVAL, KEEP_ALIVE_MAX_SECS, KEEP_ALIVE_MIN_SECS, PLUGIN_WS_PATH,
    RECONNECT_SCHEDULE, VERSION, WS_CONNECT_TIMEOUT,
};
use crate::dispatch::CommandDispatcher;
use crate::session::Session;

use super::{StateCell, TransportClient, TransportError, TransportState, VerifyReport};

const NAME: &str = "websocket";

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Write half of the hub connection. All outbound envelopes go through
/// one of these behind the transport's mutex gate, so frames from the
/// keep-alive loop and execute-reply tasks never interleave mid-message.
struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send failed")
    }

    async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("WebSocket pong failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }
}

/// Read half of the hub connection.
struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

/// Messages the session loop cares about; everything else is skipped
/// inside `recv`.
enum WsIncoming {
    Text(String),
    Ping(Vec<u8>),
    Close,
}

impl WsReader {
    /// Next relevant message, `None` when the stream ends.
    async fn recv(&mut self) -> Option<Result<WsIncoming>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsIncoming::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsIncoming::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(_))) => {
                    return Some(Ok(WsIncoming::Close));
                }
                Some(Ok(_)) => {
                    // Binary / pong / raw frames carry nothing for us.
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://").replace("http://", "ws://")
    }
}

/// Inbound hub envelope, discriminated by `type`. Unrecognized kinds
/// decode to `Unknown` and are ignored, never an error.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum HubEnvelope {
    #[serde(rename = "welcome")]
    Welcome {
        #[serde(rename = "keepAliveInterval")]
        keep_alive_interval: Option<u64>,
        #[serde(rename = "serverTimeout")]
        server_timeout: Option<u64>,
    },
    #[serde(rename = "execute")]
    Execute {
        id: String,
        name: String,
        #[serde(default)]
        params: Value,
        timeout: Option<u64>,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(other)]
    Unknown,
}

/// Outbound envelopes sent to the hub.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PluginEnvelope {
    Register {
        session_id: String,
        project_name: String,
        project_hash: String,
        host_version: String,
    },
    CommandResult {
        id: String,
        result: Value,
    },
    Pong {
        session_id: String,
    },
}

/// How a session loop ended.
enum SessionEnd {
    /// Explicit stop; do not reconnect.
    Shutdown,
    /// Connection dropped; feed the reconnect machine.
    Dropped(String),
}

/// Persistent hub transport with keep-alive and automatic reconnection.
pub struct WebSocketTransport {
    hub_url: String,
    session: Session,
    default_command_timeout: Duration,
    dispatcher: Arc<dyn CommandDispatcher>,
    state: StateCell,
    writer: Arc<Mutex<Option<WsWriter>>>,
    reconnecting: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("hub_url", &self.hub_url)
            .field("session_id", &self.session.session_id)
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Create a transport for the hub at `base_url`.
    ///
    /// The hub endpoint is derived by rewriting the scheme (`http`→`ws`,
    /// `https`→`wss`) and appending the fixed plugin path suffix.
    pub fn new(
        base_url: &str,
        session: Session,
        default_command_timeout: Duration,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        let hub_url = format!(
            "{}{PLUGIN_WS_PATH}",
            http_to_ws_scheme(base_url.trim_end_matches('/'))
        );
        Self {
            hub_url,
            session,
            default_command_timeout,
            dispatcher,
            state: StateCell::new(TransportState::disconnected(NAME)),
            writer: Arc::new(Mutex::new(None)),
            reconnecting: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            supervisor: None,
        }
    }

    /// Connect to the hub and send the register envelope.
    async fn connect_and_register(hub_url: &str, session: &Session) -> Result<(WsWriter, WsReader)> {
        let connect = tokio::time::timeout(
            WS_CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(hub_url),
        )
        .await
        .map_err(|_| anyhow::anyhow!("connect to {hub_url} timed out"))?;
        let (ws_stream, _response) =
            connect.with_context(|| format!("WebSocket connect to {hub_url} failed"))?;

        let (sink, stream) = ws_stream.split();
        let mut writer = WsWriter { sink };
        let reader = WsReader { stream };

        let register = PluginEnvelope::Register {
            session_id: session.session_id.to_string(),
            project_name: session.project_name.clone(),
            project_hash: session.project_hash.clone(),
            host_version: VERSION.to_string(),
        };
        let text = serde_json::to_string(&register).context("register serialization failed")?;
        writer.send_text(&text).await.context("register send failed")?;

        Ok((writer, reader))
    }

    /// Serialize and send one envelope through the writer gate.
    async fn send_envelope(
        writer: &Arc<Mutex<Option<WsWriter>>>,
        envelope: &PluginEnvelope,
    ) -> Result<(), TransportError> {
        let text = serde_json::to_string(envelope)
            .map_err(|e| TransportError::Protocol(format!("envelope serialization failed: {e}")))?;
        let mut guard = writer.lock().await;
        match guard.as_mut() {
            Some(w) => w
                .send_text(&text)
                .await
                .map_err(|e| TransportError::Connection(e.to_string())),
            None => Err(TransportError::NotStarted),
        }
    }

    /// Run one connected session until shutdown or disconnect.
    #[allow(clippy::too_many_arguments)]
    async fn run_session(
        reader: &mut WsReader,
        writer: &Arc<Mutex<Option<WsWriter>>>,
        dispatcher: &Arc<dyn CommandDispatcher>,
        session_id: &str,
        default_command_timeout: Duration,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let mut ticker = tokio::time::interval(DEFAULT_KEEP_ALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => return SessionEnd::Shutdown,

                incoming = reader.recv() => {
                    let incoming = match incoming {
                        None => return SessionEnd::Dropped("stream ended".into()),
                        Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                        Some(Ok(incoming)) => incoming,
                    };
                    match incoming {
                        WsIncoming::Close => {
                            return SessionEnd::Dropped("closed by server".into());
                        }
                        WsIncoming::Ping(data) => {
                            let mut guard = writer.lock().await;
                            if let Some(w) = guard.as_mut() {
                                if let Err(e) = w.send_pong(data).await {
                                    return SessionEnd::Dropped(format!("pong failed: {e}"));
                                }
                            }
                        }
                        WsIncoming::Text(text) => {
                            match serde_json::from_str::<HubEnvelope>(&text) {
                                Err(e) => {
                                    // Garbled envelope: protocol error, abort the
                                    // connection into the reconnect machine.
                                    return SessionEnd::Dropped(format!(
                                        "unparseable hub envelope: {e}"
                                    ));
                                }
                                Ok(HubEnvelope::Welcome { keep_alive_interval, server_timeout }) => {
                                    if let Some(hint) = keep_alive_interval {
                                        let clamped =
                                            hint.clamp(KEEP_ALIVE_MIN_SECS, KEEP_ALIVE_MAX_SECS);
                                        log::debug!(
                                            "[ws] welcome: keep-alive {hint}s (clamped {clamped}s), \
                                             server timeout {server_timeout:?}s"
                                        );
                                        ticker =
                                            tokio::time::interval(Duration::from_secs(clamped));
                                        ticker.set_missed_tick_behavior(
                                            tokio::time::MissedTickBehavior::Delay,
                                        );
                                    }
                                }
                                Ok(HubEnvelope::Execute { id, name, params, timeout }) => {
                                    Self::spawn_execute(
                                        writer,
                                        dispatcher,
                                        id,
                                        name,
                                        params,
                                        timeout
                                            .map(Duration::from_secs)
                                            .unwrap_or(default_command_timeout),
                                    );
                                }
                                Ok(HubEnvelope::Ping) => {
                                    let reply = PluginEnvelope::Pong {
                                        session_id: session_id.to_string(),
                                    };
                                    if let Err(e) = Self::send_envelope(writer, &reply).await {
                                        return SessionEnd::Dropped(format!("pong failed: {e}"));
                                    }
                                }
                                Ok(HubEnvelope::Unknown) => {
                                    log::debug!("[ws] ignoring unknown hub message");
                                }
                            }
                        }
                    }
                }

                _ = ticker.tick() => {
                    let heartbeat = PluginEnvelope::Pong {
                        session_id: session_id.to_string(),
                    };
                    if let Err(e) = Self::send_envelope(writer, &heartbeat).await {
                        return SessionEnd::Dropped(format!("keep-alive failed: {e}"));
                    }
                }
            }
        }
    }

    /// Run the dispatcher for one execute envelope on its own task.
    ///
    /// The session loop never waits on dispatch; the reply travels through
    /// the shared writer gate whenever the command finishes or times out.
    fn spawn_execute(
        writer: &Arc<Mutex<Option<WsWriter>>>,
        dispatcher: &Arc<dyn CommandDispatcher>,
        id: String,
        name: String,
        params: Value,
        timeout: Duration,
    ) {
        let writer = Arc::clone(writer);
        let dispatcher = Arc::clone(dispatcher);
        tokio::spawn(async move {
            let params = if params.is_null() { json!({}) } else { params };
            let result = match tokio::time::timeout(timeout, dispatcher.execute(&name, params))
                .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => json!({"status": "error", "error": e.to_string()}),
                Err(_) => json!({
                    "status": "error",
                    "error": format!(
                        "command '{}' timed out after {}s",
                        name,
                        timeout.as_secs()
                    ),
                }),
            };
            let reply = PluginEnvelope::CommandResult { id, result };
            if let Err(e) = Self::send_envelope(&writer, &reply).await {
                log::warn!("[ws] failed to send command result: {e}");
            }
        });
    }

    /// Supervisor: runs sessions and walks the reconnect schedule between
    /// them. Owns the reader; the writer lives behind the shared gate.
    #[allow(clippy::too_many_arguments)]
    async fn supervise(
        hub_url: String,
        session: Session,
        default_command_timeout: Duration,
        dispatcher: Arc<dyn CommandDispatcher>,
        state: StateCell,
        writer: Arc<Mutex<Option<WsWriter>>>,
        reconnecting: Arc<AtomicBool>,
        mut reader: WsReader,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let session_id = session.session_id.to_string();
        loop {
            let end = Self::run_session(
                &mut reader,
                &writer,
                &dispatcher,
                &session_id,
                default_command_timeout,
                &mut shutdown_rx,
            )
            .await;

            // The old connection is dead either way.
            writer.lock().await.take();

            let reason = match end {
                SessionEnd::Shutdown => {
                    state.store(TransportState::disconnected(NAME));
                    return;
                }
                SessionEnd::Dropped(reason) => reason,
            };
            log::warn!("[ws] hub connection lost: {reason}");

            // Only one reconnect sequence may be in flight.
            if reconnecting.swap(true, Ordering::SeqCst) {
                log::debug!("[ws] reconnect already in progress");
                return;
            }

            let mut recovered = false;
            for (attempt, delay) in RECONNECT_SCHEDULE.iter().enumerate() {
                state.store(
                    TransportState::disconnected(NAME).with_error(format!(
                        "reconnecting (attempt {}/{})",
                        attempt + 1,
                        RECONNECT_SCHEDULE.len()
                    )),
                );
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = &mut shutdown_rx => {
                        reconnecting.store(false, Ordering::SeqCst);
                        state.store(TransportState::disconnected(NAME));
                        return;
                    }
                }
                match Self::connect_and_register(&hub_url, &session).await {
                    Ok((new_writer, new_reader)) => {
                        *writer.lock().await = Some(new_writer);
                        reader = new_reader;
                        state.store(TransportState::connected(
                            NAME,
                            Some(session_id.clone()),
                            Some(format!("registered with {hub_url}")),
                        ));
                        log::info!("[ws] reconnected to hub (attempt {})", attempt + 1);
                        recovered = true;
                        break;
                    }
                    Err(e) => {
                        log::warn!("[ws] reconnect attempt {} failed: {e}", attempt + 1);
                    }
                }
            }
            reconnecting.store(false, Ordering::SeqCst);

            if !recovered {
                state.store(TransportState::failed(NAME, "Failed to reconnect"));
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl TransportClient for WebSocketTransport {
    async fn start(&mut self) -> bool {
        if self.supervisor.is_some() {
            self.stop().await;
        }

        match Self::connect_and_register(&self.hub_url, &self.session).await {
            Ok((writer, reader)) => {
                *self.writer.lock().await = Some(writer);
                self.state.store(TransportState::connected(
                    NAME,
                    Some(self.session.session_id.to_string()),
                    Some(format!("registered with {}", self.hub_url)),
                ));

                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                self.shutdown_tx = Some(shutdown_tx);
                self.supervisor = Some(tokio::spawn(Self::supervise(
                    self.hub_url.clone(),
                    self.session.clone(),
                    self.default_command_timeout,
                    Arc::clone(&self.dispatcher),
                    self.state.clone(),
                    Arc::clone(&self.writer),
                    Arc::clone(&self.reconnecting),
                    reader,
                    shutdown_rx,
                )));
                log::info!("[ws] connected to {}", self.hub_url);
                true
            }
            Err(e) => {
                let msg = format!("{e:#}");
                log::warn!("[ws] start failed: {msg}");
                self.state.store(TransportState::failed(NAME, msg));
                false
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.close().await;
        }
        if let Some(mut handle) = self.supervisor.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        self.reconnecting.store(false, Ordering::SeqCst);
        self.state.store(TransportState::disconnected(NAME));
    }

    async fn verify(&self) -> VerifyReport {
        if !self.state.snapshot().connected {
            return VerifyReport::failure("transport not connected");
        }
        let heartbeat = PluginEnvelope::Pong {
            session_id: self.session.session_id.to_string(),
        };
        match Self::send_envelope(&self.writer, &heartbeat).await {
            Ok(()) => VerifyReport::success(),
            Err(e) => VerifyReport::failure(format!("keep-alive send failed: {e}")),
        }
    }

    async fn send_command(&self, _payload: Value) -> Result<Value, TransportError> {
        if self.writer.lock().await.is_none() {
            return Err(TransportError::NotStarted);
        }
        Err(TransportError::Protocol(
            "hub transport is push-driven; commands arrive as execute envelopes".into(),
        ))
    }

    fn state(&self) -> TransportState {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(http_to_ws_scheme("https://example.com"), "wss://example.com");
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:8080"),
            "ws://localhost:8080"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_ws_passthrough() {
        assert_eq!(
            http_to_ws_scheme("ws://localhost:8080/plugin/ws"),
            "ws://localhost:8080/plugin/ws"
        );
    }

    #[test]
    fn test_welcome_envelope_parses_camel_case_hints() {
        let envelope: HubEnvelope = serde_json::from_str(
            r#"{"type":"welcome","keepAliveInterval":20,"serverTimeout":40}"#,
        )
        .unwrap();
        match envelope {
            HubEnvelope::Welcome { keep_alive_interval, server_timeout } => {
                assert_eq!(keep_alive_interval, Some(20));
                assert_eq!(server_timeout, Some(40));
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[test]
    fn test_execute_envelope_parses() {
        let envelope: HubEnvelope = serde_json::from_str(
            r#"{"type":"execute","id":"c-1","name":"manage_scene","params":{"a":1},"timeout":10}"#,
        )
        .unwrap();
        match envelope {
            HubEnvelope::Execute { id, name, params, timeout } => {
                assert_eq!(id, "c-1");
                assert_eq!(name, "manage_scene");
                assert_eq!(params["a"], 1);
                assert_eq!(timeout, Some(10));
            }
            other => panic!("expected execute, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_envelope_is_noop_not_error() {
        let envelope: HubEnvelope =
            serde_json::from_str(r#"{"type":"telemetry","payload":{"x":1}}"#).unwrap();
        assert!(matches!(envelope, HubEnvelope::Unknown));
    }

    #[test]
    fn test_register_envelope_shape() {
        let register = PluginEnvelope::Register {
            session_id: "s-1".into(),
            project_name: "Demo".into(),
            project_hash: "abc123".into(),
            host_version: "1.2.3".into(),
        };
        let json = serde_json::to_value(&register).unwrap();
        assert_eq!(json["type"], "register");
        assert_eq!(json["session_id"], "s-1");
        assert_eq!(json["project_name"], "Demo");
        assert_eq!(json["project_hash"], "abc123");
        assert_eq!(json["host_version"], "1.2.3");
    }

    #[test]
    fn test_command_result_envelope_shape() {
        let reply = PluginEnvelope::CommandResult {
            id: "c-1".into(),
            result: json!({"ok": true}),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "command_result");
        assert_eq!(json["id"], "c-1");
        assert_eq!(json["result"]["ok"], true);
    }

    #[test]
    fn test_pong_envelope_shape() {
        let pong = PluginEnvelope::Pong { session_id: "s-1".into() };
        let json = serde_json::to_value(&pong).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["session_id"], "s-1");
    }
}
