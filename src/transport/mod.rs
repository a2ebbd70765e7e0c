//! Transport layer connecting tool-calling clients to the host.
//!
//! This module provides a unified [`TransportClient`] trait with three
//! implementations, plus the [`manager::TransportManager`] that owns the
//! single active instance.
//!
//! # Architecture
//!
//! ```text
//! TransportClient (trait)
//!     │
//!     ├── FramedSocketTransport (Stdio mode)
//!     │   └── Length-prefixed frames over a loopback TCP socket
//!     │
//!     ├── HttpTransport (Http mode)
//!     │   └── Stateless request/response RPC, no persistent socket
//!     │
//!     └── WebSocketTransport (HttpPush mode)
//!         └── Persistent hub channel with keep-alive and reconnect
//! ```
//!
//! Transports never panic the process on wire failures: connection and
//! protocol errors are captured into the [`TransportState`] snapshot and
//! surfaced as failed booleans or reports.

// Rust guideline compliant 2025-11

pub mod framed;
pub mod framing;
pub mod http;
pub mod manager;
pub mod websocket;

use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire protocol selector. Exactly one mode is configured at a time, and
/// at most one transport instance is active per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Length-prefixed binary framing over a loopback TCP socket.
    Stdio,
    /// Stateless HTTP request/response RPC.
    Http,
    /// Persistent WebSocket channel to a hub endpoint.
    HttpPush,
}

impl TransportMode {
    /// All known modes, in a fixed order. Used by shutdown cleanup and
    /// stale-intent sweeps.
    pub const ALL: [TransportMode; 3] =
        [TransportMode::Stdio, TransportMode::Http, TransportMode::HttpPush];

    /// Stable string form used in config files and the state store.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Stdio => "stdio",
            TransportMode::Http => "http",
            TransportMode::HttpPush => "http-push",
        }
    }

    /// Human-facing transport name reported in state snapshots.
    pub fn transport_name(self) -> &'static str {
        match self {
            TransportMode::Stdio => "framed-socket",
            TransportMode::Http => "http",
            TransportMode::HttpPush => "websocket",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportMode::Stdio),
            "http" => Ok(TransportMode::Http),
            "http-push" => Ok(TransportMode::HttpPush),
            other => Err(format!("unknown transport mode: {other}")),
        }
    }
}

/// Immutable snapshot of a transport's connection state.
///
/// Transports replace the snapshot wholesale on every state-relevant
/// event rather than mutating fields, so concurrent readers never see a
/// partially updated state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportState {
    /// Which transport produced this snapshot.
    pub transport_name: &'static str,
    /// Whether the channel is currently established.
    pub connected: bool,
    /// Session id registered on this channel, if any.
    pub session_id: Option<String>,
    /// Free-form detail, e.g. the bound listener address.
    pub details: Option<String>,
    /// Last captured error, if any.
    pub error: Option<String>,
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl TransportState {
    /// A clean disconnected state.
    pub fn disconnected(transport_name: &'static str) -> Self {
        Self {
            transport_name,
            connected: false,
            session_id: None,
            details: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A disconnected state carrying a failure reason.
    pub fn failed(transport_name: &'static str, error: impl Into<String>) -> Self {
        Self {
            transport_name,
            connected: false,
            session_id: None,
            details: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// A connected state with optional session and detail.
    pub fn connected(
        transport_name: &'static str,
        session_id: Option<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            transport_name,
            connected: true,
            session_id,
            details,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Derive a new snapshot from this one with an error recorded.
    ///
    /// Keeps the connected flag and session untouched; a failed RPC call
    /// does not by itself tear the channel down.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.timestamp = Utc::now();
        self
    }
}

/// Result of a transport liveness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Overall verdict.
    pub success: bool,
    /// Whether the protocol handshake was observed and valid.
    pub handshake_valid: bool,
    /// Whether the ping round-trip succeeded.
    pub ping_succeeded: bool,
    /// Failure detail, if any.
    pub detail: Option<String>,
}

impl VerifyReport {
    /// A fully successful check.
    pub fn success() -> Self {
        Self {
            success: true,
            handshake_valid: true,
            ping_succeeded: true,
            detail: None,
        }
    }

    /// A failed check with a reason, nothing validated.
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            handshake_valid: false,
            ping_succeeded: false,
            detail: Some(detail.into()),
        }
    }
}

/// Errors surfaced at the transport seam.
#[derive(Debug)]
pub enum TransportError {
    /// Channel could not be established (refused, DNS failure, timeout).
    Connection(String),
    /// The peer violated the wire protocol (bad handshake, illegal frame,
    /// unparseable envelope).
    Protocol(String),
    /// The dispatcher exceeded the command's timeout.
    ExecutionTimeout(String),
    /// The remote side (or dispatcher) returned a failure result.
    Remote(String),
    /// Operation requires a started transport.
    NotStarted,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Self::ExecutionTimeout(msg) => write!(f, "Execution timeout: {msg}"),
            Self::Remote(msg) => write!(f, "Remote error: {msg}"),
            Self::NotStarted => write!(f, "Transport not started"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Shared, replace-wholesale holder for [`TransportState`] snapshots.
///
/// Cloning the cell shares the underlying slot, so background loops can
/// publish state the owning transport (and the manager) reads.
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<RwLock<TransportState>>);

impl StateCell {
    pub(crate) fn new(initial: TransportState) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    /// Current snapshot.
    pub(crate) fn snapshot(&self) -> TransportState {
        self.0.read().expect("state lock poisoned").clone()
    }

    /// Replace the snapshot wholesale.
    pub(crate) fn store(&self, state: TransportState) {
        *self.0.write().expect("state lock poisoned") = state;
    }
}

/// A bidirectional command channel between an external client and the host.
///
/// Implementors handle the underlying wire protocol (framed socket, HTTP,
/// WebSocket) and publish [`TransportState`] snapshots as they go.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Establish the channel.
    ///
    /// Returns `false` (never errors out) on failure, leaving the state
    /// `Disconnected` with a reason in [`TransportState::error`].
    async fn start(&mut self) -> bool;

    /// Tear the channel down.
    ///
    /// Idempotent; safe to call when not started. Always leaves the state
    /// `Disconnected` and cancels all background tasks promptly.
    async fn stop(&mut self);

    /// Lightweight protocol-specific liveness check.
    ///
    /// Never tears down the channel; a failed check fails only itself.
    async fn verify(&self) -> VerifyReport;

    /// Send a command envelope and await the response.
    ///
    /// Only meaningful for pull-style transports. Returns
    /// [`TransportError::NotStarted`] before a successful [`start`];
    /// push-style transports reject caller-initiated commands.
    ///
    /// [`start`]: TransportClient::start
    async fn send_command(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;

    /// Current state snapshot; safe to read concurrently with any other
    /// operation.
    fn state(&self) -> TransportState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_string_round_trip() {
        for mode in TransportMode::ALL {
            assert_eq!(mode.as_str().parse::<TransportMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_mode_serde_round_trip() {
        let json = serde_json::to_string(&TransportMode::HttpPush).unwrap();
        assert_eq!(json, "\"http-push\"");
        let back: TransportMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransportMode::HttpPush);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!("carrier-pigeon".parse::<TransportMode>().is_err());
    }

    #[test]
    fn test_state_with_error_keeps_connection_fields() {
        let state = TransportState::connected("http", Some("abc".into()), None);
        let errored = state.clone().with_error("boom");
        assert!(errored.connected);
        assert_eq!(errored.session_id.as_deref(), Some("abc"));
        assert_eq!(errored.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_state_cell_replaces_wholesale() {
        let cell = StateCell::new(TransportState::disconnected("http"));
        let reader = cell.clone();
        cell.store(TransportState::connected("http", None, Some("up".into())));
        let seen = reader.snapshot();
        assert!(seen.connected);
        assert_eq!(seen.details.as_deref(), Some("up"));
    }

    #[test]
    fn test_failed_state_has_reason() {
        let state = TransportState::failed("websocket", "connect refused");
        assert!(!state.connected);
        assert_eq!(state.error.as_deref(), Some("connect refused"));
    }
}
