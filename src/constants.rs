//! Application-wide constants for hostbridge.
//!
//! This module centralizes timeouts, intervals, and wire-protocol limits
//! so they are discoverable in one place. Constants are grouped by domain
//! with documentation explaining their purpose.
//!
//! # Categories
//!
//! - **Timeouts**: per-phase network and teardown bounds
//! - **Keep-alive**: hub heartbeat negotiation
//! - **Reconnect**: the finite retry schedule
//! - **Defaults**: configuration fallbacks

use std::time::Duration;

/// Crate version, reported to the hub in the register envelope.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Timeouts
// ============================================================================

/// TCP connect timeout for the framed-socket verification client.
///
/// Verification dials the transport's own listener on loopback, so a
/// connect that takes longer than a second means the listener is gone.
pub const FRAMED_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for reading the plaintext handshake line after connect.
pub const FRAMED_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for a single framed read or write once the handshake is done.
///
/// Bounds each frame I/O phase so a hung peer cannot block the caller
/// indefinitely.
pub const FRAME_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client request timeout for RPC calls.
///
/// Applies to individual requests against the RPC endpoint. 10 seconds is
/// sufficient for tool calls while preventing indefinite hangs.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connect + handshake timeout.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the best-effort disconnect notification sent during stop.
///
/// Stop must not stall process teardown waiting on a dead endpoint.
pub const STOP_NOTIFY_TIMEOUT: Duration = Duration::from_millis(750);

/// Bound on stopping the active transport before an in-process reset.
///
/// The host destroys all live objects right after suspend returns, so the
/// stop must finish (or be abandoned) within this window.
pub const SUSPEND_STOP_TIMEOUT: Duration = Duration::from_millis(750);

/// Total budget for the one-shot process-exit cleanup sweep.
pub const SHUTDOWN_CLEANUP_TIMEOUT: Duration = Duration::from_millis(750);

// ============================================================================
// Keep-alive
// ============================================================================

/// Heartbeat interval used until the hub's welcome supplies its own hint.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Lower clamp for the negotiated keep-alive interval, in seconds.
///
/// A hub hint below this would melt the connection with heartbeat traffic.
pub const KEEP_ALIVE_MIN_SECS: u64 = 5;

/// Upper clamp for the negotiated keep-alive interval, in seconds.
///
/// A hub hint above this would let a dead connection linger undetected.
pub const KEEP_ALIVE_MAX_SECS: u64 = 120;

// ============================================================================
// Reconnect
// ============================================================================

/// Finite backoff schedule consumed left-to-right on reconnect attempts.
///
/// The first entry is zero so a transient blip is healed immediately.
/// Exhausting the schedule without a successful connect ends the retry
/// loop; the transport reports "Failed to reconnect" and stays down.
pub const RECONNECT_SCHEDULE: [Duration; 6] = [
    Duration::from_secs(0),
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

// ============================================================================
// Defaults
// ============================================================================

/// Default TCP port for the framed-socket listener.
pub const DEFAULT_FRAMED_PORT: u16 = 6400;

/// Default per-command execution timeout, in seconds.
///
/// Used when an execute envelope carries no timeout of its own.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Path suffix appended to the hub base URL for the plugin WebSocket.
pub const PLUGIN_WS_PATH: &str = "/plugin/ws";
