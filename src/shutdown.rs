//! Best-effort, time-bounded teardown at process exit.
//!
//! Invoked once when the process is asked to exit: concurrently stops
//! every known transport mode within a single bounded budget, then kills a
//! locally spawned RPC server child process, but only when heuristics
//! confirm it was this bridge's own spawned instance.

use crate::config::Config;
use crate::constants::SHUTDOWN_CLEANUP_TIMEOUT;
use crate::store::{StateStore, KEY_RPC_SERVER_PID, KEY_RPC_SERVER_SCOPE};
use crate::transport::manager::TransportManager;
use crate::transport::TransportMode;

/// Run the one-shot exit cleanup.
pub async fn run(manager: &TransportManager, config: &Config, store: &StateStore) {
    log::info!("running shutdown cleanup");

    let sweep = async {
        let [a, b, c] = TransportMode::ALL;
        tokio::join!(manager.stop(a), manager.stop(b), manager.stop(c));
    };
    if tokio::time::timeout(SHUTDOWN_CLEANUP_TIMEOUT, sweep)
        .await
        .is_err()
    {
        log::warn!("shutdown cleanup exceeded its budget; exiting anyway");
    }

    if config.mode == TransportMode::Http {
        terminate_spawned_rpc_server(config, store);
    }
}

/// Terminate the RPC server child, but only when it is provably ours:
/// an explicit scope marker in the store, or failing that an RPC URL
/// pointing at loopback. Unrelated processes are never touched.
fn terminate_spawned_rpc_server(config: &Config, store: &StateStore) {
    let Some(pid) = store.get(KEY_RPC_SERVER_PID).and_then(|v| v.as_u64()) else {
        return;
    };

    let scope_marked = store.get(KEY_RPC_SERVER_SCOPE).is_some();
    if !scope_marked && !url_is_local(&config.rpc_url) {
        log::debug!(
            "not terminating pid {pid}: no scope marker and {} is not local",
            config.rpc_url
        );
        return;
    }

    log::info!("terminating spawned rpc server (pid {pid})");
    graceful_kill(pid as u32);
    let _ = store.delete(KEY_RPC_SERVER_PID);
    let _ = store.delete(KEY_RPC_SERVER_SCOPE);
}

/// True when the URL's host is a loopback address.
pub(crate) fn url_is_local(url: &str) -> bool {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(after_scheme);
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or(bracketed)
    } else {
        authority.rsplit_once(':').map_or(authority, |(h, port)| {
            // Only treat the suffix as a port when it is numeric.
            if port.chars().all(|c| c.is_ascii_digit()) {
                h
            } else {
                authority
            }
        })
    };
    matches!(host, "127.0.0.1" | "localhost" | "::1")
}

/// SIGTERM, a short grace period, then SIGKILL if the process lingers.
#[cfg(unix)]
fn graceful_kill(pid: u32) {
    use std::process::Command;
    use std::time::Duration;

    let term = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status();
    if !matches!(term, Ok(status) if status.success()) {
        log::debug!("SIGTERM to {pid} failed (already gone?)");
        return;
    }

    std::thread::sleep(Duration::from_millis(200));

    // kill -0 probes liveness without sending a signal.
    let alive = Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if alive {
        log::debug!("pid {pid} survived SIGTERM; sending SIGKILL");
        let _ = Command::new("kill").arg("-KILL").arg(pid.to_string()).status();
    }
}

#[cfg(not(unix))]
fn graceful_kill(pid: u32) {
    log::debug!("process termination not supported on this platform (pid {pid})");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_urls_are_local() {
        assert!(url_is_local("http://127.0.0.1:8090"));
        assert!(url_is_local("http://localhost:8090/tools/call"));
        assert!(url_is_local("https://localhost"));
        assert!(url_is_local("http://[::1]:8090"));
    }

    #[test]
    fn test_remote_urls_are_not_local() {
        assert!(!url_is_local("http://example.com:8090"));
        assert!(!url_is_local("https://10.0.0.5"));
        assert!(!url_is_local("http://bridge.internal/health"));
    }
}
