//! Stateless HTTP transport (`Http` mode).
//!
//! One logical session backed by a reusable [`reqwest::Client`] handle; no
//! persistent socket is held between calls.
//!
//! # Endpoints
//!
//! - `GET /health`: initialize-on-start and liveness checks
//! - `POST /tools/call`: command envelope `{name, arguments}` in, JSON
//!   result out
//! - `POST /disconnect`: best-effort notification on stop, bounded wait

use serde_json::{json, Value};

use crate::constants::{HTTP_REQUEST_TIMEOUT, STOP_NOTIFY_TIMEOUT};

use super::{StateCell, TransportClient, TransportError, TransportState, VerifyReport};

const NAME: &str = "http";

/// Stateless request/response RPC transport.
#[derive(Debug)]
pub struct HttpTransport {
    rpc_url: String,
    session_id: String,
    client: Option<reqwest::Client>,
    state: StateCell,
}

impl HttpTransport {
    /// Create a transport against `rpc_url` (no trailing slash needed).
    pub fn new(rpc_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        let rpc_url = rpc_url.into();
        Self {
            rpc_url: rpc_url.trim_end_matches('/').to_string(),
            session_id: session_id.into(),
            client: None,
            state: StateCell::new(TransportState::disconnected(NAME)),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.rpc_url)
    }
}

#[async_trait::async_trait]
impl TransportClient for HttpTransport {
    async fn start(&mut self) -> bool {
        let client = match reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                self.state
                    .store(TransportState::failed(NAME, format!("client build failed: {e}")));
                return false;
            }
        };

        // The initialize call: a health probe that proves the RPC endpoint
        // is reachable before we report the transport as usable.
        match client.get(self.endpoint("/health")).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("[http] rpc endpoint healthy: {}", self.rpc_url);
                self.client = Some(client);
                self.state.store(TransportState::connected(
                    NAME,
                    Some(self.session_id.clone()),
                    Some(format!("rpc endpoint {}", self.rpc_url)),
                ));
                true
            }
            Ok(response) => {
                let msg = format!("initialize failed: {} from /health", response.status());
                log::warn!("[http] {msg}");
                self.state.store(TransportState::failed(NAME, msg));
                false
            }
            Err(e) => {
                let msg = format!("initialize failed: {e}");
                log::warn!("[http] {msg}");
                self.state.store(TransportState::failed(NAME, msg));
                false
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            let notify = client
                .post(self.endpoint("/disconnect"))
                .json(&json!({"session_id": self.session_id}))
                .send();
            match tokio::time::timeout(STOP_NOTIFY_TIMEOUT, notify).await {
                Ok(Ok(_)) => log::debug!("[http] disconnect notified"),
                Ok(Err(e)) => log::debug!("[http] disconnect notification failed: {e}"),
                Err(_) => log::debug!("[http] disconnect notification timed out"),
            }
        }
        self.state.store(TransportState::disconnected(NAME));
    }

    async fn verify(&self) -> VerifyReport {
        let Some(client) = &self.client else {
            return VerifyReport::failure("transport not started");
        };
        match client.get(self.endpoint("/health")).send().await {
            Ok(response) if response.status().is_success() => VerifyReport::success(),
            Ok(response) => VerifyReport {
                success: false,
                handshake_valid: true,
                ping_succeeded: false,
                detail: Some(format!("health check returned {}", response.status())),
            },
            Err(e) => VerifyReport::failure(format!("health check failed: {e}")),
        }
    }

    async fn send_command(&self, payload: Value) -> Result<Value, TransportError> {
        let Some(client) = &self.client else {
            return Err(TransportError::NotStarted);
        };

        let response = match client
            .post(self.endpoint("/tools/call"))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let msg = format!("tools/call failed: {e}");
                self.state.store(self.state.snapshot().with_error(msg.clone()));
                return Err(TransportError::Connection(msg));
            }
        };

        if !response.status().is_success() {
            let msg = format!("tools/call returned {}", response.status());
            self.state.store(self.state.snapshot().with_error(msg.clone()));
            return Err(TransportError::Remote(msg));
        }

        response.json::<Value>().await.map_err(|e| {
            let msg = format!("tools/call returned unparseable body: {e}");
            self.state.store(self.state.snapshot().with_error(msg.clone()));
            TransportError::Protocol(msg)
        })
    }

    fn state(&self) -> TransportState {
        self.state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_command_before_start() {
        let t = HttpTransport::new("http://127.0.0.1:9", "session");
        assert!(matches!(
            t.send_command(json!({"name": "ping"})).await,
            Err(TransportError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_start_against_unreachable_endpoint() {
        // Port 9 (discard) is essentially never listening on loopback.
        let mut t = HttpTransport::new("http://127.0.0.1:9", "session");
        assert!(!t.start().await);
        let state = t.state();
        assert!(!state.connected);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut t = HttpTransport::new("http://127.0.0.1:9", "session");
        t.stop().await;
        assert!(!t.state().connected);
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let t = HttpTransport::new("http://127.0.0.1:8090/", "session");
        assert_eq!(t.endpoint("/health"), "http://127.0.0.1:8090/health");
    }
}
