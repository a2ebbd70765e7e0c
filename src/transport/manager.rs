//! Single owner of the active transport instance.
//!
//! The manager enforces "at most one live transport per process": starting
//! any mode first stops whatever was active, whether it was the same mode
//! or a different one. All mutations of the active slot happen under the
//! slot lock, inside `start`/`stop`; queries take a shared read.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::dispatch::CommandDispatcher;
use crate::session::Session;

use super::framed::FramedSocketTransport;
use super::http::HttpTransport;
use super::websocket::WebSocketTransport;
use super::{TransportClient, TransportError, TransportMode, TransportState, VerifyReport};

struct ActiveTransport {
    mode: TransportMode,
    client: Box<dyn TransportClient>,
}

/// Mediates Start/Stop/Verify across the three transport implementations
/// and normalizes their results into one status shape.
pub struct TransportManager {
    config: Config,
    session: Session,
    dispatcher: Arc<dyn CommandDispatcher>,
    active: RwLock<Option<ActiveTransport>>,
}

impl std::fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportManager")
            .field("configured_mode", &self.config.mode)
            .finish_non_exhaustive()
    }
}

impl TransportManager {
    /// Create a manager; no transport is active until `start` is called.
    pub fn new(config: Config, session: Session, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        Self {
            config,
            session,
            dispatcher,
            active: RwLock::new(None),
        }
    }

    fn build(&self, mode: TransportMode) -> Box<dyn TransportClient> {
        match mode {
            TransportMode::Stdio => Box::new(FramedSocketTransport::new(
                self.config.framed_port,
                self.config.command_timeout(),
                Arc::clone(&self.dispatcher),
            )),
            TransportMode::Http => Box::new(HttpTransport::new(
                self.config.rpc_url.clone(),
                self.session.session_id.to_string(),
            )),
            TransportMode::HttpPush => Box::new(WebSocketTransport::new(
                &self.config.base_url,
                self.session.clone(),
                self.config.command_timeout(),
                Arc::clone(&self.dispatcher),
            )),
        }
    }

    /// Start the transport for `mode`, stopping any previously active
    /// instance first.
    ///
    /// Idempotent under repeated calls: a second `start` without an
    /// intervening `stop` replaces the previous instance, so at most one
    /// live transport exists at any time. The instance is retained even
    /// when its start fails, so `state` can report the failure reason.
    pub async fn start(&self, mode: TransportMode) -> bool {
        let mut slot = self.active.write().await;
        if let Some(mut previous) = slot.take() {
            log::info!(
                "stopping active {} transport before starting {}",
                previous.mode,
                mode
            );
            previous.client.stop().await;
        }

        let mut client = self.build(mode);
        let started = client.start().await;
        *slot = Some(ActiveTransport { mode, client });
        started
    }

    /// Stop the transport for `mode` if it is the active one.
    pub async fn stop(&self, mode: TransportMode) {
        let mut slot = self.active.write().await;
        match slot.take() {
            Some(mut active) if active.mode == mode => {
                active.client.stop().await;
            }
            other => {
                if other.is_some() {
                    log::debug!("stop({mode}) ignored: a different mode is active");
                }
                *slot = other;
            }
        }
    }

    /// Verify the transport for `mode`, or report failure if it is not
    /// the active one.
    pub async fn verify(&self, mode: TransportMode) -> VerifyReport {
        let slot = self.active.read().await;
        match slot.as_ref() {
            Some(active) if active.mode == mode => active.client.verify().await,
            _ => VerifyReport::failure(format!("no active {mode} transport")),
        }
    }

    /// State snapshot for `mode`; a disconnected default when it is not
    /// the active one.
    pub async fn state(&self, mode: TransportMode) -> TransportState {
        let slot = self.active.read().await;
        match slot.as_ref() {
            Some(active) if active.mode == mode => active.client.state(),
            _ => TransportState::disconnected(mode.transport_name()),
        }
    }

    /// Route a command through the active transport for `mode`.
    pub async fn send_command(
        &self,
        mode: TransportMode,
        payload: Value,
    ) -> Result<Value, TransportError> {
        let slot = self.active.read().await;
        match slot.as_ref() {
            Some(active) if active.mode == mode => active.client.send_command(payload).await,
            _ => Err(TransportError::NotStarted),
        }
    }

    /// Mode of the currently active transport, if any.
    pub async fn active_mode(&self) -> Option<TransportMode> {
        self.active.read().await.as_ref().map(|a| a.mode)
    }
}
