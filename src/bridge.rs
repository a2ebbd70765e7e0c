//! Composition root for the bridge service.
//!
//! [`Bridge`] is constructed once (by `main` or a test harness) and holds
//! everything the transport layer needs: config, the persistent store,
//! the session identity, the transport manager, and the reload controller.
//! There is no ambient static state; callers pass the instance around.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dispatch::CommandDispatcher;
use crate::reload::ReloadController;
use crate::session::Session;
use crate::shutdown;
use crate::store::{StateStore, KEY_CONFIGURED_MODE};
use crate::transport::manager::TransportManager;
use crate::transport::{TransportError, TransportState, VerifyReport};

/// The bridge service: owns the active transport and its lifecycle.
pub struct Bridge {
    config: Config,
    store: StateStore,
    session: Session,
    manager: Arc<TransportManager>,
    reload: ReloadController,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("mode", &self.config.mode)
            .field("session_id", &self.session.session_id)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Build the service graph.
    ///
    /// Loads (or creates) the persisted session and mirrors the configured
    /// mode into the store so the resume loop can re-check it after a
    /// reset.
    pub fn new(
        config: Config,
        store: StateStore,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Result<Self> {
        let session = Session::load_or_create(&store, &config.project_root)?;
        store.set(KEY_CONFIGURED_MODE, json!(config.mode.as_str()))?;

        let manager = Arc::new(TransportManager::new(
            config.clone(),
            session.clone(),
            dispatcher,
        ));
        let reload = ReloadController::new(store.clone(), Arc::clone(&manager));

        Ok(Self {
            config,
            store,
            session,
            manager,
            reload,
        })
    }

    /// Session identity this bridge registers with.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The transport manager, for callers that address modes directly.
    pub fn manager(&self) -> &Arc<TransportManager> {
        &self.manager
    }

    /// Start the configured transport.
    pub async fn start(&self) -> bool {
        self.manager.start(self.config.mode).await
    }

    /// Stop the configured transport.
    pub async fn stop(&self) {
        self.manager.stop(self.config.mode).await;
    }

    /// Verify the configured transport.
    pub async fn verify(&self) -> VerifyReport {
        self.manager.verify(self.config.mode).await
    }

    /// State snapshot of the configured transport.
    pub async fn state(&self) -> TransportState {
        self.manager.state(self.config.mode).await
    }

    /// Send a command through the configured transport (pull-style only).
    pub async fn send_command(&self, payload: Value) -> Result<Value, TransportError> {
        self.manager.send_command(self.config.mode, payload).await
    }

    /// Persist resume intent and stop the transport ahead of a host reset.
    pub async fn suspend(&self) {
        self.reload.suspend().await;
    }

    /// Consume resume intent after a host reset; returns the resume loop's
    /// handle when one was launched.
    pub async fn resume(&self) -> Option<JoinHandle<()>> {
        self.reload.resume().await
    }

    /// One-shot, bounded process-exit cleanup.
    pub async fn shutdown(&self) {
        shutdown::run(&self.manager, &self.config, &self.store).await;
    }
}
