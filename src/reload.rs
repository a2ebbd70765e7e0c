//! Reload resilience across host-triggered in-process resets.
//!
//! Some host environments periodically destroy every live object and
//! background task while leaving the process and the on-disk state store
//! intact. This controller persists a small resume intent immediately
//! before such a reset and drives a retrying resume sequence afterwards,
//! so session continuity survives the reset.
//!
//! The reset itself is abstracted as an explicit [`suspend`] / [`resume`]
//! pair on the bridge's public contract; a test harness simulates a reset
//! by calling the two in order, with no actual restart.
//!
//! [`suspend`]: ReloadController::suspend
//! [`resume`]: ReloadController::resume

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::constants::{RECONNECT_SCHEDULE, SUSPEND_STOP_TIMEOUT};
use crate::store::{StateStore, KEY_CONFIGURED_MODE};
use crate::transport::manager::TransportManager;
use crate::transport::TransportMode;

/// Decision persisted across a reset: whether to reconnect, and which mode
/// was active. Written immediately before the reset, deleted immediately
/// after being read. It must never remain set with no resume pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeIntent {
    /// Whether a resume attempt should run after the reset.
    pub should_resume: bool,
    /// Mode that was active when the intent was written.
    pub mode: TransportMode,
}

/// Persists resume intent around resets and retries reconnection after.
pub struct ReloadController {
    store: StateStore,
    manager: Arc<TransportManager>,
}

impl std::fmt::Debug for ReloadController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadController").finish_non_exhaustive()
    }
}

fn intent_key(mode: TransportMode) -> String {
    format!("resume_intent.{mode}")
}

impl ReloadController {
    /// Create a controller over the given store and manager.
    pub fn new(store: StateStore, manager: Arc<TransportManager>) -> Self {
        Self { store, manager }
    }

    fn configured_mode(&self) -> Option<TransportMode> {
        self.store
            .get_str(KEY_CONFIGURED_MODE)
            .and_then(|s| s.parse().ok())
    }

    fn clear_intents(&self) {
        for mode in TransportMode::ALL {
            if let Err(e) = self.store.delete(&intent_key(mode)) {
                log::warn!("failed to clear resume intent for {mode}: {e}");
            }
        }
    }

    fn write_intent(&self, intent: ResumeIntent) -> Result<()> {
        self.store
            .set(&intent_key(intent.mode), serde_json::to_value(intent)?)
    }

    /// Called immediately before the host reset.
    ///
    /// Persists the resume intent when the active transport matches the
    /// configured mode, clears stale intents otherwise, then stops the
    /// active transport with a bounded wait so no socket or background
    /// task survives into the reset.
    pub async fn suspend(&self) {
        let configured = self.configured_mode();
        let active = self.manager.active_mode().await;

        self.clear_intents();
        match (configured, active) {
            (Some(mode), Some(active_mode)) if mode == active_mode => {
                match self.write_intent(ResumeIntent { should_resume: true, mode }) {
                    Ok(()) => log::info!("persisted resume intent for {mode}"),
                    Err(e) => log::warn!("failed to persist resume intent: {e}"),
                }
            }
            _ => {
                log::debug!(
                    "no resume intent: configured={configured:?}, active={active:?}"
                );
            }
        }

        if let Some(mode) = active {
            if tokio::time::timeout(SUSPEND_STOP_TIMEOUT, self.manager.stop(mode))
                .await
                .is_err()
            {
                log::warn!("transport stop exceeded suspend budget; proceeding with reset");
            }
        }
    }

    /// Called after the host reset.
    ///
    /// Reads and clears the resume intent, then launches an asynchronous
    /// resume loop over the reconnect schedule when the configured mode
    /// still matches. Returns the loop's handle so callers (and the test
    /// harness) can await completion; `None` when nothing resumes.
    pub async fn resume(&self) -> Option<JoinHandle<()>> {
        let configured = self.configured_mode();

        let intent = configured
            .and_then(|mode| self.store.get(&intent_key(mode)))
            .and_then(|v| serde_json::from_value::<ResumeIntent>(v).ok());

        // Cleared up front in every terminal case, so a process exit
        // mid-retry can never leave a stuck "resuming" flag behind.
        self.clear_intents();

        let mode = configured?;
        let intent = intent?;
        if !intent.should_resume || intent.mode != mode {
            return None;
        }

        let manager = Arc::clone(&self.manager);
        let store = self.store.clone();
        Some(tokio::spawn(async move {
            for (attempt, delay) in RECONNECT_SCHEDULE.iter().enumerate() {
                tokio::time::sleep(*delay).await;

                let still_configured = store
                    .get_str(KEY_CONFIGURED_MODE)
                    .and_then(|s| s.parse::<TransportMode>().ok())
                    == Some(mode);
                if !still_configured {
                    log::info!("configured mode changed; abandoning resume of {mode}");
                    return;
                }

                if manager.start(mode).await {
                    log::info!("{mode} transport resumed after reset (attempt {})", attempt + 1);
                    return;
                }
                log::warn!(
                    "resume attempt {}/{} for {mode} failed",
                    attempt + 1,
                    RECONNECT_SCHEDULE.len()
                );
            }
            log::warn!("exhausted resume schedule; {mode} transport remains stopped");
        }))
    }
}
