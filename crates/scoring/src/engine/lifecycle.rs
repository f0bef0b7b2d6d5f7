use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ScoringError;

use super::OrganicScoring;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Running,
}

/// Handles for the running loop. Both are `Some` exactly while RUNNING.
#[derive(Default)]
pub(crate) struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl OrganicScoring {
    /// STOPPED → RUNNING: spawn the cycle loop on the current tokio runtime.
    ///
    /// Returns `Ok(false)` without spawning anything if the loop is already
    /// running. A `start` racing a `stop` waits until the stop has drained.
    pub async fn start(&self) -> Result<bool, ScoringError> {
        let runtime = Handle::try_current().map_err(|_| ScoringError::NoRuntime)?;
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("start ignored: scoring loop already running");
            return Ok(false);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Set before spawning so the loop's exit guard always has the last word.
        self.shared.set_state(LifecycleState::Running);
        let shared = Arc::clone(&self.shared);
        lifecycle.handle = Some(runtime.spawn(shared.run_loop(shutdown_rx)));
        lifecycle.shutdown = Some(shutdown_tx);

        info!(
            mode = %self.shared.config.trigger.mode,
            frequency = self.shared.config.trigger.frequency,
            step = self.shared.steps.get(),
            "organic scoring started"
        );
        Ok(true)
    }

    /// RUNNING → STOPPED: no new cycle starts after this call; an in-flight
    /// cycle runs to completion before it returns.
    ///
    /// Returns `false` if the engine was not running.
    pub async fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(handle) = lifecycle.handle.take() else {
            warn!("stop ignored: scoring loop is not running");
            return false;
        };

        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        info!("stop requested, draining in-flight cycle");

        if let Err(e) = handle.await {
            warn!(error = %e, "scoring loop ended abnormally");
        }
        self.shared.set_state(LifecycleState::Stopped);
        info!(
            cycles = self.shared.cycles.load(Ordering::Relaxed),
            organic_queue_size = self.shared.queue.size(),
            "organic scoring stopped"
        );
        true
    }
}
