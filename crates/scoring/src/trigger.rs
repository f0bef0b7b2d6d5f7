//! Trigger scheduler: decides when the next scoring cycle begins.
//!
//! Time mode measures from the previous firing instant, so cycle duration
//! never adds to the period. Step mode watches the shared [`StepCounter`]
//! with a bounded wait plus change notification, and advances its baseline
//! by whole multiples of the frequency so firings stay on the 5, 10, 15...
//! grid however the counter is moved. Conditions satisfied while a cycle is
//! running collapse into a single firing.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::config::{TriggerConfig, TriggerMode};
use crate::queue::OrganicQueue;

// ── Step counter ─────────────────────────────────────────────────────

/// Process-wide, monotonically non-decreasing step counter.
///
/// Writers are the owning application (through the engine); the only reader
/// that cares about changes is the step trigger, which is notified on every
/// write.
#[derive(Clone)]
pub struct StepCounter {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for StepCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StepCounter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Add one and return the new value.
    pub fn increment(&self) -> u64 {
        let mut current = 0;
        self.tx.send_modify(|step| {
            *step += 1;
            current = *step;
        });
        current
    }

    /// Move the counter to `step`. Returns `false` (and leaves the counter
    /// alone) if that would move it backwards.
    pub fn set(&self, step: u64) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|current| {
            if step < *current {
                return false;
            }
            accepted = true;
            let changed = step != *current;
            *current = step;
            changed
        });
        accepted
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

// ── Trigger scheduler ────────────────────────────────────────────────

/// Result of waiting for the next trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firing {
    /// Start a cycle. `step` is the counter value observed at firing (0 in time mode).
    Fired { step: u64 },
    /// Stop was requested while waiting.
    Shutdown,
}

/// Where the trigger last fired. Carried across stop/start so a restart
/// resumes the schedule instead of re-firing a condition already consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerState {
    pub last_fire_at: Option<Instant>,
    /// Step baseline, always a multiple of the step frequency in effect when it was set.
    pub last_fire_step: Option<u64>,
}

/// Wait state for one run of the cycle loop. The first wait on a fresh
/// [`TriggerState`] fires immediately.
pub struct TriggerScheduler {
    config: TriggerConfig,
    steps: StepCounter,
    step_rx: watch::Receiver<u64>,
    last_fire_at: Option<Instant>,
    last_fire_step: Option<u64>,
}

impl TriggerScheduler {
    pub fn new(config: TriggerConfig, steps: StepCounter) -> Self {
        Self::resume(config, steps, TriggerState::default())
    }

    /// Continue from a previous run's [`TriggerScheduler::state`].
    pub fn resume(config: TriggerConfig, steps: StepCounter, state: TriggerState) -> Self {
        let step_rx = steps.subscribe();
        Self {
            config,
            steps,
            step_rx,
            last_fire_at: state.last_fire_at,
            last_fire_step: state.last_fire_step,
        }
    }

    pub fn state(&self) -> TriggerState {
        TriggerState {
            last_fire_at: self.last_fire_at,
            last_fire_step: self.last_fire_step,
        }
    }

    pub fn mode(&self) -> TriggerMode {
        self.config.mode
    }

    /// Suspend until the trigger condition holds or `shutdown` turns true.
    ///
    /// `queue` is read only to anneal the frequency against the organic backlog.
    pub async fn wait_for_trigger(
        &mut self,
        queue: &dyn OrganicQueue,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Firing {
        if *shutdown.borrow() {
            return Firing::Shutdown;
        }
        match self.config.mode {
            TriggerMode::Seconds => self.wait_for_interval(queue, shutdown).await,
            TriggerMode::Steps => self.wait_for_steps(queue, shutdown).await,
        }
    }

    async fn wait_for_interval(
        &mut self,
        queue: &dyn OrganicQueue,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Firing {
        if let Some(last) = self.last_fire_at {
            let interval = self.config.effective_interval(queue.size());
            let Some(deadline) = last.checked_add(interval) else {
                // Beyond the clock's range: nothing left to wait for but stop.
                shutdown_requested(shutdown).await;
                return Firing::Shutdown;
            };
            tokio::select! {
                _ = time::sleep_until(deadline) => {}
                _ = shutdown_requested(shutdown) => return Firing::Shutdown,
            }
        }
        let now = Instant::now();
        if let Some(last) = self.last_fire_at {
            debug!(since_last = ?now.duration_since(last), "time trigger fired");
        }
        self.last_fire_at = Some(now);
        Firing::Fired { step: 0 }
    }

    async fn wait_for_steps(
        &mut self,
        queue: &dyn OrganicQueue,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Firing {
        let poll = self.config.poll_interval();
        loop {
            let required = self.config.effective_steps(queue.size());
            // Mark the current value seen before reading so a write racing
            // with this check still wakes the select below.
            self.step_rx.borrow_and_update();
            let current = self.steps.get();

            match self.last_fire_step {
                None => {
                    self.last_fire_step = Some(current - current % required);
                    return Firing::Fired { step: current };
                }
                Some(last) if current.saturating_sub(last) >= required => {
                    let advanced = (current - last) / required * required;
                    self.last_fire_step = Some(last + advanced);
                    debug!(step = current, required, baseline = last + advanced, "step trigger fired");
                    return Firing::Fired { step: current };
                }
                Some(_) => {}
            }

            tokio::select! {
                _ = self.step_rx.changed() => {}
                _ = time::sleep(poll) => {}
                _ = shutdown_requested(shutdown) => return Firing::Shutdown,
            }
        }
    }
}

/// Resolves once `shutdown` holds `true` or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
