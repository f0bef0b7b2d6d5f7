use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pipeline::{contained, CycleFailure, CyclePhase, CycleReport, StageKind, StageTimings};
use crate::trigger::{Firing, TriggerScheduler, TriggerState};

use super::core::Shared;
use super::lifecycle::LifecycleState;

/// Marks the engine stopped however the loop task ends, unwinding included.
struct StoppedOnExit<'a>(&'a Shared);

impl Drop for StoppedOnExit<'_> {
    fn drop(&mut self) {
        self.0.set_state(LifecycleState::Stopped);
    }
}

impl Shared {
    /// The cycle loop. Runs until `shutdown` turns true or its sender is dropped.
    ///
    /// Cycles run strictly one after another: the next wait begins only after
    /// the previous cycle, logging included, has returned.
    pub(super) async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let _stopped = StoppedOnExit(&*self);
        let previous = *self.trigger_state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut trigger =
            TriggerScheduler::resume(self.config.trigger.clone(), self.steps.clone(), previous);
        let resumed = previous != TriggerState::default();
        debug!(mode = %trigger.mode(), resumed, "scoring loop running");

        loop {
            match trigger.wait_for_trigger(self.queue.as_ref(), &mut shutdown).await {
                Firing::Shutdown => break,
                Firing::Fired { step } => {
                    if stop_requested(&shutdown) {
                        break;
                    }
                    // Only firings that actually run a cycle count as consumed.
                    *self.trigger_state.lock().unwrap_or_else(PoisonError::into_inner) =
                        trigger.state();
                    self.run_cycle(step).await;
                }
            }
        }

        debug!("scoring loop exited");
    }

    /// One pass: select, execute, record, log.
    pub(super) async fn run_cycle(&self, step: u64) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics_mut().record_cycle_start();
        let started_at = Utc::now();
        let started = Instant::now();
        let mut timings = StageTimings::default();

        let selected = contained(self.selector.select()).await;
        timings.sample = started.elapsed();

        let (context, phase, failure) = match selected {
            Ok(Some(sample)) => {
                let (context, failure) = self.pipeline.execute(sample, &mut timings).await;
                (Some(context), CyclePhase::Done, failure)
            }
            Ok(None) => (None, CyclePhase::Idle, None),
            Err(error) => (
                None,
                CyclePhase::Done,
                Some(CycleFailure::new(StageKind::Select, error)),
            ),
        };
        timings.total = started.elapsed();

        let report = CycleReport {
            cycle,
            started_at,
            step,
            context,
            timings,
            organic_queue_size: self.queue.size(),
            phase,
            failure,
        };

        self.metrics_mut().record_cycle(&report);

        let t = &report.timings;
        match &report.failure {
            None if report.phase == CyclePhase::Idle => {
                debug!(cycle, step, "no organic entry and no synthetic dataset, cycle idle");
            }
            None => info!(
                cycle,
                step,
                is_organic_sample = report.is_organic(),
                organic_queue_size = report.organic_queue_size,
                time_sample = ?t.sample,
                time_responses = ?t.responses,
                time_rewards = ?t.rewards,
                time_weights = ?t.weights,
                time_total = ?t.total,
                "cycle complete"
            ),
            Some(f) => warn!(
                cycle,
                step,
                stage = %f.stage,
                error = %f.error,
                is_organic_sample = report.is_organic(),
                time_total = ?t.total,
                "cycle failed"
            ),
        }

        self.pipeline.log(&report).await;
        report
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
