use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::LifecycleState;
use crate::pipeline::{CyclePhase, CycleReport, StageKind};

/// Engine operational counters, snapshotted by [`crate::OrganicScoring::metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub state: LifecycleState,
    /// Cycles begun, including one still in flight.
    pub cycles_started: u64,
    /// Cycles that reached the end of the pipeline without a failure.
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    /// Firings with nothing to score.
    pub cycles_idle: u64,
    pub organic_cycles: u64,
    pub synthetic_cycles: u64,
    pub admissions_accepted: u64,
    pub admissions_rejected: u64,
    pub failures_by_stage: HashMap<StageKind, u64>,
    /// Average duration by phase name ("sample", "responses", "rewards", "weights", "total").
    pub avg_stage_duration: HashMap<String, Duration>,
    #[serde(skip)]
    stage_samples: HashMap<String, u64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self {
            state: LifecycleState::Stopped,
            cycles_started: 0,
            cycles_completed: 0,
            cycles_failed: 0,
            cycles_idle: 0,
            organic_cycles: 0,
            synthetic_cycles: 0,
            admissions_accepted: 0,
            admissions_rejected: 0,
            failures_by_stage: HashMap::new(),
            avg_stage_duration: HashMap::new(),
            stage_samples: HashMap::new(),
            last_cycle_at: None,
        }
    }
}

impl EngineMetrics {
    pub fn record_cycle_start(&mut self) {
        self.cycles_started += 1;
    }

    /// Fold a finished cycle into the counters.
    pub fn record_cycle(&mut self, report: &CycleReport) {
        self.last_cycle_at = Some(report.started_at);

        if report.phase == CyclePhase::Idle {
            self.cycles_idle += 1;
            return;
        }

        if let Some(sample) = report.sample() {
            if sample.is_organic() {
                self.organic_cycles += 1;
            } else {
                self.synthetic_cycles += 1;
            }
        }

        match &report.failure {
            Some(failure) => {
                self.cycles_failed += 1;
                *self.failures_by_stage.entry(failure.stage).or_default() += 1;
            }
            None => self.cycles_completed += 1,
        }

        let t = &report.timings;
        self.record_stage("sample", t.sample);
        if report.context.is_some() {
            self.record_stage("responses", t.responses);
        }
        if report.context.as_ref().is_some_and(|ctx| ctx.rewards.is_some())
            || report.failure.as_ref().is_some_and(|f| f.stage == StageKind::Rewards)
        {
            self.record_stage("rewards", t.rewards);
        }
        if report.succeeded()
            || report.failure.as_ref().is_some_and(|f| f.stage == StageKind::Weights)
        {
            self.record_stage("weights", t.weights);
        }
        self.record_stage("total", t.total);
    }

    pub fn record_admission(&mut self, accepted: bool) {
        if accepted {
            self.admissions_accepted += 1;
        } else {
            self.admissions_rejected += 1;
        }
    }

    /// Update the running average for one phase.
    pub fn record_stage(&mut self, name: &str, duration: Duration) {
        let count = self.stage_samples.entry(name.to_string()).or_default();
        *count += 1;
        let count = *count;
        let prev_avg = self
            .avg_stage_duration
            .get(name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_stage_duration.insert(name.to_string(), new_avg);
    }
}
