//! Execution pipeline for one scoring cycle.
//!
//! ```text
//! SELECTING → DISPATCHING (query ∥ reference) → REWARDING → WEIGHT_SETTING → LOGGING → DONE
//! ```
//!
//! Query and reference run as separate tokio tasks and are both joined before
//! rewards are computed. A failing stage ends the cycle early; only logging
//! still runs. Panics inside a stage are caught and reported as
//! [`StageError::Panicked`] so the loop survives them.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::sample::{Responses, Rewards, Sample};
use crate::stages::{CycleLogger, MinerQuery, ReferenceGenerator, RewardGenerator, WeightSetter};

// ── Cycle types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Selecting,
    Dispatching,
    Rewarding,
    WeightSetting,
    Logging,
    Done,
    /// Nothing to score: empty queue and no synthetic fallback.
    Idle,
}

/// The collaborator a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Select,
    Query,
    Reference,
    Rewards,
    Weights,
}

impl StageKind {
    /// Phase the cycle was in when this stage ran.
    pub fn phase(self) -> CyclePhase {
        match self {
            Self::Select => CyclePhase::Selecting,
            Self::Query | Self::Reference => CyclePhase::Dispatching,
            Self::Rewards => CyclePhase::Rewarding,
            Self::Weights => CyclePhase::WeightSetting,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "select",
            Self::Query => "query",
            Self::Reference => "reference",
            Self::Rewards => "rewards",
            Self::Weights => "weights",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleFailure {
    pub stage: StageKind,
    pub error: StageError,
}

impl CycleFailure {
    pub fn new(stage: StageKind, error: StageError) -> Self {
        Self { stage, error }
    }
}

/// Wall-clock time spent in each phase of a cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    /// Picking the organic or synthetic sample.
    pub sample: Duration,
    /// Query and reference, measured together from fork to join.
    pub responses: Duration,
    pub rewards: Duration,
    pub weights: Duration,
    pub total: Duration,
}

/// Per-cycle working record. Created at dispatch, discarded after logging.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub sample: Sample,
    pub responses: Option<Responses>,
    pub reference: Option<serde_json::Value>,
    pub rewards: Option<Rewards>,
}

/// Everything the logging hook learns about a finished cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// 1-based cycle number since the engine was built.
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    /// Step counter at firing (0 under the time trigger).
    pub step: u64,
    /// `None` when the cycle was idle or selection failed.
    pub context: Option<ExecutionContext>,
    pub timings: StageTimings,
    pub organic_queue_size: usize,
    pub phase: CyclePhase,
    pub failure: Option<CycleFailure>,
}

impl CycleReport {
    pub fn is_organic(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|ctx| ctx.sample.is_organic())
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.phase == CyclePhase::Done
    }

    pub fn sample(&self) -> Option<&Sample> {
        self.context.as_ref().map(|ctx| &ctx.sample)
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// Sequences the scoring stages for a selected sample.
pub struct ExecutionPipeline {
    query: Arc<dyn MinerQuery>,
    reference: Option<Arc<dyn ReferenceGenerator>>,
    rewards: Arc<dyn RewardGenerator>,
    weights: Arc<dyn WeightSetter>,
    logger: Option<Arc<dyn CycleLogger>>,
}

impl ExecutionPipeline {
    pub fn new(
        query: Arc<dyn MinerQuery>,
        rewards: Arc<dyn RewardGenerator>,
        weights: Arc<dyn WeightSetter>,
    ) -> Self {
        Self {
            query,
            reference: None,
            rewards,
            weights,
            logger: None,
        }
    }

    pub fn with_reference(mut self, reference: Option<Arc<dyn ReferenceGenerator>>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_logger(mut self, logger: Option<Arc<dyn CycleLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Run dispatch, rewarding and weight setting for `sample`.
    ///
    /// Fills `timings` for every phase that ran and returns the context
    /// together with the first failure, if any.
    pub async fn execute(
        &self,
        sample: Sample,
        timings: &mut StageTimings,
    ) -> (ExecutionContext, Option<CycleFailure>) {
        let sample = Arc::new(sample);
        let mut responses: Option<Responses> = None;
        let mut reference: Option<serde_json::Value> = None;
        let mut rewards: Option<Rewards> = None;

        let failure = 'stages: {
            debug!(sample_id = %sample.id, phase = ?CyclePhase::Dispatching, "dispatching");
            let started = Instant::now();
            let query_task = {
                let query = Arc::clone(&self.query);
                let sample = Arc::clone(&sample);
                tokio::spawn(async move { query.query(&sample).await })
            };
            let reference_task = self.reference.as_ref().map(|generator| {
                let generator = Arc::clone(generator);
                let sample = Arc::clone(&sample);
                tokio::spawn(async move { generator.generate(&sample).await })
            });
            let (query_result, reference_result) = tokio::join!(join_stage(query_task), async {
                match reference_task {
                    Some(task) => Some(join_stage(task).await),
                    None => None,
                }
            });
            timings.responses = started.elapsed();

            let mut dispatch_failure = None;
            match query_result {
                Ok(r) => responses = Some(r),
                Err(error) => dispatch_failure = Some(CycleFailure::new(StageKind::Query, error)),
            }
            match reference_result {
                Some(Ok(r)) => reference = Some(r),
                Some(Err(error)) => {
                    if dispatch_failure.is_some() {
                        warn!(%error, "reference generation also failed");
                    } else {
                        dispatch_failure = Some(CycleFailure::new(StageKind::Reference, error));
                    }
                }
                None => {}
            }
            if dispatch_failure.is_some() {
                break 'stages dispatch_failure;
            }
            let Some(miner_responses) = responses.as_ref() else {
                break 'stages None;
            };

            debug!(responses = miner_responses.len(), phase = ?CyclePhase::Rewarding, "generating rewards");
            let started = Instant::now();
            let result = contained(self.rewards.generate_rewards(
                &sample,
                miner_responses,
                reference.as_ref(),
            ))
            .await;
            timings.rewards = started.elapsed();
            let scored = match result {
                Ok(r) => rewards.insert(r),
                Err(error) => break 'stages Some(CycleFailure::new(StageKind::Rewards, error)),
            };

            debug!(miners = scored.scores.len(), phase = ?CyclePhase::WeightSetting, "setting weights");
            let started = Instant::now();
            let result = contained(self.weights.apply(scored)).await;
            timings.weights = started.elapsed();
            if let Err(error) = result {
                break 'stages Some(CycleFailure::new(StageKind::Weights, error));
            }
            None
        };

        let context = ExecutionContext {
            sample: Arc::unwrap_or_clone(sample),
            responses,
            reference,
            rewards,
        };
        (context, failure)
    }

    /// Hand the report to the logging hook. Failures here never escalate.
    pub async fn log(&self, report: &CycleReport) {
        let Some(logger) = &self.logger else {
            return;
        };
        if let Err(error) = contained(logger.log(report)).await {
            warn!(cycle = report.cycle, %error, "cycle logger failed");
        }
    }
}

async fn join_stage<T>(task: JoinHandle<Result<T, StageError>>) -> Result<T, StageError> {
    task.await?
}

/// Await a stage future, converting a panic into [`StageError::Panicked`].
pub(crate) async fn contained<T, F>(fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StageError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(StageError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
