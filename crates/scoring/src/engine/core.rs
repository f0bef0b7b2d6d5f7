use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockWriteGuard};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionPipeline, AdmissionVerdict, Blacklist, PriorityFn, Verifier};
use crate::config::{ScoringConfig, TriggerMode};
use crate::error::{ConfigError, ScoringError};
use crate::metrics::EngineMetrics;
use crate::pipeline::ExecutionPipeline;
use crate::queue::{self, OrganicQueue};
use crate::sample::OrganicEntry;
use crate::selector::{SampleSelector, SyntheticDataset};
use crate::stages::{CycleLogger, MinerQuery, ReferenceGenerator, RewardGenerator, WeightSetter};
use crate::trigger::{StepCounter, TriggerState};

use super::lifecycle::{Lifecycle, LifecycleState};

/// State shared between the control surface and the spawned cycle loop.
pub(super) struct Shared {
    pub(super) config: ScoringConfig,
    pub(super) queue: Arc<dyn OrganicQueue>,
    pub(super) admission: AdmissionPipeline,
    pub(super) selector: SampleSelector,
    pub(super) pipeline: ExecutionPipeline,
    pub(super) steps: StepCounter,
    /// Last firing, kept across restarts.
    pub(super) trigger_state: StdMutex<TriggerState>,
    pub(super) metrics: Arc<RwLock<EngineMetrics>>,
    /// Cycles run since the engine was built, across restarts.
    pub(super) cycles: AtomicU64,
    pub(super) running: AtomicBool,
}

impl Shared {
    pub(super) fn set_state(&self, state: LifecycleState) {
        self.running
            .store(state == LifecycleState::Running, Ordering::SeqCst);
        self.metrics_mut().state = state;
    }

    pub(super) fn metrics_mut(&self) -> RwLockWriteGuard<'_, EngineMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The organic scoring engine.
///
/// Owns the organic queue, the step counter and the single cycle loop.
/// External code feeds it through [`submit`](Self::submit) and drives it
/// through [`start`](Self::start), [`stop`](Self::stop),
/// [`increment_step`](Self::increment_step) and [`set_step`](Self::set_step).
pub struct OrganicScoring {
    pub(super) shared: Arc<Shared>,
    pub(super) lifecycle: Mutex<Lifecycle>,
}

impl OrganicScoring {
    pub fn builder(config: ScoringConfig) -> OrganicScoringBuilder {
        OrganicScoringBuilder::new(config)
    }

    /// Run an inbound entry through admission. Accepted entries are queued
    /// for a later cycle; the call never waits on the cycle loop.
    pub async fn submit(&self, entry: OrganicEntry) -> AdmissionVerdict {
        let verdict = self.shared.admission.submit(entry).await;
        self.shared
            .metrics_mut()
            .record_admission(verdict.is_accepted());
        verdict
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue.size()
    }

    /// Advance the step counter by one.
    ///
    /// Returns `false` and leaves the counter alone under the time trigger.
    pub fn increment_step(&self) -> bool {
        if !self.step_mode("increment_step") {
            return false;
        }
        let step = self.shared.steps.increment();
        debug!(step, "step incremented");
        true
    }

    /// Move the step counter to `step`.
    ///
    /// Returns `false` under the time trigger or when `step` is below the
    /// current value.
    pub fn set_step(&self, step: u64) -> bool {
        if !self.step_mode("set_step") {
            return false;
        }
        if !self.shared.steps.set(step) {
            warn!(step, current = self.shared.steps.get(), "set_step ignored: step counter cannot move backwards");
            return false;
        }
        debug!(step, "step set");
        true
    }

    /// Current step counter value.
    pub fn step(&self) -> u64 {
        self.shared.steps.get()
    }

    /// Get a snapshot of the current engine metrics.
    pub fn metrics(&self) -> EngineMetrics {
        self.shared
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.shared.config
    }

    pub fn state(&self) -> LifecycleState {
        if self.is_running() {
            LifecycleState::Running
        } else {
            LifecycleState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn step_mode(&self, op: &str) -> bool {
        let mode = self.shared.config.trigger.mode;
        if mode != TriggerMode::Steps {
            warn!(%mode, "{op} ignored: step counter is only used by the step trigger");
            return false;
        }
        true
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Collects collaborators for an [`OrganicScoring`] engine.
///
/// `query`, `rewards` and `weights` are mandatory; everything else is optional.
pub struct OrganicScoringBuilder {
    config: ScoringConfig,
    queue: Option<Arc<dyn OrganicQueue>>,
    datasets: Vec<Arc<dyn SyntheticDataset>>,
    query: Option<Arc<dyn MinerQuery>>,
    reference: Option<Arc<dyn ReferenceGenerator>>,
    rewards: Option<Arc<dyn RewardGenerator>>,
    weights: Option<Arc<dyn WeightSetter>>,
    logger: Option<Arc<dyn CycleLogger>>,
    verifier: Option<Arc<dyn Verifier>>,
    blacklist: Option<Arc<dyn Blacklist>>,
    priority: Option<Arc<dyn PriorityFn>>,
}

impl OrganicScoringBuilder {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            queue: None,
            datasets: Vec::new(),
            query: None,
            reference: None,
            rewards: None,
            weights: None,
            logger: None,
            verifier: None,
            blacklist: None,
            priority: None,
        }
    }

    /// Use a custom queue instead of the one named by `config.queue.policy`.
    pub fn queue(mut self, queue: Arc<dyn OrganicQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Add a synthetic fallback dataset. May be called more than once.
    pub fn synthetic(mut self, dataset: Arc<dyn SyntheticDataset>) -> Self {
        self.datasets.push(dataset);
        self
    }

    pub fn query(mut self, query: Arc<dyn MinerQuery>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn reference(mut self, reference: Arc<dyn ReferenceGenerator>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn rewards(mut self, rewards: Arc<dyn RewardGenerator>) -> Self {
        self.rewards = Some(rewards);
        self
    }

    pub fn weights(mut self, weights: Arc<dyn WeightSetter>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn CycleLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn blacklist(mut self, blacklist: Arc<dyn Blacklist>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    pub fn priority(mut self, priority: Arc<dyn PriorityFn>) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Validate the config and wire the engine. Does not start it.
    pub fn build(self) -> Result<OrganicScoring, ScoringError> {
        self.config.validate()?;
        let query = self.query.ok_or(ConfigError::MissingStage("query"))?;
        let rewards = self.rewards.ok_or(ConfigError::MissingStage("rewards"))?;
        let weights = self.weights.ok_or(ConfigError::MissingStage("weights"))?;

        let policy = self.config.queue.policy;
        let queue = self.queue.unwrap_or_else(|| queue::from_policy(policy));

        let mut admission = AdmissionPipeline::new(Arc::clone(&queue));
        if let Some(verifier) = self.verifier {
            admission = admission.with_verifier(verifier);
        }
        if let Some(blacklist) = self.blacklist {
            admission = admission.with_blacklist(blacklist);
        }
        if let Some(priority) = self.priority {
            admission = admission.with_priority(priority);
        }

        let selector = SampleSelector::new(Arc::clone(&queue), self.datasets);
        if !selector.has_fallback() {
            info!("no synthetic dataset configured, cycles without organic entries will be idle");
        }
        let pipeline = ExecutionPipeline::new(query, rewards, weights)
            .with_reference(self.reference)
            .with_logger(self.logger);

        info!(
            mode = %self.config.trigger.mode,
            frequency = self.config.trigger.frequency,
            anneal = self.config.trigger.anneal.is_some(),
            queue = ?policy,
            "organic scoring engine built"
        );

        Ok(OrganicScoring {
            shared: Arc::new(Shared {
                config: self.config,
                queue,
                admission,
                selector,
                pipeline,
                steps: StepCounter::new(),
                trigger_state: StdMutex::new(TriggerState::default()),
                metrics: Arc::new(RwLock::new(EngineMetrics::default())),
                cycles: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }
}
