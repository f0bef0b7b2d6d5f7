use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::admission::Blacklist;
use crate::config::{ScoringConfig, TriggerConfig};
use crate::engine::{LifecycleState, OrganicScoring, OrganicScoringBuilder};
use crate::error::{ConfigError, ScoringError, StageError};
use crate::pipeline::{CyclePhase, CycleReport, StageKind};
use crate::queue::OrganicQueue;
use crate::sample::{OrganicEntry, Responses, Rewards, Sample, SampleSource};
use crate::selector::SyntheticDataset;
use crate::stages::{CycleLogger, MinerQuery, RewardGenerator, WeightSetter};

// ── Mock collaborators ───────────────────────────────────────────────

/// Records every dispatched sample and how many queries overlapped.
#[derive(Default)]
struct MockQuery {
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    fired_at: Mutex<Vec<Instant>>,
    sources: Mutex<Vec<SampleSource>>,
}

impl MockQuery {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MinerQuery for MockQuery {
    async fn query(&self, sample: &Sample) -> Result<Responses, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fired_at.lock().unwrap().push(Instant::now());
        self.sources.lock().unwrap().push(sample.source);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(HashMap::from([("miner-1".to_string(), sample.payload.clone())]))
    }
}

/// Fails the first `fail_first` calls, then scores every miner 1.0.
#[derive(Default)]
struct MockRewards {
    fail_first: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl RewardGenerator for MockRewards {
    async fn generate_rewards(
        &self,
        _sample: &Sample,
        responses: &Responses,
        _reference: Option<&serde_json::Value>,
    ) -> Result<Rewards, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(StageError::failed("reward model unavailable"));
        }
        Ok(Rewards::new(
            responses.keys().map(|m| (m.clone(), 1.0)).collect(),
        ))
    }
}

#[derive(Default)]
struct CountingWeights {
    applied: AtomicUsize,
}

#[async_trait]
impl WeightSetter for CountingWeights {
    async fn apply(&self, _rewards: &Rewards) -> Result<(), StageError> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingLogger {
    reports: Mutex<Vec<CycleReport>>,
}

impl RecordingLogger {
    fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    fn reports(&self) -> Vec<CycleReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl CycleLogger for RecordingLogger {
    async fn log(&self, report: &CycleReport) -> Result<(), StageError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

struct FixedDataset;

#[async_trait]
impl SyntheticDataset for FixedDataset {
    async fn sample(&self) -> Result<serde_json::Value, StageError> {
        Ok(json!({"prompt": "synthetic"}))
    }
}

struct DenyCaller(&'static str);

#[async_trait]
impl Blacklist for DenyCaller {
    async fn check(&self, entry: &OrganicEntry) -> Result<Option<String>, StageError> {
        Ok((entry.caller == self.0).then(|| "low stake".to_string()))
    }
}

/// Empty queue whose first `size` call panics.
#[derive(Default)]
struct TrippedQueue {
    tripped: AtomicBool,
}

impl OrganicQueue for TrippedQueue {
    fn add(&self, _sample: Sample) {}

    fn sample(&self) -> Option<Sample> {
        None
    }

    fn size(&self) -> usize {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("queue backend gone");
        }
        0
    }
}

// ── Harness ──────────────────────────────────────────────────────────

struct Harness {
    query: Arc<MockQuery>,
    rewards: Arc<MockRewards>,
    weights: Arc<CountingWeights>,
    logger: Arc<RecordingLogger>,
}

impl Harness {
    fn new() -> Self {
        Self::with(MockQuery::default(), MockRewards::default())
    }

    fn with(query: MockQuery, rewards: MockRewards) -> Self {
        Self {
            query: Arc::new(query),
            rewards: Arc::new(rewards),
            weights: Arc::new(CountingWeights::default()),
            logger: Arc::new(RecordingLogger::default()),
        }
    }

    fn builder(&self, trigger: TriggerConfig) -> OrganicScoringBuilder {
        OrganicScoring::builder(ScoringConfig::new(trigger))
            .query(self.query.clone())
            .rewards(self.rewards.clone())
            .weights(self.weights.clone())
            .logger(self.logger.clone())
    }

    fn engine(&self, trigger: TriggerConfig) -> OrganicScoring {
        self.builder(trigger)
            .synthetic(Arc::new(FixedDataset))
            .build()
            .unwrap()
    }
}

/// Poll `cond` on the (usually paused) clock until it holds.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ── Building ─────────────────────────────────────────────────────────

#[test]
fn build_requires_mandatory_stages() {
    let h = Harness::new();
    let result = OrganicScoring::builder(ScoringConfig::new(TriggerConfig::seconds(1.0)))
        .query(h.query.clone())
        .rewards(h.rewards.clone())
        .build();
    assert!(matches!(
        result,
        Err(ScoringError::Config(ConfigError::MissingStage("weights")))
    ));

    let result = OrganicScoring::builder(ScoringConfig::new(TriggerConfig::seconds(1.0)))
        .rewards(h.rewards.clone())
        .weights(h.weights.clone())
        .build();
    assert!(matches!(
        result,
        Err(ScoringError::Config(ConfigError::MissingStage("query")))
    ));
}

#[test]
fn build_rejects_invalid_config() {
    let h = Harness::new();
    for trigger in [TriggerConfig::seconds(0.0), TriggerConfig::seconds(1e19)] {
        let result = h.builder(trigger).build();
        assert!(matches!(
            result,
            Err(ScoringError::Config(ConfigError::InvalidFrequency(..)))
        ));
    }
}

#[test]
fn start_outside_runtime_fails() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::seconds(1.0));
    let result = futures::executor::block_on(engine.start());
    assert!(matches!(result, Err(ScoringError::NoRuntime)));
    assert_eq!(engine.state(), LifecycleState::Stopped);
}

// ── Intake and step controls ─────────────────────────────────────────

#[tokio::test]
async fn rejected_entries_never_reach_the_queue() {
    let h = Harness::new();
    let engine = h
        .builder(TriggerConfig::seconds(1.0))
        .blacklist(Arc::new(DenyCaller("mallory")))
        .build()
        .unwrap();

    let verdict = engine.submit(OrganicEntry::new("mallory", json!("spam"))).await;
    assert!(!verdict.is_accepted());
    assert_eq!(engine.queue_size(), 0);

    let verdict = engine.submit(OrganicEntry::new("alice", json!("hello"))).await;
    assert!(verdict.is_accepted());
    assert_eq!(engine.queue_size(), 1);

    let m = engine.metrics();
    assert_eq!(m.admissions_accepted, 1);
    assert_eq!(m.admissions_rejected, 1);
}

#[test]
fn step_controls_ignored_in_seconds_mode() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::seconds(1.0));
    assert!(!engine.increment_step());
    assert!(!engine.set_step(10));
    assert_eq!(engine.step(), 0);
}

#[test]
fn set_step_cannot_move_backwards() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::steps(5));
    assert!(engine.set_step(7));
    assert!(engine.increment_step());
    assert!(!engine.set_step(3));
    assert_eq!(engine.step(), 8);
}

// ── Single cycles ────────────────────────────────────────────────────

#[tokio::test]
async fn organic_sample_preferred_over_synthetic() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::seconds(1.0));
    engine.submit(OrganicEntry::new("alice", json!("real"))).await;

    let first = engine.shared.run_cycle(0).await;
    assert!(first.is_organic());
    assert!(first.succeeded());
    assert_eq!(first.organic_queue_size, 0);
    assert_eq!(first.sample().unwrap().payload, json!("real"));

    let second = engine.shared.run_cycle(0).await;
    assert!(!second.is_organic());
    assert!(second.succeeded());
    assert_eq!(second.cycle, 2);
    assert_eq!(h.weights.applied.load(Ordering::SeqCst), 2);
    assert_eq!(h.logger.count(), 2);
}

#[tokio::test]
async fn cycle_idle_without_fallback() {
    let h = Harness::new();
    let engine = h.builder(TriggerConfig::seconds(1.0)).build().unwrap();

    let report = engine.shared.run_cycle(0).await;
    assert_eq!(report.phase, CyclePhase::Idle);
    assert!(report.context.is_none());
    assert_eq!(h.query.calls(), 0);
    assert_eq!(engine.metrics().cycles_idle, 1);
}

// ── Running loop ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let h = Harness::with(MockQuery::with_delay(Duration::from_millis(200)), MockRewards::default());
    let engine = h.engine(TriggerConfig::seconds(0.05));

    let (a, b) = tokio::join!(engine.start(), engine.start());
    let started = [a.unwrap(), b.unwrap()];
    assert_eq!(started.iter().filter(|s| **s).count(), 1);
    assert!(!engine.start().await.unwrap());
    assert_eq!(engine.state(), LifecycleState::Running);

    wait_until(|| h.logger.count() >= 5).await;
    assert!(engine.stop().await);
    assert_eq!(h.query.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn time_trigger_spaces_cycles_from_previous_firing() {
    let h = Harness::with(MockQuery::with_delay(Duration::from_millis(300)), MockRewards::default());
    let engine = h.engine(TriggerConfig::seconds(1.0));

    engine.start().await.unwrap();
    wait_until(|| h.logger.count() >= 3).await;
    engine.stop().await;

    let fired = h.query.fired_at.lock().unwrap().clone();
    assert!(fired.len() >= 3);
    for pair in fired.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_secs(1), "gap {gap:?} shorter than period");
        assert!(gap < Duration::from_millis(1_200), "gap {gap:?} includes cycle time");
    }
}

#[tokio::test(start_paused = true)]
async fn step_trigger_fires_every_frequency_steps() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::steps(2));

    engine.start().await.unwrap();
    wait_until(|| h.logger.count() == 1).await;

    assert!(engine.increment_step());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.logger.count(), 1);

    assert!(engine.increment_step());
    wait_until(|| h.logger.count() == 2).await;

    engine.submit(OrganicEntry::new("alice", json!("real"))).await;
    engine.increment_step();
    engine.increment_step();
    wait_until(|| h.logger.count() == 3).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    engine.stop().await;

    let reports = h.logger.reports();
    assert_eq!(reports.len(), 3);
    let steps: Vec<u64> = reports.iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![0, 2, 4]);
    let organic: Vec<bool> = reports.iter().map(CycleReport::is_organic).collect();
    assert_eq!(organic, vec![false, false, true]);
    assert_eq!(engine.queue_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn reward_failure_does_not_stop_the_loop() {
    let h = Harness::with(
        MockQuery::default(),
        MockRewards {
            fail_first: 1,
            ..MockRewards::default()
        },
    );
    let engine = h.engine(TriggerConfig::seconds(1.0));

    engine.start().await.unwrap();
    wait_until(|| h.logger.count() >= 2).await;
    engine.stop().await;

    let reports = h.logger.reports();
    let failure = reports[0].failure.as_ref().unwrap();
    assert_eq!(failure.stage, StageKind::Rewards);
    assert!(reports[1].succeeded());
    assert_eq!(h.weights.applied.load(Ordering::SeqCst), reports.len() - 1);

    let m = engine.metrics();
    assert_eq!(m.cycles_failed, 1);
    assert_eq!(m.failures_by_stage[&StageKind::Rewards], 1);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_cycle() {
    let h = Harness::with(MockQuery::with_delay(Duration::from_secs(5)), MockRewards::default());
    let engine = h.engine(TriggerConfig::seconds(1.0));

    engine.start().await.unwrap();
    wait_until(|| h.query.calls() == 1).await;
    assert_eq!(h.logger.count(), 0);
    let m = engine.metrics();
    assert_eq!(m.cycles_started, 1);
    assert_eq!(m.cycles_completed, 0);

    assert!(engine.stop().await);
    assert_eq!(h.logger.count(), 1);
    assert!(h.logger.reports()[0].succeeded());
    assert_eq!(engine.state(), LifecycleState::Stopped);
    assert!(!engine.is_running());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.query.calls(), 1);
    assert!(!engine.stop().await);
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::seconds(1.0));

    assert!(engine.start().await.unwrap());
    wait_until(|| h.logger.count() == 1).await;
    assert!(engine.stop().await);

    assert!(engine.start().await.unwrap());
    wait_until(|| h.logger.count() == 2).await;
    assert!(engine.stop().await);

    let m = engine.metrics();
    assert_eq!(m.state, LifecycleState::Stopped);
    assert!(m.cycles_completed >= 2);
    assert_eq!(h.logger.reports()[1].cycle, 2);

    // The restart keeps the previous deadline instead of firing at once.
    let fired = h.query.fired_at.lock().unwrap().clone();
    assert!(fired[1] - fired[0] >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_step_schedule() {
    let h = Harness::new();
    let engine = h.engine(TriggerConfig::steps(2));

    engine.start().await.unwrap();
    wait_until(|| h.logger.count() == 1).await;
    assert!(engine.stop().await);

    assert!(engine.start().await.unwrap());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.logger.count(), 1, "step 0 fired again after restart");
    assert_eq!(h.weights.applied.load(Ordering::SeqCst), 1);

    engine.increment_step();
    engine.increment_step();
    wait_until(|| h.logger.count() == 2).await;
    engine.stop().await;

    let steps: Vec<u64> = h.logger.reports().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![0, 2]);
}

#[tokio::test(start_paused = true)]
async fn loop_death_reports_stopped() {
    let h = Harness::new();
    let engine = h
        .builder(TriggerConfig::seconds(1.0))
        .queue(Arc::new(TrippedQueue::default()))
        .synthetic(Arc::new(FixedDataset))
        .build()
        .unwrap();

    assert!(engine.start().await.unwrap());
    wait_until(|| !engine.is_running()).await;
    assert_eq!(engine.state(), LifecycleState::Stopped);
    assert_eq!(engine.metrics().state, LifecycleState::Stopped);

    // A dead loop does not block a fresh start.
    assert!(engine.start().await.unwrap());
    wait_until(|| h.logger.count() == 1).await;
    assert!(engine.stop().await);
}
