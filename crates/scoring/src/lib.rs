//! Organic scoring engine for validator nodes.
//!
//! Decides when a scoring cycle runs (wall-clock interval or external step
//! counter), picks what it scores (queued organic traffic first, synthetic
//! fallback otherwise), and drives the query ∥ reference → rewards → weights
//! pipeline one cycle at a time. Inbound organic traffic enters only through
//! [`OrganicScoring::submit`], which runs the verify → blacklist → priority
//! admission gate before queueing.

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod sample;
pub mod selector;
pub mod stages;
pub mod trigger;

pub use admission::{
    AdmissionPipeline, AdmissionStage, AdmissionVerdict, Blacklist, PriorityFn, RejectReason,
    Verifier,
};
pub use config::{AnnealConfig, QueueConfig, QueuePolicy, ScoringConfig, TriggerConfig, TriggerMode};
pub use engine::{LifecycleState, OrganicScoring, OrganicScoringBuilder};
pub use error::{ConfigError, ScoringError, StageError};
pub use metrics::EngineMetrics;
pub use pipeline::{
    CycleFailure, CyclePhase, CycleReport, ExecutionContext, ExecutionPipeline, StageKind,
    StageTimings,
};
pub use queue::{OrganicQueue, PriorityOrganicQueue, RandomOrganicQueue};
pub use sample::{OrganicEntry, Responses, Rewards, Sample, SampleSource};
pub use selector::{JsonlDataset, SampleSelector, SyntheticDataset};
pub use stages::{CycleLogger, MinerQuery, ReferenceGenerator, RewardGenerator, WeightSetter};
pub use trigger::{Firing, StepCounter, TriggerScheduler, TriggerState};
