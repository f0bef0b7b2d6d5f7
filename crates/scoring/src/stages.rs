//! Collaborator interfaces injected into the engine.
//!
//! Each stage is a narrow async trait. The engine only sequences them; what
//! a query or a reward means is entirely up to the implementation. Stages
//! that need bounded latency must enforce it themselves.

use async_trait::async_trait;

use crate::error::StageError;
use crate::pipeline::CycleReport;
use crate::sample::{Responses, Rewards, Sample};

/// Sends the sample to miners over the network and collects their responses.
#[async_trait]
pub trait MinerQuery: Send + Sync {
    async fn query(&self, sample: &Sample) -> Result<Responses, StageError>;
}

/// Produces reference data (e.g. a ground-truth completion) for a sample.
/// Runs concurrently with [`MinerQuery`].
#[async_trait]
pub trait ReferenceGenerator: Send + Sync {
    async fn generate(&self, sample: &Sample) -> Result<serde_json::Value, StageError>;
}

/// Scores miner responses. Called once per cycle, never concurrently.
#[async_trait]
pub trait RewardGenerator: Send + Sync {
    async fn generate_rewards(
        &self,
        sample: &Sample,
        responses: &Responses,
        reference: Option<&serde_json::Value>,
    ) -> Result<Rewards, StageError>;
}

/// Applies rewards to external state such as an on-chain weight vector.
#[async_trait]
pub trait WeightSetter: Send + Sync {
    async fn apply(&self, rewards: &Rewards) -> Result<(), StageError>;
}

/// Receives the full report of every cycle, including failed ones.
///
/// Errors are logged and otherwise ignored.
#[async_trait]
pub trait CycleLogger: Send + Sync {
    async fn log(&self, report: &CycleReport) -> Result<(), StageError>;
}
