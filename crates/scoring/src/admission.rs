//! Admission pipeline: verify → blacklist → priority gate for inbound entries.
//!
//! This is the only writer into the organic queue. Each stage is optional and
//! defaults to "accept, neutral priority". A stage that returns an error or
//! panics rejects that one entry; nothing escalates past [`AdmissionPipeline::submit`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StageError;
use crate::pipeline::contained;
use crate::queue::OrganicQueue;
use crate::sample::{NEUTRAL_PRIORITY, OrganicEntry, Sample};

// ── Stage traits ─────────────────────────────────────────────────────

/// Authenticates or validates an inbound entry.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// `Ok(false)` rejects the entry.
    async fn verify(&self, entry: &OrganicEntry) -> Result<bool, StageError>;
}

/// Policy check on the caller, e.g. identity reputation or stake.
#[async_trait]
pub trait Blacklist: Send + Sync {
    /// `Ok(Some(reason))` rejects the entry.
    async fn check(&self, entry: &OrganicEntry) -> Result<Option<String>, StageError>;
}

/// Computes queue priority. Higher values are sampled first.
#[async_trait]
pub trait PriorityFn: Send + Sync {
    async fn priority(&self, entry: &OrganicEntry) -> Result<f64, StageError>;
}

// ── Verdicts ─────────────────────────────────────────────────────────

/// Which admission stage produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStage {
    Verify,
    Blacklist,
    Priority,
}

impl fmt::Display for AdmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify => f.write_str("verify"),
            Self::Blacklist => f.write_str("blacklist"),
            Self::Priority => f.write_str("priority"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RejectReason {
    #[error("verification failed")]
    Unverified,

    #[error("blacklisted: {0}")]
    Blacklisted(String),

    #[error("priority {0} is not a finite number")]
    InvalidPriority(f64),

    #[error("{stage} stage error: {error}")]
    StageError {
        stage: AdmissionStage,
        error: StageError,
    },
}

/// Outcome of running an entry through the pipeline.
#[derive(Debug, Clone)]
pub enum AdmissionVerdict {
    /// Queued as an organic sample.
    Accepted { sample_id: Uuid, priority: f64 },
    /// Dropped; never reaches the queue.
    Rejected { reason: RejectReason },
}

impl AdmissionVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn priority(&self) -> Option<f64> {
        match self {
            Self::Accepted { priority, .. } => Some(*priority),
            Self::Rejected { .. } => None,
        }
    }
}

fn stage_error(stage: AdmissionStage, error: StageError) -> RejectReason {
    RejectReason::StageError { stage, error }
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// Gates and ranks inbound entries before they reach the organic queue.
pub struct AdmissionPipeline {
    verifier: Option<Arc<dyn Verifier>>,
    blacklist: Option<Arc<dyn Blacklist>>,
    priority: Option<Arc<dyn PriorityFn>>,
    queue: Arc<dyn OrganicQueue>,
}

impl AdmissionPipeline {
    /// A pipeline with no stages: every entry is accepted at neutral priority.
    pub fn new(queue: Arc<dyn OrganicQueue>) -> Self {
        Self {
            verifier: None,
            blacklist: None,
            priority: None,
            queue,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_blacklist(mut self, blacklist: Arc<dyn Blacklist>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    pub fn with_priority(mut self, priority: Arc<dyn PriorityFn>) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Run the stages without queueing, returning the priority the entry
    /// would be admitted at.
    ///
    /// Transport code can use this to order its own request handling.
    pub async fn check(&self, entry: &OrganicEntry) -> Result<f64, RejectReason> {
        if let Some(verifier) = &self.verifier {
            let verified = contained(verifier.verify(entry))
                .await
                .map_err(|error| stage_error(AdmissionStage::Verify, error))?;
            if !verified {
                return Err(RejectReason::Unverified);
            }
        }

        if let Some(blacklist) = &self.blacklist {
            let denied = contained(blacklist.check(entry))
                .await
                .map_err(|error| stage_error(AdmissionStage::Blacklist, error))?;
            if let Some(reason) = denied {
                return Err(RejectReason::Blacklisted(reason));
            }
        }

        let priority = match &self.priority {
            Some(priority_fn) => contained(priority_fn.priority(entry))
                .await
                .map_err(|error| stage_error(AdmissionStage::Priority, error))?,
            None => NEUTRAL_PRIORITY,
        };
        if !priority.is_finite() {
            return Err(RejectReason::InvalidPriority(priority));
        }
        Ok(priority)
    }

    /// Admit an entry: on acceptance it is wrapped as an organic sample and queued.
    pub async fn submit(&self, entry: OrganicEntry) -> AdmissionVerdict {
        match self.check(&entry).await {
            Ok(priority) => {
                let sample = Sample::organic(entry.payload, priority);
                let sample_id = sample.id;
                self.queue.add(sample);
                debug!(
                    caller = %entry.caller,
                    %sample_id,
                    priority,
                    queue_size = self.queue.size(),
                    "organic entry admitted"
                );
                AdmissionVerdict::Accepted {
                    sample_id,
                    priority,
                }
            }
            Err(reason) => {
                warn!(caller = %entry.caller, %reason, "organic entry rejected");
                AdmissionVerdict::Rejected { reason }
            }
        }
    }
}
