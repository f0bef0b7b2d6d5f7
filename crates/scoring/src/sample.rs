//! Work units flowing through the scoring loop.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    /// A real request admitted from the intake channel.
    Organic,
    /// Generated by a fallback dataset to keep the loop busy.
    Synthetic,
}

/// Priority assigned when no priority function is configured.
pub const NEUTRAL_PRIORITY: f64 = 0.0;

/// An immutable unit of work for one scoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: Uuid,
    /// Opaque payload, forwarded untouched to the query and reward stages.
    pub payload: serde_json::Value,
    pub source: SampleSource,
    pub arrived_at: DateTime<Utc>,
    /// Admission priority. Synthetic samples carry [`NEUTRAL_PRIORITY`].
    pub priority: f64,
}

impl Sample {
    pub fn organic(payload: serde_json::Value, priority: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            source: SampleSource::Organic,
            arrived_at: Utc::now(),
            priority,
        }
    }

    pub fn synthetic(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            source: SampleSource::Synthetic,
            arrived_at: Utc::now(),
            priority: NEUTRAL_PRIORITY,
        }
    }

    pub fn is_organic(&self) -> bool {
        self.source == SampleSource::Organic
    }
}

/// A raw inbound request handed to the admission pipeline by transport code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganicEntry {
    /// Identity of the caller (e.g. a hotkey), used by blacklist and priority checks.
    pub caller: String,
    pub payload: serde_json::Value,
    /// Transport-specific credential material checked by the verifier.
    #[serde(default)]
    pub signature: Option<String>,
}

impl OrganicEntry {
    pub fn new(caller: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            caller: caller.into(),
            payload,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// Miner identity → raw response returned by the query stage.
pub type Responses = HashMap<String, serde_json::Value>;

/// Output of the reward stage, consumed by weight setting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rewards {
    /// Miner identity → reward value.
    pub scores: HashMap<String, f64>,
    /// Anything else the reward stage wants the logging hook to see.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Rewards {
    pub fn new(scores: HashMap<String, f64>) -> Self {
        Self {
            scores,
            details: serde_json::Value::Null,
        }
    }

    /// Miner identities in a stable order.
    pub fn miners(&self) -> Vec<&str> {
        let mut miners: Vec<&str> = self.scores.keys().map(String::as_str).collect();
        miners.sort_unstable();
        miners
    }
}
