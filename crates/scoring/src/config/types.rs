use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Top-level config ────────────────────────────────────────────────

/// Full configuration for the organic scoring engine.
///
/// Parsed from `organic.toml` with support for environment variable overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// When a scoring cycle starts.
    pub trigger: TriggerConfig,

    /// Organic queue policy used when no custom queue is injected.
    #[serde(default)]
    pub queue: QueueConfig,
}

// ── Trigger ─────────────────────────────────────────────────────────

/// What advances the trigger: wall-clock time or the external step counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Seconds,
    Steps,
}

impl FromStr for TriggerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "seconds" => Ok(Self::Seconds),
            "steps" => Ok(Self::Steps),
            other => Err(ConfigError::InvalidTriggerMode(other.to_string())),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds => f.write_str("seconds"),
            Self::Steps => f.write_str("steps"),
        }
    }
}

/// Trigger section. Immutable once the engine is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub mode: TriggerMode,

    /// Seconds between firings, or steps between firings.
    pub frequency: f64,

    /// Upper bound on how long the step trigger sleeps between counter checks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Shrinks the frequency as the organic backlog grows.
    #[serde(default)]
    pub anneal: Option<AnnealConfig>,
}

fn default_poll_interval_ms() -> u64 {
    100
}

/// Backlog-driven frequency reduction:
/// `max(frequency - queue_size / scaling_factor, frequency_min)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealConfig {
    /// Larger values make the frequency react more slowly to queue growth.
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,

    /// Floor for the effective frequency.
    #[serde(default = "default_frequency_min")]
    pub frequency_min: f64,
}

fn default_scaling_factor() -> f64 {
    50.0
}

fn default_frequency_min() -> f64 {
    2.0
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            scaling_factor: default_scaling_factor(),
            frequency_min: default_frequency_min(),
        }
    }
}

impl TriggerConfig {
    /// Fire every `secs` seconds.
    pub fn seconds(secs: f64) -> Self {
        Self {
            mode: TriggerMode::Seconds,
            frequency: secs,
            poll_interval_ms: default_poll_interval_ms(),
            anneal: None,
        }
    }

    /// Fire every `steps` increments of the step counter.
    pub fn steps(steps: u64) -> Self {
        Self {
            mode: TriggerMode::Steps,
            frequency: steps as f64,
            poll_interval_ms: default_poll_interval_ms(),
            anneal: None,
        }
    }

    pub fn with_anneal(mut self, anneal: AnnealConfig) -> Self {
        self.anneal = Some(anneal);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Seconds to wait between firings given the current organic backlog.
    pub fn effective_interval(&self, queue_size: usize) -> Duration {
        let secs = match &self.anneal {
            Some(anneal) => (self.frequency - queue_size as f64 / anneal.scaling_factor)
                .max(anneal.frequency_min),
            None => self.frequency,
        };
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Steps required between firings given the current organic backlog. Never zero.
    pub fn effective_steps(&self, queue_size: usize) -> u64 {
        let base = self.frequency as u64;
        let steps = match &self.anneal {
            Some(anneal) => {
                let reduction = (queue_size as f64 / anneal.scaling_factor).floor() as u64;
                base.saturating_sub(reduction)
                    .max(anneal.frequency_min.ceil() as u64)
            }
            None => base,
        };
        steps.max(1)
    }
}

// ── Queue ───────────────────────────────────────────────────────────

/// Built-in organic queue implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Highest admission priority first, arrival order within a priority.
    #[default]
    Priority,
    /// Uniformly random pop, priority ignored.
    Random,
}

impl FromStr for QueuePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "random" => Ok(Self::Random),
            other => Err(ConfigError::InvalidQueuePolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub policy: QueuePolicy,
}
