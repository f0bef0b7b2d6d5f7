//! Error types for the organic scoring engine.

use serde::Serialize;
use thiserror::Error;

/// Fatal configuration problems, raised before the engine can start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid trigger mode '{0}', expected 'seconds' or 'steps'")]
    InvalidTriggerMode(String),

    #[error("invalid queue policy '{0}', expected 'priority' or 'random'")]
    InvalidQueuePolicy(String),

    #[error("invalid trigger frequency {0}: {1}")]
    InvalidFrequency(f64, &'static str),

    #[error("invalid anneal config: {0}")]
    InvalidAnneal(String),

    #[error("poll interval must be at least 1ms")]
    InvalidPollInterval,

    #[error("invalid synthetic dataset: {0}")]
    InvalidDataset(String),

    #[error("missing required stage: {0}")]
    MissingStage(&'static str),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single collaborator stage. Contained per cycle or per entry.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StageError {
    #[error("stage failed: {0}")]
    Failed(String),

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error("stage timed out")]
    Timeout,

    #[error("stage unavailable: {0}")]
    Unavailable(String),
}

impl StageError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<tokio::task::JoinError> for StageError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Self::Panicked(err.to_string())
        } else {
            Self::Failed(format!("stage task cancelled: {err}"))
        }
    }
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no tokio runtime available to spawn the scoring loop")]
    NoRuntime,
}
