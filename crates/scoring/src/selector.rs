//! Sample selection: organic queue first, synthetic fallback otherwise.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::{ConfigError, StageError};
use crate::queue::OrganicQueue;
use crate::sample::Sample;

/// Source of synthetic payloads used when no organic traffic is waiting.
///
/// Implementations return only the payload; the selector stamps it as a
/// synthetic [`Sample`] so the source tag cannot be forged.
#[async_trait]
pub trait SyntheticDataset: Send + Sync {
    async fn sample(&self) -> Result<serde_json::Value, StageError>;
}

/// Picks the sample for a cycle.
///
/// The engine runs exactly one cycle loop, which is the queue's only
/// consumer, so a non-zero `size()` always yields a sample. Should a second
/// consumer ever drain the queue between the two calls, the selector falls
/// through to the synthetic path instead of skipping the cycle.
pub struct SampleSelector {
    queue: Arc<dyn OrganicQueue>,
    datasets: Vec<Arc<dyn SyntheticDataset>>,
}

impl SampleSelector {
    pub fn new(queue: Arc<dyn OrganicQueue>, datasets: Vec<Arc<dyn SyntheticDataset>>) -> Self {
        Self { queue, datasets }
    }

    pub fn has_fallback(&self) -> bool {
        !self.datasets.is_empty()
    }

    /// `Ok(None)` means the queue was empty and no synthetic dataset is configured.
    pub async fn select(&self) -> Result<Option<Sample>, StageError> {
        if self.queue.size() > 0 {
            if let Some(sample) = self.queue.sample() {
                debug!(sample_id = %sample.id, priority = sample.priority, "selected organic sample");
                return Ok(Some(sample));
            }
        }

        let dataset = {
            let mut rng = rand::thread_rng();
            match self.datasets.choose(&mut rng) {
                Some(dataset) => Arc::clone(dataset),
                None => return Ok(None),
            }
        };
        let payload = dataset.sample().await?;
        let sample = Sample::synthetic(payload);
        debug!(sample_id = %sample.id, "selected synthetic sample");
        Ok(Some(sample))
    }
}

// ── JSONL dataset ────────────────────────────────────────────────────

/// Synthetic dataset backed by a JSON-lines file, one payload per line.
pub struct JsonlDataset {
    rows: Vec<serde_json::Value>,
}

impl JsonlDataset {
    pub fn new(rows: Vec<serde_json::Value>) -> Self {
        Self { rows }
    }

    /// Load every non-blank line of `path` as a JSON value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let rows = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|e| {
                    ConfigError::InvalidDataset(format!(
                        "{}:{}: {e}",
                        path.display(),
                        idx + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if rows.is_empty() {
            return Err(ConfigError::InvalidDataset(format!(
                "{} contains no samples",
                path.display()
            )));
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl SyntheticDataset for JsonlDataset {
    async fn sample(&self) -> Result<serde_json::Value, StageError> {
        self.rows
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| StageError::Unavailable("dataset is empty".into()))
    }
}
