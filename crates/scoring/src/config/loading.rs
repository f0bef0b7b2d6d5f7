use std::path::Path;

use super::types::{QueueConfig, ScoringConfig, TriggerConfig};
use crate::error::ConfigError;

impl ScoringConfig {
    /// Parse config from a TOML string, apply env overrides, then validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Config with the given trigger and the default queue policy.
    pub fn new(trigger: TriggerConfig) -> Self {
        Self {
            trigger,
            queue: QueueConfig::default(),
        }
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `ORGANIC_TRIGGER_MODE` → `trigger.mode`
    /// - `ORGANIC_TRIGGER_FREQUENCY` → `trigger.frequency`
    /// - `ORGANIC_TRIGGER_POLL_INTERVAL_MS` → `trigger.poll_interval_ms`
    /// - `ORGANIC_QUEUE_POLICY` → `queue.policy`
    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable numbers are ignored; an unknown mode or policy is an error
    /// since silently keeping the file value would run the wrong trigger.
    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ORGANIC_TRIGGER_MODE") {
            self.trigger.mode = v.parse()?;
        }
        if let Some(v) = lookup("ORGANIC_TRIGGER_FREQUENCY") {
            if let Ok(freq) = v.trim().parse::<f64>() {
                self.trigger.frequency = freq;
            }
        }
        if let Some(v) = lookup("ORGANIC_TRIGGER_POLL_INTERVAL_MS") {
            if let Ok(ms) = v.trim().parse::<u64>() {
                self.trigger.poll_interval_ms = ms;
            }
        }
        if let Some(v) = lookup("ORGANIC_QUEUE_POLICY") {
            self.queue.policy = v.parse()?;
        }
        Ok(())
    }
}
