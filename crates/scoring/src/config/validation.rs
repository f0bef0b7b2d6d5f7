use super::types::{ScoringConfig, TriggerMode};
use crate::error::ConfigError;

/// Upper bound for `trigger.frequency`: one year of seconds, or as many steps.
pub const MAX_TRIGGER_FREQUENCY: f64 = 31_536_000.0;

impl ScoringConfig {
    /// Validate the config. Called on every load and again when the engine is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_frequency()?;
        self.validate_anneal()?;
        self.validate_poll_interval()?;
        Ok(())
    }

    fn validate_frequency(&self) -> Result<(), ConfigError> {
        let freq = self.trigger.frequency;
        if !freq.is_finite() || freq <= 0.0 {
            return Err(ConfigError::InvalidFrequency(freq, "must be a positive number"));
        }
        if freq > MAX_TRIGGER_FREQUENCY {
            return Err(ConfigError::InvalidFrequency(
                freq,
                "must not exceed 31536000 (one year of seconds)",
            ));
        }
        if self.trigger.mode == TriggerMode::Steps && freq.fract() != 0.0 {
            return Err(ConfigError::InvalidFrequency(
                freq,
                "step frequency must be a whole number",
            ));
        }
        Ok(())
    }

    fn validate_anneal(&self) -> Result<(), ConfigError> {
        let Some(anneal) = &self.trigger.anneal else {
            return Ok(());
        };
        if !anneal.scaling_factor.is_finite() || anneal.scaling_factor <= 0.0 {
            return Err(ConfigError::InvalidAnneal(format!(
                "scaling_factor must be greater than 0, got {}",
                anneal.scaling_factor
            )));
        }
        if !anneal.frequency_min.is_finite() || anneal.frequency_min <= 0.0 {
            return Err(ConfigError::InvalidAnneal(format!(
                "frequency_min must be greater than 0, got {}",
                anneal.frequency_min
            )));
        }
        if anneal.frequency_min > self.trigger.frequency {
            return Err(ConfigError::InvalidAnneal(format!(
                "frequency_min {} exceeds frequency {}",
                anneal.frequency_min, self.trigger.frequency
            )));
        }
        Ok(())
    }

    fn validate_poll_interval(&self) -> Result<(), ConfigError> {
        if self.trigger.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}
