//! Engine configuration: trigger mode and frequency, annealing, queue policy.
//!
//! Loaded from TOML, overridden from `ORGANIC_*` environment variables, and
//! validated before the engine can be built.

mod loading;
mod types;
mod validation;

pub use validation::MAX_TRIGGER_FREQUENCY;
pub use types::{
    AnnealConfig, QueueConfig, QueuePolicy, ScoringConfig, TriggerConfig, TriggerMode,
};
