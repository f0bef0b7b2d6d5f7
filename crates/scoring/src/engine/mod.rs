//! Organic scoring engine -- lifecycle, cycle loop and control surface.
//!
//! Split into focused submodules:
//! - `core`: engine struct, builder, intake and step-counter controls
//! - `lifecycle`: start/stop state machine guarding the single cycle loop
//! - `cycle`: the trigger → select → execute → log loop

mod core;
mod cycle;
mod lifecycle;
#[cfg(test)]
mod tests;

pub use self::core::{OrganicScoring, OrganicScoringBuilder};
pub use self::lifecycle::LifecycleState;
