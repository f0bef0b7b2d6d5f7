//! Organic queue trait and the built-in implementations.
//!
//! The queue is the only state shared between the admission path and the
//! cycle loop, so every implementation must be safe for concurrent `add`
//! while the loop calls `sample`. Both built-ins are unbounded: `add` holds a
//! mutex for O(log n) at most and never waits on capacity.

mod priority;
mod random;

use std::sync::Arc;

use crate::config::QueuePolicy;
use crate::sample::Sample;

pub use priority::PriorityOrganicQueue;
pub use random::RandomOrganicQueue;

/// Holding area for admitted organic samples.
///
/// The engine is the single consumer: only the cycle loop calls [`sample`],
/// so a `size() > 0` observation is never invalidated by another consumer.
/// A multi-consumer design must rely on `sample` returning `None` instead.
///
/// [`sample`]: OrganicQueue::sample
pub trait OrganicQueue: Send + Sync {
    /// Insert a sample.
    fn add(&self, sample: Sample);

    /// Remove and return one sample, or `None` when empty.
    fn sample(&self) -> Option<Sample>;

    /// Current number of queued samples.
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Build the queue named by a config policy.
pub fn from_policy(policy: QueuePolicy) -> Arc<dyn OrganicQueue> {
    match policy {
        QueuePolicy::Priority => Arc::new(PriorityOrganicQueue::new()),
        QueuePolicy::Random => Arc::new(RandomOrganicQueue::new()),
    }
}
