use std::sync::{Mutex, PoisonError};

use rand::Rng;

use super::OrganicQueue;
use crate::sample::Sample;

/// Organic queue that pops a uniformly random entry.
///
/// Ignores admission priority. Useful when organic traffic should be scored
/// without favouring any caller or arrival order.
#[derive(Default)]
pub struct RandomOrganicQueue {
    items: Mutex<Vec<Sample>>,
}

impl RandomOrganicQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrganicQueue for RandomOrganicQueue {
    fn add(&self, sample: Sample) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }

    fn sample(&self) -> Option<Sample> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..items.len());
        Some(items.swap_remove(idx))
    }

    fn size(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
