use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};

use super::OrganicQueue;
use crate::sample::Sample;

struct Queued {
    priority: f64,
    seq: u64,
    sample: Sample,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Max-heap: higher priority first, then earlier arrival (lower seq).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

/// Default organic queue: highest priority first, FIFO among equal priorities.
///
/// With every entry at neutral priority this is a plain FIFO.
#[derive(Default)]
pub struct PriorityOrganicQueue {
    inner: Mutex<Inner>,
}

impl PriorityOrganicQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrganicQueue for PriorityOrganicQueue {
    fn add(&self, sample: Sample) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Queued {
            priority: sample.priority,
            seq,
            sample,
        });
    }

    fn sample(&self) -> Option<Sample> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.heap.pop().map(|q| q.sample)
    }

    fn size(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heap
            .len()
    }
}
