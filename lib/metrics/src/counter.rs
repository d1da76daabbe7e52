use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metric::{Instrument, Observation};

/// A monotonically increasing value.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    #[inline]
    pub fn inc(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn fetch(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Instrument for Counter {
    fn observe(&self) -> Observation {
        Observation::Counter(self.fetch())
    }
}
