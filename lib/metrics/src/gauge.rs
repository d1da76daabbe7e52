use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metric::{Instrument, Observation};

/// A value that can go up and down, it never drops below zero.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
}

impl Gauge {
    #[inline]
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn dec(&self, delta: u64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(delta))
            });
    }

    #[inline]
    pub fn fetch(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Instrument for Gauge {
    fn observe(&self) -> Observation {
        Observation::Gauge(self.fetch())
    }
}
