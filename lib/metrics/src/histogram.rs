use std::iter::once;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::metric::{Instrument, MakeInstrument, Observation};

#[derive(Clone, Debug, PartialEq)]
pub struct ObservationBucket {
    /// Inclusive upper bound.
    pub le: f64,
    /// Number of values that fell into this bucket, not cumulative.
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramObservation {
    pub buckets: Vec<ObservationBucket>,
    pub sum: f64,
    pub count: u64,
}

/// Buckets values by their upper bounds, the last bucket is always `+Inf`.
#[derive(Clone, Debug)]
pub struct Histogram {
    state: Arc<Mutex<HistogramObservation>>,
}

impl Histogram {
    pub fn new(bounds: impl IntoIterator<Item = f64>) -> Self {
        let mut bounds = bounds
            .into_iter()
            .filter(|le| le.is_finite())
            .collect::<Vec<_>>();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();

        let buckets = bounds
            .into_iter()
            .chain(once(f64::INFINITY))
            .map(|le| ObservationBucket { le, count: 0 })
            .collect();

        Self {
            state: Arc::new(Mutex::new(HistogramObservation {
                buckets,
                sum: 0.0,
                count: 0,
            })),
        }
    }

    pub fn record(&self, value: f64) {
        if value.is_nan() {
            return;
        }

        let mut state = self.state.lock();
        if let Some(bucket) = state.buckets.iter_mut().find(|b| value <= b.le) {
            bucket.count = bucket.count.wrapping_add(1);
        }
        state.sum += value;
        state.count = state.count.wrapping_add(1);
    }

    pub fn get(&self) -> HistogramObservation {
        self.state.lock().clone()
    }
}

impl Instrument for Histogram {
    fn observe(&self) -> Observation {
        Observation::Histogram(self.get())
    }
}

impl MakeInstrument for Histogram {
    type Options = Vec<f64>;

    fn create(bounds: &Self::Options) -> Self {
        if bounds.is_empty() {
            return Histogram::new(exponential_buckets(1.0, 2.0, 10));
        }

        Histogram::new(bounds.iter().copied())
    }
}

pub fn exponential_buckets(start: f64, factor: f64, length: u64) -> impl Iterator<Item = f64> {
    (0..length).map(move |i| start * factor.powf(i as f64))
}

pub fn linear_buckets(start: f64, width: f64, length: u64) -> impl Iterator<Item = f64> {
    (0..length).map(move |i| start + width * i as f64)
}
