use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::attributes::Attributes;
use crate::histogram::HistogramObservation;

/// A point-in-time snapshot of one series.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    Counter(u64),
    Gauge(u64),
    Histogram(HistogramObservation),
}

/// The handle callers record into. Clones share the same underlying value.
pub trait Instrument: MakeInstrument + Clone + std::fmt::Debug + Send + 'static {
    fn observe(&self) -> Observation;
}

/// How a new series is created the first time a set of attributes is seen.
pub trait MakeInstrument {
    type Options: Clone + Send + Sync + std::fmt::Debug;

    fn create(options: &Self::Options) -> Self;
}

impl<T: Default> MakeInstrument for T {
    type Options = ();

    fn create(_: &Self::Options) -> Self {
        T::default()
    }
}

/// A family of series sharing one name, one series per unique set of
/// attributes.
#[derive(Clone, Debug)]
pub struct Metric<T: Instrument> {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) options: T::Options,
    pub(crate) series: Arc<Mutex<BTreeMap<Attributes, T>>>,
}

impl<T: Instrument> Metric<T> {
    pub(crate) fn new(name: &'static str, description: &'static str, options: T::Options) -> Self {
        Self {
            name,
            description,
            options,
            series: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Returns the instrument for `attributes`, creating it if needed.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> T {
        self.series
            .lock()
            .entry(attributes.into())
            .or_insert_with(|| T::create(&self.options))
            .clone()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn description(&self) -> &'static str {
        self.description
    }
}
