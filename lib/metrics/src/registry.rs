use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::attributes::{Attributes, assert_legal_key};
use crate::metric::{Instrument, Metric, Observation};
use crate::{Counter, Gauge, Histogram};

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();

type Families<T> = Arc<Mutex<BTreeMap<&'static str, Metric<T>>>>;

/// Holds every registered metric family. Clones share the same families.
#[derive(Clone, Default)]
pub struct Registry {
    counters: Families<Counter>,
    gauges: Families<Gauge>,
    histograms: Families<Histogram>,
}

/// Visits every series of a [`Registry`], family by family.
pub trait Reporter {
    fn start_metric(&mut self, name: &'static str, description: &'static str);

    fn report(&mut self, attributes: &Attributes, observation: Observation);

    fn finish_metric(&mut self);
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a counter family, or returns the existing one with the same name.
    pub fn register_counter(
        &self,
        name: &'static str,
        description: &'static str,
    ) -> Metric<Counter> {
        register(&self.counters, name, description, ())
    }

    pub fn register_gauge(&self, name: &'static str, description: &'static str) -> Metric<Gauge> {
        register(&self.gauges, name, description, ())
    }

    /// Registers a histogram family. `bounds` only matters the first time
    /// `name` is registered, an empty iterator picks exponential buckets.
    pub fn register_histogram(
        &self,
        name: &'static str,
        description: &'static str,
        bounds: impl Iterator<Item = f64>,
    ) -> Metric<Histogram> {
        register(&self.histograms, name, description, bounds.collect())
    }

    pub fn report(&self, reporter: &mut impl Reporter) {
        report_families(&self.counters, reporter);
        report_families(&self.gauges, reporter);
        report_families(&self.histograms, reporter);
    }
}

fn register<T: Instrument>(
    families: &Families<T>,
    name: &'static str,
    description: &'static str,
    options: T::Options,
) -> Metric<T> {
    assert_legal_key(name);

    families
        .lock()
        .entry(name)
        .or_insert_with(|| Metric::new(name, description, options))
        .clone()
}

fn report_families<T: Instrument>(families: &Families<T>, reporter: &mut impl Reporter) {
    // snapshot first, so reporters never run under the registry lock
    let families = families.lock().values().cloned().collect::<Vec<_>>();

    for family in families {
        let series = family
            .series
            .lock()
            .iter()
            .map(|(attributes, instrument)| (attributes.clone(), instrument.observe()))
            .collect::<Vec<_>>();

        reporter.start_metric(family.name, family.description);
        for (attributes, observation) in series {
            reporter.report(&attributes, observation);
        }
        reporter.finish_metric();
    }
}

/// The process wide registry.
pub fn global_registry() -> Registry {
    GLOBAL_REGISTRY.get_or_init(Registry::new).clone()
}
