use std::fmt::{Display, Formatter, Write};
use std::time::Duration;

use metrics::{Attributes, Observation, Reporter};

/// Summary of a benchmark run.
#[derive(Clone, Debug, PartialEq)]
pub struct Report {
    /// Number of finished iterations, every one issued a set and a get_multi.
    pub operations: usize,
    pub set_failures: usize,
    pub hits: usize,

    pub get_multi_avg: Duration,
    pub get_multi_p99: Duration,
    pub get_multi_max: Duration,

    pub elapsed: Duration,
}

impl Report {
    /// `latencies` is sorted in place.
    pub fn new(
        latencies: &mut [Duration],
        hits: usize,
        set_failures: usize,
        elapsed: Duration,
    ) -> Self {
        latencies.sort_unstable();

        let operations = latencies.len();
        let (avg, p99, max) = if operations == 0 {
            (Duration::ZERO, Duration::ZERO, Duration::ZERO)
        } else {
            let total = latencies.iter().map(Duration::as_nanos).sum::<u128>();
            let avg = Duration::from_nanos((total / operations as u128) as u64);
            let p99 = latencies[(operations * 99).div_ceil(100) - 1];

            (avg, p99, latencies[operations - 1])
        };

        Self {
            operations,
            set_failures,
            hits,
            get_multi_avg: avg,
            get_multi_p99: p99,
            get_multi_max: max,
            elapsed,
        }
    }

    pub fn ops_per_sec(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }

        self.operations as f64 / self.elapsed.as_secs_f64()
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "SET ops: {} failed: {}",
            self.operations, self.set_failures
        )?;
        writeln!(
            f,
            "GETMULTI avg: {} ms p99: {} ms max: {} ms",
            self.get_multi_avg.as_millis(),
            self.get_multi_p99.as_millis(),
            self.get_multi_max.as_millis()
        )?;
        writeln!(
            f,
            "GETMULTI ops: {} ops/s: {:.2} hits: {}",
            self.operations,
            self.ops_per_sec(),
            self.hits
        )?;
        write!(f, "Total time: {:?}", self.elapsed)
    }
}

/// Renders a [`metrics::Registry`] in the Prometheus text format.
#[derive(Debug, Default)]
pub struct TextReporter {
    output: String,
    current: Option<&'static str>,
    typed: bool,
}

impl TextReporter {
    pub fn into_string(self) -> String {
        self.output
    }

    fn write_type(&mut self, name: &str, kind: &str) {
        if !self.typed {
            let _ = writeln!(self.output, "# TYPE {name} {kind}");
            self.typed = true;
        }
    }
}

fn format_attributes(attributes: &Attributes) -> String {
    if attributes.is_empty() {
        return String::new();
    }

    let pairs = attributes
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{pairs}}}")
}

impl Reporter for TextReporter {
    fn start_metric(&mut self, name: &'static str, description: &'static str) {
        let _ = writeln!(self.output, "# HELP {name} {description}");
        self.current = Some(name);
        self.typed = false;
    }

    fn report(&mut self, attributes: &Attributes, observation: Observation) {
        let Some(name) = self.current else {
            return;
        };

        match observation {
            Observation::Counter(value) => {
                self.write_type(name, "counter");
                let _ = writeln!(self.output, "{name}{} {value}", format_attributes(attributes));
            }
            Observation::Gauge(value) => {
                self.write_type(name, "gauge");
                let _ = writeln!(self.output, "{name}{} {value}", format_attributes(attributes));
            }
            Observation::Histogram(histogram) => {
                self.write_type(name, "histogram");

                let mut cumulative = 0;
                for bucket in &histogram.buckets {
                    cumulative += bucket.count;

                    let le = if bucket.le.is_infinite() {
                        "+Inf".to_string()
                    } else {
                        bucket.le.to_string()
                    };
                    let mut with_le = attributes.clone();
                    with_le.insert("le", le);

                    let _ = writeln!(
                        self.output,
                        "{name}_bucket{} {cumulative}",
                        format_attributes(&with_le)
                    );
                }

                let attrs = format_attributes(attributes);
                let _ = writeln!(self.output, "{name}_sum{attrs} {}", histogram.sum);
                let _ = writeln!(self.output, "{name}_count{attrs} {}", histogram.count);
            }
        }
    }

    fn finish_metric(&mut self) {
        self.current = None;
    }
}
