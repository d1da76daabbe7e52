use criterion::{Criterion, criterion_group, criterion_main};
use metrics::{Registry, exponential_buckets};

pub fn record(c: &mut Criterion) {
    let registry = Registry::new();

    c.bench_function("counter recorder lookup", |b| {
        let counters = registry.register_counter("counter", "counter description");
        b.iter(|| counters.recorder(&[("gate", "bench")]).inc(1))
    });

    c.bench_function("gauge set", |b| {
        let gauge = registry.register_gauge("gauge", "gauge description").recorder(&[]);
        b.iter(|| gauge.set(42))
    });

    c.bench_function("histogram record", |b| {
        let histogram = registry
            .register_histogram("histogram", "histogram description", exponential_buckets(0.001, 2.0, 16))
            .recorder(&[]);
        b.iter(|| histogram.record(0.25))
    });
}

criterion_group!(benches, record);
criterion_main!(benches);
