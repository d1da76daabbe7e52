use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gatebench::cache::{CacheClient, MemoryCache};
use gatebench::config::Limits;
use metrics::Registry;

fn limits(get_multi_batch_size: usize) -> Limits {
    Limits {
        timeout: Duration::from_secs(1),
        latency: Duration::ZERO,
        async_concurrency: 64,
        async_buffer_size: 1024,
        get_multi_concurrency: 8,
        get_multi_batch_size,
    }
}

fn get_multi(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap();

    let keys = (0..100).map(|i| format!("key-{i}")).collect::<Vec<_>>();

    let mut group = c.benchmark_group("get_multi");
    group.throughput(Throughput::Elements(keys.len() as u64));

    for batch_size in [0usize, 10, 50] {
        let cache = runtime.block_on(async {
            let cache = MemoryCache::new(limits(batch_size), &Registry::new());
            for key in &keys {
                cache
                    .set_async(key.clone(), Bytes::from_static(b"value"), Duration::from_secs(600))
                    .unwrap();
            }
            cache.stop().await;

            Arc::new(cache)
        });

        group.bench_with_input(
            BenchmarkId::new("batch_size", batch_size),
            &keys,
            |b, keys| {
                b.to_async(&runtime).iter(|| {
                    let cache = Arc::clone(&cache);

                    async move {
                        let hits = cache.get_multi(keys).await;
                        assert_eq!(hits.len(), 100);
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, get_multi);
criterion_main!(benches);
