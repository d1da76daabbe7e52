//! Drives a [`CacheClient`] with synthetic traffic.
//!
//! Every client runs `requests` iterations, each one writes a single key with
//! `set_async` and then reads `keys_per_request` keys with `get_multi`. Only
//! the `get_multi` latency is measured.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tripwire::Tripwire;

use crate::cache::CacheClient;
use crate::config::Config;
use crate::report::Report;

#[derive(Clone, Copy, Debug)]
struct Workload {
    requests: usize,
    keys_per_request: usize,
    min_data_size: usize,
    max_data_size: usize,
    ttl: Duration,
}

impl From<&Config> for Workload {
    fn from(config: &Config) -> Self {
        Self {
            requests: config.requests,
            keys_per_request: config.keys_per_request,
            min_data_size: config.min_data_size,
            max_data_size: config.max_data_size,
            ttl: config.ttl,
        }
    }
}

#[derive(Debug, Default)]
struct ClientStats {
    latencies: Vec<Duration>,
    hits: usize,
    set_failures: usize,
}

/// Runs all clients to completion, or until `shutdown` is cancelled, then
/// stops the cache. `config` is expected to be validated already.
pub async fn run(config: &Config, cache: Arc<dyn CacheClient>, shutdown: Tripwire) -> Report {
    let workload = Workload::from(config);

    info!(
        message = "Start clients",
        clients = config.clients,
        requests = config.requests,
        keys_per_request = config.keys_per_request,
        data_size = ?(config.min_data_size..config.max_data_size),
    );

    let start = Instant::now();
    let mut clients = JoinSet::new();
    for _ in 0..config.clients {
        clients.spawn(run_client(Arc::clone(&cache), workload, shutdown.clone()));
    }

    info!(message = "All clients started, waiting to complete");

    let mut latencies = Vec::with_capacity(config.clients.saturating_mul(config.requests));
    let mut hits = 0;
    let mut set_failures = 0;
    while let Some(result) = clients.join_next().await {
        match result {
            Ok(stats) => {
                latencies.extend(stats.latencies);
                hits += stats.hits;
                set_failures += stats.set_failures;
            }
            Err(err) => {
                error!(message = "Client failed", %err);
            }
        }
    }

    cache.stop().await;
    let elapsed = start.elapsed();

    if shutdown.cancelled() {
        warn!(
            message = "Benchmark interrupted, the report only covers finished requests",
            finished = latencies.len()
        );
    }

    Report::new(&mut latencies, hits, set_failures, elapsed)
}

async fn run_client(
    cache: Arc<dyn CacheClient>,
    workload: Workload,
    shutdown: Tripwire,
) -> ClientStats {
    let mut stats = ClientStats {
        latencies: Vec::with_capacity(workload.requests),
        ..Default::default()
    };

    for i in 0..workload.requests {
        if shutdown.cancelled() {
            break;
        }

        let keys = (0..workload.keys_per_request)
            .map(|k| format!("key-{i}-{k}"))
            .collect::<Vec<_>>();

        let size = rand::rng().random_range(workload.min_data_size..workload.max_data_size);
        let value = Bytes::from(vec![b'x'; size]);
        if let Err(err) = cache.set_async(keys[0].clone(), value, workload.ttl) {
            stats.set_failures += 1;
            trace!(message = "Set failed", %err);
        }

        let start = Instant::now();
        let found = cache.get_multi(&keys).await;
        stats.latencies.push(start.elapsed());
        stats.hits += found.len();
    }

    stats
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::cache::Error;

    /// Remembers every call and serves reads from what was written.
    #[derive(Default)]
    struct Recording {
        values: Mutex<HashMap<String, Bytes>>,
        gets: Mutex<usize>,
        stopped: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl CacheClient for Recording {
        fn set_async(&self, key: String, value: Bytes, _ttl: Duration) -> Result<(), Error> {
            self.values.lock().insert(key, value);
            Ok(())
        }

        async fn get_multi(&self, keys: &[String]) -> HashMap<String, Bytes> {
            *self.gets.lock() += 1;

            let values = self.values.lock();
            keys.iter()
                .filter_map(|key| values.get(key).map(|v| (key.clone(), v.clone())))
                .collect()
        }

        async fn stop(&self) {
            *self.stopped.lock() = true;
        }
    }

    fn config() -> Config {
        Config {
            clients: 3,
            requests: 4,
            keys_per_request: 5,
            min_data_size: 10,
            max_data_size: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn every_client_runs_every_request() {
        let cache = Arc::new(Recording::default());
        let (_trigger, shutdown) = Tripwire::new("bench");

        let report = run(&config(), cache.clone(), shutdown).await;

        assert_eq!(report.operations, 12);
        assert_eq!(*cache.gets.lock(), 12);
        assert!(*cache.stopped.lock());

        // the first key of every request is written right before reading
        assert_eq!(report.hits, 12);
        assert_eq!(report.set_failures, 0);

        let values = cache.values.lock();
        assert_eq!(values.len(), 4);
        assert!(values.values().all(|v| (10..20).contains(&v.len())));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cache = Arc::new(Recording::default());
        let (trigger, shutdown) = Tripwire::new("bench");
        trigger.cancel();

        let report = run(&config(), cache.clone(), shutdown).await;

        assert_eq!(report.operations, 0);
        assert!(*cache.stopped.lock());
    }
}
