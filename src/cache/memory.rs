use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gate::{Gate, RegistryMetrics};
use metrics::{Counter, Registry};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tripwire::{Trigger, Tripwire};

use super::{CacheClient, Error};
use crate::config::Limits;

/// Expired entries nobody reads again are dropped by a sweep, run by the
/// first write after the interval passed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Instant,
}

struct Store {
    entries: Mutex<Entries>,
}

impl Store {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL,
            }),
        }
    }

    fn set(&self, key: String, value: Bytes, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if now >= entries.next_sweep {
            let before = entries.map.len();
            entries.map.retain(|_, entry| entry.expires_at > now);
            entries.next_sweep = now + SWEEP_INTERVAL;

            trace!(message = "Swept expired entries", removed = before - entries.map.len());
        }

        entries.map.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn get_many(&self, keys: &[String]) -> Vec<(String, Bytes)> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut found = Vec::with_capacity(keys.len());

        for key in keys {
            let expired = match entries.map.get(key) {
                Some(entry) if entry.expires_at > now => {
                    found.push((key.clone(), entry.value.clone()));
                    false
                }
                Some(_) => true,
                None => false,
            };

            if expired {
                entries.map.remove(key);
            }
        }

        found
    }
}

struct Write {
    key: String,
    value: Bytes,
    ttl: Duration,
}

/// An in-process cache with the concurrency limits of a remote cache client.
///
/// Writes are queued and applied in the background by at most
/// `async_concurrency` tasks, `get_multi` batches are limited to
/// `get_multi_concurrency` at once. Both limits are enforced by a [`Gate`],
/// so callers are served in arrival order once the limits are reached.
pub struct MemoryCache {
    limits: Limits,
    store: Arc<Store>,
    get_multi_gate: Gate,

    writes: mpsc::Sender<Write>,
    trigger: Mutex<Option<Trigger>>,
    writer: Mutex<Option<JoinHandle<()>>>,

    rejected_full: Counter,
    rejected_stopped: Counter,
    failed_batches: Counter,
}

impl MemoryCache {
    /// Creates the cache and spawns its background writer, so it must be
    /// called within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if any of the concurrency limits or the buffer size is 0.
    pub fn new(limits: Limits, registry: &Registry) -> Self {
        let store = Arc::new(Store::new());
        let (writes, queued) = mpsc::channel(limits.async_buffer_size);
        let (trigger, shutdown) = Tripwire::new("cache_async_writer");

        let async_gate = Arc::new(Gate::with_metrics(
            limits.async_concurrency,
            Arc::new(RegistryMetrics::new(registry, "async")),
        ));
        let failed_writes = registry
            .register_counter(
                "cache_async_writes_failed_total",
                "Total number of queued writes whose task failed.",
            )
            .recorder(&[]);
        let writer = tokio::spawn(run_writer(
            queued,
            async_gate,
            Arc::clone(&store),
            limits.latency,
            failed_writes,
            shutdown,
        ));

        let get_multi_gate = Gate::with_metrics(
            limits.get_multi_concurrency,
            Arc::new(RegistryMetrics::new(registry, "get_multi")),
        );

        let rejected = registry.register_counter(
            "cache_writes_rejected_total",
            "Total number of writes which could not be queued.",
        );
        let failed_batches = registry
            .register_counter(
                "cache_get_multi_failed_batches_total",
                "Total number of get_multi batches dropped from the result.",
            )
            .recorder(&[]);

        Self {
            limits,
            store,
            get_multi_gate,
            writes,
            trigger: Mutex::new(Some(trigger)),
            writer: Mutex::new(Some(writer)),
            rejected_full: rejected.recorder(&[("reason", "buffer_full")]),
            rejected_stopped: rejected.recorder(&[("reason", "stopped")]),
            failed_batches,
        }
    }

    async fn fetch_batch(&self, keys: &[String]) -> Result<Vec<(String, Bytes)>, Error> {
        let fetch = async {
            let _turn = self.get_multi_gate.turn().await;

            if !self.limits.latency.is_zero() {
                tokio::time::sleep(self.limits.latency).await;
            }

            self.store.get_many(keys)
        };

        tokio::time::timeout(self.limits.timeout, fetch)
            .await
            .map_err(|_| Error::Timeout(self.limits.timeout))
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    fn set_async(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), Error> {
        self.writes
            .try_send(Write { key, value, ttl })
            .map_err(|err| match err {
                TrySendError::Full(_) => {
                    self.rejected_full.inc(1);
                    Error::AsyncBufferFull
                }
                TrySendError::Closed(_) => {
                    self.rejected_stopped.inc(1);
                    Error::Stopped
                }
            })
    }

    async fn get_multi(&self, keys: &[String]) -> HashMap<String, Bytes> {
        if keys.is_empty() {
            return HashMap::new();
        }

        let batch_size = match self.limits.get_multi_batch_size {
            0 => keys.len(),
            size => size,
        };

        let batches = keys.chunks(batch_size).map(|batch| self.fetch_batch(batch));

        let mut hits = HashMap::with_capacity(keys.len());
        for result in futures::future::join_all(batches).await {
            match result {
                Ok(found) => hits.extend(found),
                Err(err) => {
                    self.failed_batches.inc(1);
                    debug!(message = "Dropped get_multi batch", %err);
                }
            }
        }

        hits
    }

    async fn stop(&self) {
        let trigger = self.trigger.lock().take();
        if let Some(trigger) = trigger {
            trigger.cancel();
        }

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                error!(message = "Async writer failed", %err);
            }
        }
    }
}

async fn run_writer(
    mut queued: mpsc::Receiver<Write>,
    gate: Arc<Gate>,
    store: Arc<Store>,
    latency: Duration,
    failed: Counter,
    mut shutdown: Tripwire,
) {
    let mut running = JoinSet::new();

    loop {
        let write = tokio::select! {
            biased;

            _ = &mut shutdown => break,
            write = queued.recv() => match write {
                Some(write) => write,
                None => break,
            },
        };

        apply(write, &gate, &store, latency, &mut running).await;
        reap_finished(&mut running, &failed);
    }

    // writes accepted before the shutdown are still applied
    queued.close();
    let mut drained = 0usize;
    while let Some(write) = queued.recv().await {
        apply(write, &gate, &store, latency, &mut running).await;
        reap_finished(&mut running, &failed);
        drained += 1;
    }

    while let Some(result) = running.join_next().await {
        check_write(result, &failed);
    }

    debug!(message = "Async writer stopped", drained);
}

async fn apply(
    write: Write,
    gate: &Arc<Gate>,
    store: &Arc<Store>,
    latency: Duration,
    running: &mut JoinSet<()>,
) {
    let turn = Arc::clone(gate).turn_owned().await;
    let store = Arc::clone(store);

    running.spawn(async move {
        let _turn = turn;

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        store.set(write.key, write.value, write.ttl);
    });
}

/// Collects finished writes, so the set stays as small as the gate.
fn reap_finished(running: &mut JoinSet<()>, failed: &Counter) {
    while let Some(result) = running.try_join_next() {
        check_write(result, failed);
    }
}

fn check_write(result: Result<(), JoinError>, failed: &Counter) {
    if let Err(err) = result {
        failed.inc(1);
        error!(message = "Async write failed", %err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            timeout: Duration::from_secs(1),
            latency: Duration::ZERO,
            async_concurrency: 4,
            async_buffer_size: 16,
            get_multi_concurrency: 4,
            get_multi_batch_size: 0,
        }
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{i}")).collect()
    }

    #[tokio::test]
    async fn set_and_get() {
        let cache = MemoryCache::new(limits(), &Registry::new());

        for key in keys(3) {
            cache
                .set_async(key, Bytes::from_static(b"xxx"), Duration::from_secs(60))
                .unwrap();
        }
        cache.stop().await;

        let hits = cache.get_multi(&keys(5)).await;
        assert_eq!(hits.len(), 3);
        assert_eq!(hits["key-0"], Bytes::from_static(b"xxx"));
        assert!(!hits.contains_key("key-4"));
    }

    #[tokio::test]
    async fn empty_get_multi() {
        let cache = MemoryCache::new(limits(), &Registry::new());

        assert!(cache.get_multi(&[]).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = MemoryCache::new(limits(), &Registry::new());

        cache
            .set_async("key".into(), Bytes::from_static(b"v"), Duration::from_secs(1))
            .unwrap();
        cache.stop().await;

        assert_eq!(cache.get_multi(&["key".to_string()]).await.len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get_multi(&["key".to_string()]).await.is_empty());
        assert!(cache.store.entries.lock().map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn batches_share_the_gate() {
        let cache = MemoryCache::new(
            Limits {
                latency: Duration::from_millis(10),
                get_multi_concurrency: 1,
                get_multi_batch_size: 2,
                ..limits()
            },
            &Registry::new(),
        );

        for key in keys(5) {
            cache
                .set_async(key, Bytes::from_static(b"v"), Duration::from_secs(60))
                .unwrap();
        }
        cache.stop().await;

        let start = Instant::now();
        let hits = cache.get_multi(&keys(5)).await;
        assert_eq!(hits.len(), 5);

        // three batches, served one at a time
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_batch_is_dropped() {
        let registry = Registry::new();
        let cache = MemoryCache::new(
            Limits {
                timeout: Duration::from_millis(150),
                latency: Duration::from_millis(100),
                get_multi_concurrency: 1,
                get_multi_batch_size: 1,
                ..limits()
            },
            &registry,
        );

        for key in keys(2) {
            cache
                .set_async(key, Bytes::from_static(b"v"), Duration::from_secs(60))
                .unwrap();
        }
        cache.stop().await;

        let hits = cache.get_multi(&keys(2)).await;
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key("key-0"));

        let failed = registry
            .register_counter("cache_get_multi_failed_batches_total", "")
            .recorder(&[]);
        assert_eq!(failed.fetch(), 1);
    }

    #[tokio::test]
    async fn full_buffer_rejects_writes() {
        let cache = MemoryCache::new(
            Limits {
                async_buffer_size: 1,
                ..limits()
            },
            &Registry::new(),
        );

        // the writer has not been polled yet, so nothing leaves the buffer
        cache
            .set_async("a".into(), Bytes::from_static(b"v"), Duration::from_secs(60))
            .unwrap();
        let err = cache
            .set_async("b".into(), Bytes::from_static(b"v"), Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, Error::AsyncBufferFull));

        cache.stop().await;
        let hits = cache.get_multi(&["a".to_string(), "b".to_string()]).await;
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn stopped_cache_rejects_writes() {
        let cache = MemoryCache::new(limits(), &Registry::new());
        cache.stop().await;
        // stopping twice is fine
        cache.stop().await;

        let err = cache
            .set_async("a".into(), Bytes::from_static(b"v"), Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, Error::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_unread_expired_entries() {
        let store = Store::new();

        store.set("short".into(), Bytes::from_static(b"v"), Duration::from_millis(500));
        store.set("long".into(), Bytes::from_static(b"v"), Duration::from_secs(60));

        // before the interval passed nothing is swept
        tokio::time::advance(Duration::from_millis(600)).await;
        store.set("other".into(), Bytes::from_static(b"v"), Duration::from_secs(60));
        assert_eq!(store.entries.lock().map.len(), 3);

        tokio::time::advance(Duration::from_millis(600)).await;
        store.set("last".into(), Bytes::from_static(b"v"), Duration::from_secs(60));

        let entries = store.entries.lock();
        assert_eq!(entries.map.len(), 3);
        assert!(!entries.map.contains_key("short"));
    }

    #[tokio::test]
    async fn failed_writes_are_counted() {
        let registry = Registry::new();
        let failed = registry
            .register_counter("cache_async_writes_failed_total", "")
            .recorder(&[]);

        let mut running = JoinSet::new();
        running.spawn(async {});
        running.spawn(async { panic!("write failed") });

        while let Some(result) = running.join_next().await {
            check_write(result, &failed);
        }
        reap_finished(&mut running, &failed);

        assert_eq!(failed.fetch(), 1);
    }
}
