//! The cache client driven by the benchmark.

mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryCache;

#[derive(Debug, Error)]
pub enum Error {
    #[error("async write buffer is full")]
    AsyncBufferFull,

    #[error("cache client is stopped")]
    Stopped,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Queues a write and returns without waiting for it. Fails only when
    /// the write cannot be queued.
    fn set_async(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), Error>;

    /// Fetches all `keys`, misses and failed batches are simply absent from
    /// the result.
    async fn get_multi(&self, keys: &[String]) -> HashMap<String, Bytes>;

    /// Stops accepting writes, and waits until queued writes are done.
    async fn stop(&self);
}
