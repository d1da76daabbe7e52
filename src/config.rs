use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const fn default_clients() -> usize {
    200
}

const fn default_requests() -> usize {
    10000
}

const fn default_keys_per_request() -> usize {
    100
}

const fn default_min_data_size() -> usize {
    100
}

const fn default_max_data_size() -> usize {
    200
}

const fn default_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

const fn default_timeout() -> Duration {
    Duration::from_millis(250)
}

const fn default_latency() -> Duration {
    Duration::from_micros(500)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("read config file {path:?} failed, {err}")]
    Read { path: PathBuf, err: std::io::Error },

    #[error("parse config failed, {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("min_data_size ({min}) must be less than max_data_size ({max})")]
    DataSize { min: usize, max: usize },
}

/// What the benchmark does.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of concurrent clients.
    #[serde(default = "default_clients")]
    pub clients: usize,

    /// Number of iterations every client runs, each one is a `set` and a
    /// `get_multi`.
    #[serde(default = "default_requests")]
    pub requests: usize,

    #[serde(default = "default_keys_per_request")]
    pub keys_per_request: usize,

    /// Payload size of `set` is picked from `[min_data_size, max_data_size)`.
    #[serde(default = "default_min_data_size")]
    pub min_data_size: usize,

    #[serde(default = "default_max_data_size")]
    pub max_data_size: usize,

    #[serde(default = "default_ttl", with = "humanize::duration::serde")]
    pub ttl: Duration,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clients: default_clients(),
            requests: default_requests(),
            keys_per_request: default_keys_per_request(),
            min_data_size: default_min_data_size(),
            max_data_size: default_max_data_size(),
            ttl: default_ttl(),
            cache: CacheConfig::default(),
        }
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(Into::into)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| Error::Read {
            path: path.to_path_buf(),
            err,
        })?;

        content.parse()
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [
            ("clients", self.clients),
            ("requests", self.requests),
            ("keys_per_request", self.keys_per_request),
        ] {
            if value == 0 {
                return Err(Error::Zero(name));
            }
        }

        if self.min_data_size >= self.max_data_size {
            return Err(Error::DataSize {
                min: self.min_data_size,
                max: self.max_data_size,
            });
        }

        let limits = self.cache_limits();
        for (name, value) in [
            ("cache.max_async_concurrency", limits.async_concurrency),
            ("cache.max_async_buffer_size", limits.async_buffer_size),
            ("cache.max_get_multi_concurrency", limits.get_multi_concurrency),
        ] {
            if value == 0 {
                return Err(Error::Zero(name));
            }
        }

        Ok(())
    }

    /// Resolves the cache settings, limits left unset are derived from the
    /// workload.
    pub fn cache_limits(&self) -> Limits {
        let cache = &self.cache;

        Limits {
            timeout: cache.timeout,
            latency: cache.latency,
            async_concurrency: cache.max_async_concurrency.unwrap_or(self.clients),
            async_buffer_size: cache
                .max_async_buffer_size
                .unwrap_or_else(|| self.clients.saturating_mul(self.requests)),
            get_multi_concurrency: cache.max_get_multi_concurrency.unwrap_or(self.clients),
            get_multi_batch_size: cache.max_get_multi_batch_size,
        }
    }
}

/// Settings of the in-process cache client.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Deadline of a single `get_multi` batch, including the time spent
    /// waiting for a turn.
    #[serde(default = "default_timeout", with = "humanize::duration::serde")]
    pub timeout: Duration,

    /// Simulated service time of every cache operation.
    #[serde(default = "default_latency", with = "humanize::duration::serde")]
    pub latency: Duration,

    /// Maximum number of writes running at once, defaults to `clients`.
    #[serde(default)]
    pub max_async_concurrency: Option<usize>,

    /// Maximum number of queued writes, defaults to `clients * requests`.
    #[serde(default)]
    pub max_async_buffer_size: Option<usize>,

    /// Maximum number of `get_multi` batches running at once, defaults to
    /// `clients`.
    #[serde(default)]
    pub max_get_multi_concurrency: Option<usize>,

    /// Maximum number of keys per `get_multi` batch, 0 disables batching.
    #[serde(default)]
    pub max_get_multi_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            latency: default_latency(),
            max_async_concurrency: None,
            max_async_buffer_size: None,
            max_get_multi_concurrency: None,
            max_get_multi_batch_size: 0,
        }
    }
}

/// Resolved cache settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Limits {
    pub timeout: Duration,
    pub latency: Duration,
    pub async_concurrency: usize,
    pub async_buffer_size: usize,
    pub get_multi_concurrency: usize,
    pub get_multi_batch_size: usize,
}
