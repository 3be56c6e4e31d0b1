//! Queue configuration loading and representation.
//!
//! Every setting has a default and an `UPLOADQ_*` environment override.
//! Durations are integer milliseconds; lists are comma separated.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use uploadq_core::AllowedExtensions;

use crate::jobs::{RetryPolicy, WorkerPoolConfig, pool::default_pool_size};

/// Lower bound for timer-driven settings.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub pool_size: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub lock_duration: Duration,
    pub stall_sweep_interval: Duration,
    pub max_stalled_count: u32,
    pub per_attempt_timeout: Duration,
    pub poll_interval: Duration,
    pub progress_buffer: usize,
    pub allowed_extensions: AllowedExtensions,
    /// Uploads larger than this are rejected before a job is created
    pub max_file_size_bytes: u64,
    /// Root directory for stored uploads
    pub storage_dir: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
            lock_duration: Duration::from_millis(30_000),
            stall_sweep_interval: Duration::from_millis(30_000),
            max_stalled_count: 3,
            per_attempt_timeout: Duration::from_millis(30_000),
            poll_interval: Duration::from_millis(100),
            progress_buffer: 256,
            allowed_extensions: AllowedExtensions::default(),
            max_file_size_bytes: 5 * 1024 * 1024,
            storage_dir: PathBuf::from("user_files"),
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `UPLOADQ_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("UPLOADQ_POOL_SIZE") {
            config.pool_size = parse_positive("UPLOADQ_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("UPLOADQ_MAX_ATTEMPTS") {
            config.max_attempts = parse_positive("UPLOADQ_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("UPLOADQ_BASE_BACKOFF_MS") {
            config.base_backoff = parse_millis("UPLOADQ_BASE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("UPLOADQ_LOCK_DURATION_MS") {
            config.lock_duration = parse_millis("UPLOADQ_LOCK_DURATION_MS", &v)?;
        }
        if let Some(v) = get("UPLOADQ_STALL_SWEEP_INTERVAL_MS") {
            config.stall_sweep_interval = parse_positive_millis("UPLOADQ_STALL_SWEEP_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("UPLOADQ_MAX_STALLED_COUNT") {
            config.max_stalled_count = parse("UPLOADQ_MAX_STALLED_COUNT", &v)?;
        }
        if let Some(v) = get("UPLOADQ_PER_ATTEMPT_TIMEOUT_MS") {
            config.per_attempt_timeout = parse_positive_millis("UPLOADQ_PER_ATTEMPT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("UPLOADQ_POLL_INTERVAL_MS") {
            config.poll_interval = parse_positive_millis("UPLOADQ_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("UPLOADQ_PROGRESS_BUFFER") {
            config.progress_buffer = parse_positive("UPLOADQ_PROGRESS_BUFFER", &v)?;
        }
        if let Some(v) = get("UPLOADQ_ALLOWED_EXTENSIONS") {
            let allowed = AllowedExtensions::parse_list(&v);
            if allowed.as_slice().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "UPLOADQ_ALLOWED_EXTENSIONS",
                    value: v,
                    reason: "no extensions listed".to_string(),
                });
            }
            config.allowed_extensions = allowed;
        }
        if let Some(v) = get("UPLOADQ_MAX_FILE_SIZE_BYTES") {
            config.max_file_size_bytes = parse_positive("UPLOADQ_MAX_FILE_SIZE_BYTES", &v)?;
        }
        if let Some(v) = get("UPLOADQ_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(v.trim());
        }

        Ok(config)
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_base_backoff(mut self, delay: Duration) -> Self {
        self.base_backoff = delay;
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_stall_sweep_interval(mut self, interval: Duration) -> Self {
        self.stall_sweep_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_max_stalled_count(mut self, count: u32) -> Self {
        self.max_stalled_count = count;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout.max(MIN_INTERVAL);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_allowed_extensions(mut self, allowed: AllowedExtensions) -> Self {
        self.allowed_extensions = allowed;
        self
    }

    pub fn with_max_file_size_bytes(mut self, limit: u64) -> Self {
        self.max_file_size_bytes = limit;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, self.base_backoff)
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::default()
            .with_pool_size(self.pool_size)
            .with_poll_interval(self.poll_interval)
            .with_per_attempt_timeout(self.per_attempt_timeout)
            .with_lock_duration(self.lock_duration)
            .with_stall_sweep_interval(self.stall_sweep_interval)
            .with_max_stalled_count(self.max_stalled_count)
            .with_progress_buffer(self.progress_buffer)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let parsed: T = parse(key, value)?;
    if parsed == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

fn parse_positive_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_positive::<u64>(key, value).map(Duration::from_millis)
}
