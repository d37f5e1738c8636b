use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TABLA_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TABLA_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            worker: WorkerConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  worker:  workers={}, queue_capacity={}, timeout={}ms",
            self.worker.resolved_worker_count(),
            self.worker.queue_capacity,
            self.worker.task_timeout_ms
        );
        tracing::info!(
            "  retry:   max={}, delay={}ms, strategy={:?}",
            self.worker.max_retries,
            self.worker.retry_delay_ms,
            self.worker.retry_strategy
        );
        tracing::info!(
            "  queue:   batch_size={}, batch_timeout={}ms, backoff={}ms",
            self.queue.batch_size,
            self.queue.batch_timeout_ms,
            self.queue.poll_backoff_ms
        );
    }
}

// ── Calculation worker ────────────────────────────────────────

/// How a failed task waits out its retry delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Sleep on the worker that ran the task, then resubmit. The worker slot
    /// stays occupied for the whole delay.
    #[default]
    Blocking,
    /// Hand the task to a detached timer that resubmits it after the delay,
    /// freeing the worker immediately.
    Deferred,
}

impl std::str::FromStr for RetryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" => Ok(RetryStrategy::Blocking),
            "deferred" => Ok(RetryStrategy::Deferred),
            other => Err(format!("unknown retry strategy '{other}'")),
        }
    }
}

/// Calculation worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of pool workers. 0 = available parallelism.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of the bounded ingress queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound for a single task execution.
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay before a failed task is resubmitted.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Reserved; not consumed by the dispatch loop.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Reserved; not consumed by the dispatch loop.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// How often the stats refresher samples queue depth.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default)]
    pub retry_strategy: RetryStrategy,
}

fn default_worker_count() -> usize { 4 }
fn default_queue_capacity() -> usize { 1000 }
fn default_task_timeout_ms() -> u64 { 30_000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_batch_size() -> usize { 10 }
fn default_batch_timeout_ms() -> u64 { 100 }
fn default_stats_interval() -> u64 { 5 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            task_timeout_ms: default_task_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            stats_interval_secs: default_stats_interval(),
            retry_strategy: RetryStrategy::default(),
        }
    }
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            worker_count: profiled_env_parse(p, "CALC_WORKERS", default_worker_count()),
            queue_capacity: profiled_env_parse(p, "CALC_QUEUE_CAPACITY", default_queue_capacity()),
            task_timeout_ms: profiled_env_parse(p, "CALC_TASK_TIMEOUT_MS", default_task_timeout_ms()),
            max_retries: profiled_env_parse(p, "CALC_MAX_RETRIES", default_max_retries()),
            retry_delay_ms: profiled_env_parse(p, "CALC_RETRY_DELAY_MS", default_retry_delay_ms()),
            batch_size: profiled_env_parse(p, "CALC_BATCH_SIZE", default_batch_size()),
            batch_timeout_ms: profiled_env_parse(p, "CALC_BATCH_TIMEOUT_MS", default_batch_timeout_ms()),
            stats_interval_secs: profiled_env_parse(p, "CALC_STATS_INTERVAL_SECS", default_stats_interval()),
            retry_strategy: profiled_env_parse(p, "CALC_RETRY_STRATEGY", RetryStrategy::default()),
        }
    }

    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_count
        }
    }

    /// Ingress capacity; a zero capacity is raised to one.
    pub fn resolved_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Stats refresh interval; never shorter than one second.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

// ── Priority queue batching ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Sleep between polls of an empty queue while collecting a batch.
    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,
}

fn default_poll_backoff_ms() -> u64 { 10 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            poll_backoff_ms: default_poll_backoff_ms(),
        }
    }
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            batch_size: profiled_env_parse(p, "QUEUE_BATCH_SIZE", default_batch_size()),
            batch_timeout_ms: profiled_env_parse(p, "QUEUE_BATCH_TIMEOUT_MS", default_batch_timeout_ms()),
            poll_backoff_ms: profiled_env_parse(p, "QUEUE_POLL_BACKOFF_MS", default_poll_backoff_ms()),
        }
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }
}
