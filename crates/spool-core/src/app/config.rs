//! RunnerConfig - タイムアウト・同時実行数・あふれ時の方針
//!
//! 環境変数から読み込める:
//! - `SPOOL_TIMEOUT_MS`: 数値（ミリ秒）。未設定ならタイムアウトなし
//! - `SPOOL_MAX_CONCURRENT_TASKS`: 数値 または `unbounded`
//! - `SPOOL_OVERFLOW`: `queue` | `fail_fast`
//! - `SPOOL_ABORT_ABANDONED`: `true` | `false`

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_TIMEOUT_MS: &str = "SPOOL_TIMEOUT_MS";
pub const ENV_MAX_CONCURRENT_TASKS: &str = "SPOOL_MAX_CONCURRENT_TASKS";
pub const ENV_OVERFLOW: &str = "SPOOL_OVERFLOW";
pub const ENV_ABORT_ABANDONED: &str = "SPOOL_ABORT_ABANDONED";

/// What `start` does when a bounded runner has no free slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Accept the task; it stays `pending` until a worker is free.
    #[default]
    Queue,

    /// Reject with `SpoolError::Busy`.
    FailFast,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max_concurrent_tasks must be greater than zero")]
    ZeroConcurrency,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Deadline for one work unit. `None` = wait forever.
    pub timeout_ms: Option<u64>,

    /// Worker pool size. `None` = one spawned task per `start`.
    pub max_concurrent_tasks: Option<usize>,

    pub overflow: OverflowPolicy,

    /// Abort (rather than detach) work whose result will be discarded
    /// because it timed out or was cancelled.
    pub abort_abandoned: bool,
}

impl RunnerConfig {
    /// Set the per-task timeout. Sub-millisecond parts round up, so any
    /// non-zero duration stays a real timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let ms = timeout.as_nanos().div_ceil(1_000_000);
        self.timeout_ms = Some(u64::try_from(ms).unwrap_or(u64::MAX));
        self
    }

    pub fn with_max_concurrent_tasks(mut self, limit: usize, overflow: OverflowPolicy) -> Self {
        self.max_concurrent_tasks = Some(limit);
        self.overflow = overflow;
        self
    }

    pub fn with_abort_abandoned(mut self, abort: bool) -> Self {
        self.abort_abandoned = abort;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_concurrent_tasks == Some(0) {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Read the `SPOOL_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_TIMEOUT_MS,
                value: raw.clone(),
                reason: "expected milliseconds",
            })?;
            config.timeout_ms = Some(ms);
        }

        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_TASKS) {
            let value = raw.trim();
            config.max_concurrent_tasks = if value.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                    key: ENV_MAX_CONCURRENT_TASKS,
                    value: raw.clone(),
                    reason: "expected a number or \"unbounded\"",
                })?)
            };
        }

        if let Some(raw) = lookup(ENV_OVERFLOW) {
            config.overflow = match raw.trim().to_ascii_lowercase().as_str() {
                "queue" => OverflowPolicy::Queue,
                "fail_fast" | "fail-fast" => OverflowPolicy::FailFast,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_OVERFLOW,
                        value: raw.clone(),
                        reason: "expected \"queue\" or \"fail_fast\"",
                    });
                }
            };
        }

        if let Some(raw) = lookup(ENV_ABORT_ABANDONED) {
            config.abort_abandoned = raw.trim().parse::<bool>().map_err(|_| {
                ConfigError::InvalidValue {
                    key: ENV_ABORT_ABANDONED,
                    value: raw.clone(),
                    reason: "expected true or false",
                }
            })?;
        }

        config.validate()?;
        Ok(config)
    }
}
