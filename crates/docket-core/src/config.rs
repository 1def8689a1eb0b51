//! Dispatcher configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::retry::{Backoff, RetryPolicy};

pub const ENV_WORKERS: &str = "DOCKET_WORKERS";
pub const ENV_AUTO_START: &str = "DOCKET_AUTO_START";
pub const ENV_MAX_RETRY: &str = "DOCKET_MAX_RETRY";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "DOCKET_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "DOCKET_RETRY_MAX_DELAY_MS";

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Size of the shared worker pool (at least 1).
    pub default_workers: usize,

    /// Schedule tasks as soon as they are submitted. When false, tasks wait
    /// for `execute` / `start_all`.
    pub auto_start: bool,

    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_workers: DEFAULT_WORKERS,
            auto_start: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers.max(1);
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build from `DOCKET_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_workers = parse_or(&lookup, ENV_WORKERS, defaults.default_workers)?;
        if default_workers == 0 {
            return Err(ConfigError::Invalid {
                key: ENV_WORKERS,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let auto_start = match lookup(ENV_AUTO_START) {
            None => defaults.auto_start,
            Some(raw) => parse_bool(ENV_AUTO_START, &raw)?,
        };

        let max_retry = parse_or(&lookup, ENV_MAX_RETRY, defaults.retry.max_retry)?;
        let mut retry = RetryPolicy::new(max_retry);

        if let Some(raw) = lookup(ENV_RETRY_BASE_DELAY_MS) {
            let base_ms: u64 = parse(ENV_RETRY_BASE_DELAY_MS, &raw)?;
            let max_ms = parse_or(&lookup, ENV_RETRY_MAX_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS)?;
            if base_ms > 0 {
                retry = retry.with_backoff(Backoff::new(
                    Duration::from_millis(base_ms),
                    Duration::from_millis(max_ms.max(base_ms)),
                ));
            }
        }

        Ok(Self {
            default_workers,
            auto_start,
            retry,
        })
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
