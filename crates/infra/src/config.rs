//! Engine configuration from `CAREBASE_*` environment variables.
//!
//! Malformed values never abort startup: they are logged and replaced by the
//! default.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::retry::RetryPolicy;

/// When events are projected relative to their append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Processed synchronously right after append, follow-ups included.
    #[default]
    Inline,
    /// Published to the bus and processed by the stream worker pool.
    Async,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "sync" => Ok(ProcessingMode::Inline),
            "async" => Ok(ProcessingMode::Async),
            other => Err(format!("unknown processing mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub processing_mode: ProcessingMode,
    pub worker_shards: usize,
    pub slow_event_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub sweep_interval_ms: u64,
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processing_mode: ProcessingMode::Inline,
            worker_shards: 4,
            slow_event_ms: 100,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 60_000,
            sweep_interval_ms: 5_000,
            database_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            processing_mode: parse_or(&lookup, "CAREBASE_PROCESSING_MODE", defaults.processing_mode),
            worker_shards: parse_or(&lookup, "CAREBASE_WORKER_SHARDS", defaults.worker_shards).max(1),
            slow_event_ms: parse_or(&lookup, "CAREBASE_SLOW_EVENT_MS", defaults.slow_event_ms),
            retry_max_attempts: parse_or(&lookup, "CAREBASE_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay_ms: parse_or(&lookup, "CAREBASE_RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: parse_or(&lookup, "CAREBASE_RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            sweep_interval_ms: parse_or(&lookup, "CAREBASE_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms.max(self.retry_base_delay_ms)),
        )
    }

    pub fn slow_event_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_event_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + core::fmt::Debug,
    T::Err: core::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(err) => {
            warn!(key, value = %raw, error = %err, fallback = ?default, "invalid configuration value; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EngineConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EngineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]), EngineConfig::default());
        assert_eq!(config(&[]).retry_policy().max_attempts, 5);
    }

    #[test]
    fn values_are_read() {
        let cfg = config(&[
            ("CAREBASE_PROCESSING_MODE", "Async"),
            ("CAREBASE_WORKER_SHARDS", "8"),
            ("CAREBASE_RETRY_MAX_ATTEMPTS", "2"),
            ("DATABASE_URL", "postgres://localhost/carebase"),
        ]);
        assert_eq!(cfg.processing_mode, ProcessingMode::Async);
        assert_eq!(cfg.worker_shards, 8);
        assert_eq!(cfg.retry_policy().max_attempts, 2);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/carebase"));
    }

    #[test]
    fn malformed_values_fall_back() {
        let cfg = config(&[
            ("CAREBASE_PROCESSING_MODE", "eventually"),
            ("CAREBASE_WORKER_SHARDS", "0"),
            ("CAREBASE_SLOW_EVENT_MS", "fast"),
        ]);
        assert_eq!(cfg.processing_mode, ProcessingMode::Inline);
        assert_eq!(cfg.worker_shards, 1);
        assert_eq!(cfg.slow_event_ms, 100);
    }
}
