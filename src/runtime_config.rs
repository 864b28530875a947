//! # Runtime Configuration Module
//!
//! Tuning knobs for the dispatch core, loaded from defaults, an optional YAML
//! document and environment variables (in that order, later sources win).
//!
//! ## Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `SWITCHYARD_BLOCKING_WORKERS` | `blocking_workers` | `10` |
//! | `SWITCHYARD_BLOCKING_QUEUE_WARN` | `blocking_queue_warn` | `1024` |
//! | `SWITCHYARD_WORKER_STACK_SIZE` | `worker_stack_size` | `0x200000` (2 MB) |
//! | `SWITCHYARD_SLOW_ROUTE_US` | `slow_route_threshold_us` | `1000` |
//! | `SWITCHYARD_SLOW_HANDLER_MS` | `slow_handler_threshold_ms` | `500` |
//!
//! `SWITCHYARD_WORKER_STACK_SIZE` accepts decimal (`2097152`) or hex (`0x200000`).
//! Unparseable values are ignored with a warning and the previous value kept.
//!
//! ## Usage
//!
//! ```rust
//! use switchyard::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_yaml_str("blocking_workers: 4").unwrap();
//! assert_eq!(config.blocking_workers, 4);
//! assert_eq!(config.blocking_queue_warn, 1024);
//! ```
//!
//! ## Blocking pool sizing
//!
//! The blocking pool is shared by every request in the process. When all
//! workers are busy, blocking handlers and providers queue; they never fail.
//! Size it for the number of blocking calls you expect to overlap.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::worker_pool::WorkerPoolConfig;

/// Runtime configuration for the dispatch core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of OS threads running blocking handlers and providers
    pub blocking_workers: usize,
    /// Queue depth above which a backpressure warning is logged
    pub blocking_queue_warn: usize,
    /// Stack size for blocking worker threads in bytes
    pub worker_stack_size: usize,
    /// Route matches slower than this are logged at warn level
    pub slow_route_threshold_us: u64,
    /// Handlers slower than this are logged at warn level
    pub slow_handler_threshold_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            blocking_workers: 10,
            blocking_queue_warn: 1024,
            worker_stack_size: 0x20_0000,
            slow_route_threshold_us: 1000,
            slow_handler_threshold_ms: 500,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a YAML document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed YAML or unknown fields.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("Failed to parse runtime configuration YAML")
    }

    /// Load a YAML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runtime configuration {}", path.display()))?;
        let mut config = Self::from_yaml_str(&text)
            .with_context(|| format!("Invalid runtime configuration {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Apply `SWITCHYARD_*` overrides in place.
    pub fn apply_env(&mut self) {
        override_from_env("SWITCHYARD_BLOCKING_WORKERS", &mut self.blocking_workers, parse_usize);
        override_from_env(
            "SWITCHYARD_BLOCKING_QUEUE_WARN",
            &mut self.blocking_queue_warn,
            parse_usize,
        );
        override_from_env("SWITCHYARD_WORKER_STACK_SIZE", &mut self.worker_stack_size, parse_usize);
        override_from_env("SWITCHYARD_SLOW_ROUTE_US", &mut self.slow_route_threshold_us, |s| {
            s.parse().ok()
        });
        override_from_env("SWITCHYARD_SLOW_HANDLER_MS", &mut self.slow_handler_threshold_ms, |s| {
            s.parse().ok()
        });
    }

    /// Reject settings the dispatch core cannot run with.
    ///
    /// # Errors
    ///
    /// `blocking_workers == 0` (blocking work would never run) and a worker
    /// stack below 64 KB.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.blocking_workers == 0 {
            bail!("blocking_workers must be at least 1");
        }
        if self.worker_stack_size < 0x1_0000 {
            bail!(
                "worker_stack_size {:#x} is below the 64KB minimum",
                self.worker_stack_size
            );
        }
        Ok(())
    }

    /// Worker pool configuration derived from these settings
    #[must_use]
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(
            self.blocking_workers,
            self.blocking_queue_warn,
            self.worker_stack_size,
        )
    }

    /// Slow route-match threshold as a [`Duration`]
    #[must_use]
    pub fn slow_route_threshold(&self) -> Duration {
        Duration::from_micros(self.slow_route_threshold_us)
    }

    /// Slow handler threshold as a [`Duration`]
    #[must_use]
    pub fn slow_handler_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_handler_threshold_ms)
    }
}

fn override_from_env<T, F>(key: &str, slot: &mut T, parse: F)
where
    F: Fn(&str) -> Option<T>,
{
    let Ok(raw) = env::var(key) else {
        return;
    };
    match parse(raw.trim()) {
        Some(value) => *slot = value,
        None => warn!(key, value = %raw, "Ignoring unparseable configuration override"),
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal size
fn parse_usize(s: &str) -> Option<usize> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
