//! Sampler configuration. Parses a TOML fragment into a strongly-typed
//! structure with serde defaults, so a partial file works and unknown fields
//! are ignored. Durations accept human syntax ("60s", "5m") via
//! `humantime-serde`.

use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for one sampling processor instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeirConfig {
    /// Target reservoir size K for Algorithm R. Must be positive.
    pub size_k: usize,
    /// Window rollover period.
    #[serde(with = "humantime_serde")]
    pub window_duration: Duration,
    /// Sample whole traces instead of individual spans.
    pub trace_aware: bool,
    /// Maximum distinct traces buffered; LRU evicts whole traces beyond this.
    pub trace_buffer_max_size: usize,
    /// Inactivity period after which a buffered trace counts as complete.
    #[serde(with = "humantime_serde")]
    pub trace_buffer_timeout: Duration,
    /// Checkpoint store location. Empty disables checkpointing.
    pub checkpoint_path: Option<PathBuf>,
    /// Checkpoint tick period.
    #[serde(with = "humantime_serde")]
    pub checkpoint_interval: Duration,
    /// Cron expression driving store compaction. Empty disables it.
    pub db_compaction_schedule_cron: Option<String>,
    /// Skip compaction while the store is below this many bytes. Zero disables
    /// the size guard.
    pub db_compaction_target_size: u64,
}

impl Default for WeirConfig {
    fn default() -> Self {
        Self {
            size_k: Self::default_size_k(),
            window_duration: Self::default_window_duration(),
            trace_aware: true,
            trace_buffer_max_size: Self::default_trace_buffer_max_size(),
            trace_buffer_timeout: Self::default_trace_buffer_timeout(),
            checkpoint_path: None,
            checkpoint_interval: Self::default_checkpoint_interval(),
            db_compaction_schedule_cron: None,
            db_compaction_target_size: 0,
        }
    }
}

impl WeirConfig {
    fn default_size_k() -> usize {
        5000
    }
    fn default_window_duration() -> Duration {
        Duration::from_secs(60)
    }
    fn default_trace_buffer_max_size() -> usize {
        100_000
    }
    fn default_trace_buffer_timeout() -> Duration {
        Duration::from_secs(10)
    }
    fn default_checkpoint_interval() -> Duration {
        Duration::from_secs(10)
    }

    /// Parse a TOML fragment. Missing fields take their defaults; the result
    /// is validated before use via [`WeirConfig::validate`].
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: WeirConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Load and parse a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations the processor must not start with: non-positive
    /// sizes, zero durations, missing trace-buffer settings in trace-aware
    /// mode, and unparseable cron expressions.
    pub fn validate(&self) -> Result<()> {
        if self.size_k == 0 {
            return Err(Error::config("size_k must be positive"));
        }
        if self.window_duration.is_zero() {
            return Err(Error::config("window_duration must be positive"));
        }
        if self.trace_aware {
            if self.trace_buffer_max_size == 0 {
                return Err(Error::config(
                    "trace_buffer_max_size must be positive when trace_aware is enabled",
                ));
            }
            if self.trace_buffer_timeout.is_zero() {
                return Err(Error::config(
                    "trace_buffer_timeout must be positive when trace_aware is enabled",
                ));
            }
        }
        if self.checkpoint_interval.is_zero() {
            return Err(Error::config("checkpoint_interval must be positive"));
        }
        if let Some(expr) = &self.db_compaction_schedule_cron {
            cron::Schedule::from_str(expr)
                .map_err(|e| Error::config(format!("invalid compaction cron '{expr}': {e}")))?;
        }
        Ok(())
    }

    /// Whether checkpointing is enabled at all.
    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_path.is_some()
    }
}
