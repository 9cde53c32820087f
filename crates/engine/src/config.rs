//! Engine configuration via `arbiter.toml`
//!
//! Two sections: `[reaper]` for timeout enforcement and `[coordinator]` for
//! the commit protocol. Every field has a default except
//! `coordinator.ordering`, which must be set explicitly.
//!
//! Mode strings are kept as strings and parsed by accessors, so a bad value
//! is reported with the offending text. `from_file` and `from_toml_str`
//! validate eagerly.

use arbiter_core::{Error, OrderingPolicy, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "arbiter.toml";

/// Lower bound for the cancel and cancel-fail waits
pub const MIN_CANCEL_WAIT_MS: u64 = 10;

/// How the reaper scheduler decides when to wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// Wake every `check_period`
    Periodic,
    /// Wake when the earliest element is due, or earlier on insert
    Dynamic,
}

impl std::str::FromStr for CheckMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "periodic" | "normal" => Ok(CheckMode::Periodic),
            "dynamic" => Ok(CheckMode::Dynamic),
            other => Err(Error::Config(format!(
                "invalid reaper check mode '{}', expected \"periodic\", \"dynamic\" or \"normal\"",
                other
            ))),
        }
    }
}

/// `[reaper]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaperConfig {
    /// `"periodic"`, `"dynamic"` or the legacy alias `"normal"` (periodic)
    pub check_mode: String,
    /// Scheduler wake interval in periodic mode; upper bound in dynamic mode
    pub check_period_ms: u64,
    /// Time a queued cancel may take before the worker is interrupted
    pub cancel_wait_ms: u64,
    /// Time an interrupted cancel may take before the worker is abandoned
    pub cancel_fail_wait_ms: u64,
    /// Zombie count at which the reaper warns on every new zombie
    pub zombie_max: usize,
    /// Start capturing diagnostics this long before a deadline (0 = off)
    pub trace_grace_period_ms: u64,
    /// Interval between captures inside the grace period
    pub trace_interval_ms: u64,
    /// Worker threads performing cancellations
    pub workers: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            check_mode: "dynamic".to_string(),
            check_period_ms: 120_000,
            cancel_wait_ms: 500,
            cancel_fail_wait_ms: 500,
            zombie_max: 8,
            trace_grace_period_ms: 0,
            trace_interval_ms: 0,
            workers: 1,
        }
    }
}

impl ReaperConfig {
    /// Parsed check mode
    pub fn check_mode(&self) -> Result<CheckMode> {
        self.check_mode.parse()
    }

    /// Check period (at least 1ms)
    pub fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_period_ms.max(1))
    }

    /// Cancel wait, clamped to `MIN_CANCEL_WAIT_MS`
    pub fn cancel_wait(&self) -> Duration {
        Duration::from_millis(self.cancel_wait_ms.max(MIN_CANCEL_WAIT_MS))
    }

    /// Cancel-fail wait, clamped to `MIN_CANCEL_WAIT_MS`
    pub fn cancel_fail_wait(&self) -> Duration {
        Duration::from_millis(self.cancel_fail_wait_ms.max(MIN_CANCEL_WAIT_MS))
    }

    /// Zombie warning ceiling, at least 1
    pub fn zombie_max(&self) -> usize {
        self.zombie_max.max(1)
    }

    /// Trace grace period
    pub fn trace_grace_period(&self) -> Duration {
        Duration::from_millis(self.trace_grace_period_ms)
    }

    /// Trace interval
    pub fn trace_interval(&self) -> Duration {
        Duration::from_millis(self.trace_interval_ms)
    }

    /// Worker count, at least 1
    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }
}

/// `[coordinator]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// `"order_first"` or `"type_first"`; required
    pub ordering: Option<String>,
    /// Allow folding prepare and commit for single-record transactions
    pub one_phase_commit: bool,
    /// Timeout applied by `begin_with_default_timeout` (0 = never reaped)
    pub default_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ordering: None,
            one_phase_commit: true,
            default_timeout_ms: 0,
        }
    }
}

impl CoordinatorConfig {
    /// Parsed ordering policy
    pub fn ordering(&self) -> Result<OrderingPolicy> {
        match &self.ordering {
            Some(ordering) => ordering.parse().map_err(Error::Config),
            None => Err(Error::Config(
                "coordinator.ordering must be set to \"order_first\" or \"type_first\"".to_string(),
            )),
        }
    }

    /// Default transaction timeout
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Engine configuration loaded from `arbiter.toml`
///
/// # Example
///
/// ```toml
/// [reaper]
/// check_mode = "dynamic"
/// cancel_wait_ms = 500
///
/// [coordinator]
/// ordering = "type_first"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Reaper settings
    pub reaper: ReaperConfig,
    /// Coordinator settings
    pub coordinator: CoordinatorConfig,
}

impl EngineConfig {
    /// Default settings with the given ordering policy
    pub fn new(ordering: OrderingPolicy) -> Self {
        let name = match ordering {
            OrderingPolicy::OrderFirst => "order_first",
            OrderingPolicy::TypeFirst => "type_first",
        };
        let mut config = Self::default();
        config.coordinator.ordering = Some(name.to_string());
        config
    }

    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Arbiter engine configuration

[reaper]
# "dynamic" wakes when the next transaction is due,
# "periodic" (alias "normal") wakes every check_period_ms
check_mode = "dynamic"
check_period_ms = 120000

# Wait before interrupting a cancel in progress, then before abandoning
# the worker. Both are at least 10ms.
cancel_wait_ms = 500
cancel_fail_wait_ms = 500

# Warn on every zombie worker once this many exist (at least 1)
zombie_max = 8

# Capture diagnostics this long before a deadline, every trace_interval_ms
# (0 disables capturing)
trace_grace_period_ms = 0
trace_interval_ms = 0

workers = 1

[coordinator]
# "order_first" or "type_first"
ordering = "order_first"
one_phase_commit = true

# Timeout for begin_with_default_timeout (0 = never reaped)
default_timeout_ms = 0
"#
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Write the default config file if it does not already exist
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Check the mode strings and the presence of an ordering policy
    pub fn validate(&self) -> Result<()> {
        self.reaper.check_mode()?;
        self.coordinator.ordering()?;
        Ok(())
    }
}
