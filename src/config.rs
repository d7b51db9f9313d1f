//! Scheduler configuration.
//!
//! All defaults are conservative. A config can be built in code, parsed from
//! TOML, or loaded from a file:
//!
//! ```toml
//! trace_capacity = 4096
//! timer_slack_us = 200
//! protect_init = true
//! privileged = [2]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ThreadId;
use crate::error::ConfigError;

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of scheduling events retained in the trace ring.
    pub trace_capacity: usize,

    /// Slack added to timer waits inside `next()`.
    ///
    /// Waking slightly after a deadline guarantees the sweep observes it as
    /// passed rather than looping on a zero-length wait.
    pub timer_slack_us: u64,

    /// Register the init thread ([`ThreadId::INIT`]) as live and protected.
    pub protect_init: bool,

    /// Raw ids of threads allowed to target protected threads.
    pub privileged: Vec<u64>,
}

impl SchedulerConfig {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_capacity == 0 {
            return Err(ConfigError::Invalid("trace_capacity must be > 0"));
        }
        if self.privileged.contains(&0) {
            return Err(ConfigError::Invalid("thread id 0 is not a valid identity"));
        }
        Ok(())
    }

    #[inline]
    pub fn timer_slack(&self) -> Duration {
        Duration::from_micros(self.timer_slack_us)
    }

    pub fn privileged_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.privileged.iter().copied().map(ThreadId::from_raw)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            trace_capacity: 4096,
            timer_slack_us: 200,
            protect_init: true,
            privileged: Vec::new(),
        }
    }
}
