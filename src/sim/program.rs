//! Scenario definitions for the scheduler simulation.
//!
//! A scenario is a set of thread programs: deterministic instruction streams
//! interpreted by the runner against a manually advanced clock. Thread `i`
//! of a scenario is addressed by index `i` in `Submit`/`Remove` targets.
//!
//! ```toml
//! name = "blocking-two"
//! tick_us = 1000
//!
//! [[threads]]
//! name = "main"
//! code = [
//!   { op = "submit", target = 1, job = 1, budget_ms = 1000, deadline_ms = 1200 },
//! ]
//!
//! [[threads]]
//! name = "t1"
//! code = [{ op = "next" }, { op = "busy", ms = 500 }, { op = "next" }]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_tick_us() -> u64 {
    1000
}

fn default_max_ms() -> u64 {
    60_000
}

/// A complete simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Simulated CPU quantum.
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
    /// Simulated time after which the run is declared stuck.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    pub threads: Vec<ThreadProgram>,
}

/// A single thread with a name and instruction stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadProgram {
    pub name: String,
    pub code: Vec<Instr>,
}

/// Instruction set for the simulation interpreter.
///
/// `Submit`, `Remove` and `Snapshot` take no simulated time. `Busy` and
/// `AwaitDeadline` consume CPU ticks, and only while the thread is allowed
/// to run. `Block` suspends the thread for wall time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instr {
    Submit {
        target: usize,
        job: u64,
        budget_ms: u64,
        /// Relative to the submission instant unless `absolute`, in which case
        /// it is measured from the scenario start.
        deadline_ms: u64,
        #[serde(default)]
        absolute: bool,
    },
    Remove {
        target: usize,
        job: u64,
    },
    /// Complete the current job and park until the next one is dispatched.
    Next,
    /// Consume `ms` of CPU.
    Busy { ms: u64 },
    /// Voluntarily suspend for `ms` of wall time.
    Block { ms: u64 },
    /// Spin until the deadline of the job last returned by `Next`.
    AwaitDeadline,
    /// Record the thread's scheduling state under `label`.
    Snapshot { label: String },
}

impl Instr {
    /// Relative submission shorthand used by the built-in scenarios.
    pub fn submit(target: usize, job: u64, budget_ms: u64, deadline_ms: u64) -> Self {
        Instr::Submit {
            target,
            job,
            budget_ms,
            deadline_ms,
            absolute: false,
        }
    }

    pub fn snapshot(label: &str) -> Self {
        Instr::Snapshot {
            label: label.to_owned(),
        }
    }
}

impl ThreadProgram {
    pub fn new(name: &str, code: Vec<Instr>) -> Self {
        Self {
            name: name.to_owned(),
            code,
        }
    }
}

impl Scenario {
    pub fn new(name: &str, description: &str, threads: Vec<ThreadProgram>) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            tick_us: default_tick_us(),
            max_ms: default_max_ms(),
            threads,
        }
    }

    /// Check the scenario is interpretable; returns a description of the
    /// first problem found.
    pub fn check(&self) -> Result<(), String> {
        if self.tick_us == 0 {
            return Err("tick_us must be > 0".to_owned());
        }
        if self.max_ms == 0 {
            return Err("max_ms must be > 0".to_owned());
        }
        let n = self.threads.len();
        for t in &self.threads {
            for (pc, instr) in t.code.iter().enumerate() {
                let target = match instr {
                    Instr::Submit { target, .. } | Instr::Remove { target, .. } => *target,
                    _ => continue,
                };
                if target >= n {
                    return Err(format!(
                        "thread {:?} instruction {pc} targets thread {target}, but only {n} exist",
                        t.name
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
