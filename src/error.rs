//! Error types for the scheduler protocol, its configuration and the
//! simulator.
//!
//! Errors are split by surface: [`SchedError`] is what `submit`, `next` and
//! `remove` return, [`ConfigError`] covers loading and validating
//! configuration and scenarios, [`SimError`] ends a simulation run. All are
//! `#[non_exhaustive]`; callers should keep a fallback match arm.

use std::io;
use std::path::PathBuf;

use crate::api::{JobId, ThreadId};

/// Why a descriptor was rejected at submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, thiserror::Error)]
pub enum DescriptorFault {
    #[error("execution budget must be non-zero")]
    ZeroBudget,
    #[error("relative deadline must be non-zero")]
    ZeroRelativeDeadline,
    #[error("absolute deadline is not in the future")]
    DeadlineInPast,
    #[error("relative deadline is beyond the clock's range")]
    DeadlineOverflow,
}

/// Errors surfaced by the submission and fetch protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[non_exhaustive]
pub enum SchedError {
    /// Target thread does not exist or is not schedulable.
    #[error("no such thread: {0}")]
    NotFound(ThreadId),
    /// Target thread is outside the caller's authority.
    #[error("permission denied for {0}")]
    PermissionDenied(ThreadId),
    /// The job id is already present for that thread.
    #[error("{job} already registered for {tid}")]
    DuplicateId { tid: ThreadId, job: JobId },
    /// No Pending job with that id (never existed, running, or finished).
    #[error("{job} is not pending for {tid}")]
    UnknownJob { tid: ThreadId, job: JobId },
    /// Invalid budget or deadline.
    #[error("malformed job descriptor: {0}")]
    MalformedDescriptor(DescriptorFault),
    /// The fetch call was terminated by a terminal interruption.
    #[error("interrupted")]
    Interrupted,
    /// The calling thread is not registered with this scheduler.
    #[error("calling thread is not bound to the scheduler")]
    Unbound,
}

/// Errors from loading or validating [`SchedulerConfig`](crate::config::SchedulerConfig).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Why a simulation run stopped without an outcome.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SimError {
    /// Nothing can run and nothing is scheduled to change.
    #[error("{scenario}: hang at {at_us}us with no runnable thread and no pending timer")]
    Hang { scenario: String, at_us: u64 },
    #[error("{scenario}: still running after {max_ms}ms")]
    Timeout { scenario: String, max_ms: u64 },
    #[error("{scenario}: invariant violated at {at_us}us: {message}")]
    Invariant {
        scenario: String,
        at_us: u64,
        message: String,
    },
    #[error("{scenario}: {message}")]
    BadScenario { scenario: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_identifiers() {
        let err = SchedError::DuplicateId {
            tid: ThreadId::from_raw(4),
            job: JobId(9),
        };
        assert_eq!(err.to_string(), "job:9 already registered for tid:4");

        let err = SchedError::MalformedDescriptor(DescriptorFault::ZeroBudget);
        assert!(err.to_string().contains("budget"));
    }
}
