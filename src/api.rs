//! Public identifier and descriptor types shared by every scheduler layer.
//!
//! ## Time model
//! Deadlines are resolved to absolute [`Instant`]s at submission time. A
//! relative deadline is measured from the submission instant reported by the
//! scheduler's clock, never from the caller's own clock reading.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Opaque thread identity issued by a [`ThreadRegistry`](crate::scheduler::ThreadRegistry).
///
/// Identities are never derived from OS or runtime internals; the registry
/// hands them out when a thread is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Reserved identity of the protected init thread.
    pub const INIT: ThreadId = ThreadId(1);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Caller-chosen job identifier, unique per thread among live jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl From<u64> for JobId {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

/// Deadline reference as supplied by the submitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Point in time on the scheduler clock.
    Absolute(Instant),
    /// Offset from the submission instant.
    Relative(Duration),
}

/// The (budget, deadline) pair of one job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub budget: Duration,
    pub deadline: Deadline,
}

impl Reservation {
    pub fn relative(budget: Duration, deadline: Duration) -> Self {
        Self {
            budget,
            deadline: Deadline::Relative(deadline),
        }
    }

    pub fn absolute(budget: Duration, deadline: Instant) -> Self {
        Self {
            budget,
            deadline: Deadline::Absolute(deadline),
        }
    }
}

/// One submission in a batch.
#[derive(Clone, Copy, Debug)]
pub struct JobRequest {
    pub target: ThreadId,
    pub job: JobId,
    pub reservation: Reservation,
}

/// Lifecycle of a job.
///
/// ```text
/// Pending ──► Running ──► Completed
///    │         │  ▲ └───► Missed
///    │   block │  │ redispatch
///    │         ▼  │
///    │       Blocked ───► Missed / Completed
///    ├──────────────────► Missed     (deadline passed before dispatch)
///    └──────────────────► Cancelled  (remove / owner exit)
/// ```
///
/// Only the job of the thread holding the core is `Running`; a job whose
/// thread suspended mid-reservation waits as `Blocked` until it is
/// dispatched again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Blocked,
    Completed,
    Missed,
    Cancelled,
}

/// A job reservation as stored in the job table.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub owner: ThreadId,
    pub budget: Duration,
    pub deadline: Instant,
    pub submitted_at: Instant,
    /// Global submission order; EDF tie-break key.
    pub seq: u64,
    pub state: JobState,
}

impl Job {
    /// Start of the reserved execution slice: `deadline - budget`, clamped to
    /// the submission instant.
    pub fn window_start(&self) -> Instant {
        self.deadline
            .checked_sub(self.budget)
            .map_or(self.submitted_at, |start| start.max(self.submitted_at))
    }

    /// EDF ordering key.
    #[inline]
    pub fn edf_key(&self) -> (Instant, u64) {
        (self.deadline, self.seq)
    }
}

/// Execution class of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionClass {
    /// Deadline-scheduled with a valid reservation.
    Atlas,
    /// Owes back unconsumed time from a blocked job.
    Recover,
    /// Best-effort after a deadline overrun.
    Timeshare,
    /// No pending or running work.
    Idle,
}

impl ExecutionClass {
    /// Selection tier; lower runs first. Idle threads never compete.
    #[inline]
    pub(crate) fn tier(self) -> Option<u8> {
        match self {
            Self::Atlas => Some(0),
            Self::Recover => Some(1),
            Self::Timeshare => Some(2),
            Self::Idle => None,
        }
    }
}

impl fmt::Display for ExecutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Atlas => "atlas",
            Self::Recover => "recover",
            Self::Timeshare => "timeshare",
            Self::Idle => "idle",
        };
        f.write_str(s)
    }
}
