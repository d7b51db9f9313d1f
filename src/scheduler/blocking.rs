//! Voluntary-suspension tracking.
//!
//! The monitor records when the thread holding a Running job stops making
//! progress. A suspension with budget left is a *block*: the remainder is
//! reported so the class controller can carry it as credit and the core can
//! hand the idle core to someone else.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::api::{Job, JobId, ThreadId};

/// A block declared by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockReport {
    pub tid: ThreadId,
    pub job: JobId,
    pub consumed: Duration,
    pub unconsumed: Duration,
}

/// Tracks suspended threads and their blocked spans.
#[derive(Debug, Default)]
pub struct BlockingMonitor {
    /// Start of the open suspension span, per thread.
    suspended: BTreeMap<ThreadId, Instant>,
    blocked_total: BTreeMap<ThreadId, Duration>,
}

impl BlockingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `tid` suspended at `now` while holding `job`.
    ///
    /// Returns a report only if the job still had unconsumed budget.
    pub fn on_suspend(
        &mut self,
        tid: ThreadId,
        job: Option<&Job>,
        consumed: Duration,
        now: Instant,
    ) -> Option<BlockReport> {
        self.suspended.insert(tid, now);
        let job = job?;
        let unconsumed = job.budget.saturating_sub(consumed);
        if unconsumed.is_zero() {
            return None;
        }
        Some(BlockReport {
            tid,
            job: job.id,
            consumed,
            unconsumed,
        })
    }

    /// Record that `tid` resumed; returns the blocked span.
    pub fn on_resume(&mut self, tid: ThreadId, now: Instant) -> Option<Duration> {
        let since = self.suspended.remove(&tid)?;
        let span = now.saturating_duration_since(since);
        *self.blocked_total.entry(tid).or_default() += span;
        Some(span)
    }

    #[inline]
    pub fn is_suspended(&self, tid: ThreadId) -> bool {
        self.suspended.contains_key(&tid)
    }

    /// Total time `tid` spent suspended across completed spans.
    pub fn blocked_total(&self, tid: ThreadId) -> Duration {
        self.blocked_total.get(&tid).copied().unwrap_or_default()
    }

    pub fn forget(&mut self, tid: ThreadId) {
        self.suspended.remove(&tid);
        self.blocked_total.remove(&tid);
    }
}
