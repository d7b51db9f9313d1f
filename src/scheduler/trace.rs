//! Bounded scheduling trace and counters.
//!
//! Trace events are retained in a fixed-capacity ring. When the ring is full,
//! the oldest events are evicted first. Counters are never evicted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::api::{ExecutionClass, JobId, ThreadId};

/// Scheduling decisions and state changes, in occurrence order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedEventKind {
    Submitted {
        tid: ThreadId,
        job: JobId,
    },
    Dispatched {
        tid: ThreadId,
        job: JobId,
        class: ExecutionClass,
    },
    BudgetExhausted {
        tid: ThreadId,
        job: JobId,
    },
    Completed {
        tid: ThreadId,
        job: JobId,
        consumed_us: u64,
    },
    Blocked {
        tid: ThreadId,
        job: JobId,
        unconsumed_us: u64,
    },
    Resumed {
        tid: ThreadId,
        blocked_us: u64,
    },
    /// Running job reached its deadline.
    Missed {
        tid: ThreadId,
        job: JobId,
        consumed_us: u64,
    },
    /// Pending job reached its deadline before dispatch.
    Expired {
        tid: ThreadId,
        job: JobId,
    },
    Cancelled {
        tid: ThreadId,
        job: JobId,
    },
    ClassChanged {
        tid: ThreadId,
        from: ExecutionClass,
        to: ExecutionClass,
    },
    Exited {
        tid: ThreadId,
    },
}

/// A trace event stamped with its offset from the scheduler epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedEvent {
    pub at_us: u64,
    #[serde(flatten)]
    pub kind: SchedEventKind,
}

/// Fixed-capacity ring buffer of trace events.
#[derive(Clone, Debug)]
pub struct TraceRing {
    cap: usize,
    buf: VecDeque<SchedEvent>,
}

impl TraceRing {
    /// Create a trace ring with at least one slot.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            buf: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    #[inline(always)]
    pub fn cap(&self) -> usize {
        self.cap
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Push a new event, evicting the oldest if at capacity.
    #[inline(always)]
    pub fn push(&mut self, ev: SchedEvent) {
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(ev);
    }

    /// Snapshot the ring contents in chronological order.
    pub fn dump(&self) -> Vec<SchedEvent> {
        self.buf.iter().cloned().collect()
    }
}

/// Monotonic counters for one scheduler instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub missed: u64,
    pub expired: u64,
    pub cancelled: u64,
    pub blocks: u64,
    pub class_changes: u64,
}
