//! Per-thread execution class state machine.
//!
//! ```text
//!                 submit
//!        Idle ─────────────► Atlas ◄──────────────────────────┐
//!         ▲                 │   │                             │
//!         │ no work         │   │ deadline miss, no credit    │ window reached /
//!         │                 │   ▼                             │ cooperative finish
//!         │  block w/ credit│  Timeshare ─────────────────────┤
//!         │                 ▼                                 │
//!         └──────────────  Recover ───────────────────────────┘
//!                          (credit absorbed)
//! ```
//!
//! The controller holds the block credit (`accumulated_block_time`): the
//! unconsumed budget of a job whose thread suspended. Credit is spent while
//! the thread runs its blocked job under Recover and is dropped at the next
//! scheduling opportunity, so the job never receives more than its budget.

use std::time::Duration;

use crate::api::ExecutionClass;

/// Inputs to the class state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassEvent {
    /// A job was submitted for the thread.
    Submitted,
    /// The thread suspended holding `unconsumed` budget of its running job.
    Blocked { unconsumed: Duration },
    /// The running job reached its deadline.
    DeadlineMissed,
    /// The clock reached the reserved window of the next pending job.
    WindowReached,
    /// The running job completed cooperatively.
    JobFinished,
    /// The thread entered `next()` without a running job.
    Fetch,
    /// All remaining work was cancelled or expired.
    Drained,
}

/// A class change produced by [`ClassController::on_event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: ExecutionClass,
    pub to: ExecutionClass,
}

/// Execution class and block credit of one thread.
#[derive(Clone, Copy, Debug)]
pub struct ClassController {
    class: ExecutionClass,
    block_credit: Duration,
}

impl ClassController {
    pub fn new() -> Self {
        Self {
            class: ExecutionClass::Idle,
            block_credit: Duration::ZERO,
        }
    }

    #[inline]
    pub fn class(&self) -> ExecutionClass {
        self.class
    }

    /// Unconsumed budget carried from a blocked job.
    #[inline]
    pub fn block_credit(&self) -> Duration {
        self.block_credit
    }

    /// Spend credit while the blocked job runs again.
    #[inline]
    pub fn absorb(&mut self, ran: Duration) {
        self.block_credit = self.block_credit.saturating_sub(ran);
    }

    /// Apply an event.
    ///
    /// `has_work` reports whether the thread still owns a Pending or Running
    /// job after the event's job-table effects were applied.
    pub fn on_event(&mut self, event: ClassEvent, has_work: bool) -> Option<Transition> {
        use ExecutionClass::*;

        let next = match event {
            ClassEvent::Submitted => match self.class {
                Idle => Atlas,
                other => other,
            },
            ClassEvent::Blocked { unconsumed } => {
                self.block_credit = unconsumed;
                if unconsumed.is_zero() {
                    self.class
                } else {
                    Recover
                }
            }
            ClassEvent::DeadlineMissed => {
                if !self.block_credit.is_zero() {
                    Recover
                } else {
                    Timeshare
                }
            }
            ClassEvent::WindowReached => {
                self.block_credit = Duration::ZERO;
                Atlas
            }
            ClassEvent::JobFinished => {
                self.block_credit = Duration::ZERO;
                Atlas
            }
            ClassEvent::Fetch => match self.class {
                Recover => {
                    self.block_credit = Duration::ZERO;
                    Atlas
                }
                Idle => Atlas,
                other => other,
            },
            ClassEvent::Drained => Idle,
        };

        let next = if has_work { next } else { Idle };
        if next == Idle {
            self.block_credit = Duration::ZERO;
        }
        if next == self.class {
            return None;
        }
        let t = Transition {
            from: self.class,
            to: next,
        };
        self.class = next;
        Some(t)
    }
}

impl Default for ClassController {
    fn default() -> Self {
        Self::new()
    }
}
