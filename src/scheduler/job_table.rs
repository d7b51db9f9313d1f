//! Per-thread job reservations.
//!
//! Pure data, no policy: the table validates and stores jobs, answers EDF
//! queries, and moves jobs between states when the core tells it to.
//!
//! # Invariants
//!
//! - `(tid, job id)` is unique for the lifetime of `tid`: ids of finished,
//!   cancelled and expired jobs stay retired until the thread is removed.
//! - Pending jobs are kept in submission order; `seq` is strictly increasing
//!   across the whole table and breaks EDF ties.
//! - A thread owns at most one started job, either Running (on the core) or
//!   Blocked (suspended mid-reservation).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use crate::api::{Deadline, Job, JobId, JobState, Reservation, ThreadId};
use crate::error::{DescriptorFault, SchedError};

#[derive(Debug, Default)]
struct ThreadJobs {
    pending: VecDeque<Job>,
    running: Option<Job>,
    blocked: Option<Job>,
}

impl ThreadJobs {
    fn contains(&self, id: JobId) -> bool {
        self.started().is_some_and(|j| j.id == id) || self.pending.iter().any(|j| j.id == id)
    }

    fn started(&self) -> Option<&Job> {
        self.running.as_ref().or(self.blocked.as_ref())
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.running.is_none() && self.blocked.is_none()
    }
}

/// Job reservations of all threads.
#[derive(Debug, Default)]
pub struct JobTable {
    threads: BTreeMap<ThreadId, ThreadJobs>,
    /// Ids that left the table, per live thread.
    retired: BTreeMap<ThreadId, BTreeSet<JobId>>,
    next_seq: u64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append a job to `tid`'s pending sequence. Returns the
    /// job's submission sequence number.
    ///
    /// # Errors
    /// - `MalformedDescriptor` for a zero budget, a zero relative deadline,
    ///   a relative deadline past the range of `Instant`, or an absolute
    ///   deadline at or before `now`.
    /// - `DuplicateId` if `id` was already submitted for `tid`.
    pub fn insert(
        &mut self,
        tid: ThreadId,
        id: JobId,
        reservation: Reservation,
        now: Instant,
    ) -> Result<u64, SchedError> {
        if reservation.budget.is_zero() {
            return Err(SchedError::MalformedDescriptor(DescriptorFault::ZeroBudget));
        }
        let deadline = match reservation.deadline {
            Deadline::Relative(offset) if offset.is_zero() => {
                return Err(SchedError::MalformedDescriptor(
                    DescriptorFault::ZeroRelativeDeadline,
                ))
            }
            Deadline::Relative(offset) => now.checked_add(offset).ok_or(
                SchedError::MalformedDescriptor(DescriptorFault::DeadlineOverflow),
            )?,
            Deadline::Absolute(at) if at <= now => {
                return Err(SchedError::MalformedDescriptor(
                    DescriptorFault::DeadlineInPast,
                ))
            }
            Deadline::Absolute(at) => at,
        };

        let present = self.retired.get(&tid).is_some_and(|r| r.contains(&id))
            || self.threads.get(&tid).is_some_and(|j| j.contains(id));
        if present {
            return Err(SchedError::DuplicateId { tid, job: id });
        }
        let jobs = self.threads.entry(tid).or_default();

        let seq = self.next_seq;
        self.next_seq += 1;
        jobs.pending.push_back(Job {
            id,
            owner: tid,
            budget: reservation.budget,
            deadline,
            submitted_at: now,
            seq,
            state: JobState::Pending,
        });
        Ok(seq)
    }

    /// Cancel a Pending job.
    ///
    /// Running, finished and never-submitted ids all yield `UnknownJob`.
    pub fn cancel(&mut self, tid: ThreadId, id: JobId) -> Result<Job, SchedError> {
        let unknown = SchedError::UnknownJob { tid, job: id };
        let jobs = self.threads.get_mut(&tid).ok_or(unknown)?;
        let idx = jobs
            .pending
            .iter()
            .position(|j| j.id == id)
            .ok_or(unknown)?;
        let mut job = jobs.pending.remove(idx).ok_or(unknown)?;
        job.state = JobState::Cancelled;
        self.retire(tid, id);
        Ok(job)
    }

    /// Pending job of `tid` with the earliest deadline (submission order on ties).
    pub fn earliest_ready(&self, tid: ThreadId) -> Option<&Job> {
        self.threads
            .get(&tid)?
            .pending
            .iter()
            .min_by_key(|j| j.edf_key())
    }

    /// Move a Pending job to Running.
    ///
    /// Returns `None` if the job is not pending or the thread already started
    /// one.
    pub fn start(&mut self, tid: ThreadId, id: JobId) -> Option<&Job> {
        let jobs = self.threads.get_mut(&tid)?;
        if jobs.started().is_some() {
            return None;
        }
        let idx = jobs.pending.iter().position(|j| j.id == id)?;
        let mut job = jobs.pending.remove(idx)?;
        job.state = JobState::Running;
        jobs.running = Some(job);
        jobs.running.as_ref()
    }

    /// Take the Running job of `tid` off the core; it waits as Blocked.
    pub fn block(&mut self, tid: ThreadId) -> Option<&Job> {
        let jobs = self.threads.get_mut(&tid)?;
        let mut job = jobs.running.take()?;
        job.state = JobState::Blocked;
        jobs.blocked = Some(job);
        jobs.blocked.as_ref()
    }

    /// Dispatch the Blocked job of `tid` again.
    pub fn unblock(&mut self, tid: ThreadId) -> Option<&Job> {
        let jobs = self.threads.get_mut(&tid)?;
        let mut job = jobs.blocked.take()?;
        job.state = JobState::Running;
        jobs.running = Some(job);
        jobs.running.as_ref()
    }

    /// Remove the started job of `tid`, Running or Blocked, stamping it with a
    /// terminal state.
    pub fn finish(&mut self, tid: ThreadId, state: JobState) -> Option<Job> {
        debug_assert!(matches!(
            state,
            JobState::Completed | JobState::Missed | JobState::Cancelled
        ));
        let jobs = self.threads.get_mut(&tid)?;
        let mut job = jobs.running.take().or_else(|| jobs.blocked.take())?;
        job.state = state;
        self.retire(tid, job.id);
        Some(job)
    }

    /// Drop Pending jobs of `tid` whose deadline is at or before `now`.
    pub fn expire(&mut self, tid: ThreadId, now: Instant) -> Vec<Job> {
        let Some(jobs) = self.threads.get_mut(&tid) else {
            return Vec::new();
        };
        let mut expired = Vec::new();
        jobs.pending.retain(|j| {
            if j.deadline <= now {
                let mut j = j.clone();
                j.state = JobState::Missed;
                expired.push(j);
                false
            } else {
                true
            }
        });
        for job in &expired {
            self.retire(tid, job.id);
        }
        self.prune(tid);
        expired
    }

    /// Drop every job of an exiting thread; all become Cancelled. Its
    /// retired ids are forgotten with it.
    pub fn remove_thread(&mut self, tid: ThreadId) -> Vec<Job> {
        self.retired.remove(&tid);
        let Some(jobs) = self.threads.remove(&tid) else {
            return Vec::new();
        };
        jobs.running
            .into_iter()
            .chain(jobs.blocked)
            .chain(jobs.pending)
            .map(|mut j| {
                j.state = JobState::Cancelled;
                j
            })
            .collect()
    }

    /// Job of `tid` on the core.
    #[inline]
    pub fn running(&self, tid: ThreadId) -> Option<&Job> {
        self.threads.get(&tid)?.running.as_ref()
    }

    /// Job of `tid` waiting to be dispatched again after a block.
    #[inline]
    pub fn blocked(&self, tid: ThreadId) -> Option<&Job> {
        self.threads.get(&tid)?.blocked.as_ref()
    }

    /// Started job of `tid`, Running or Blocked.
    #[inline]
    pub fn started(&self, tid: ThreadId) -> Option<&Job> {
        self.threads.get(&tid)?.started()
    }

    /// Number of Running jobs in the table.
    pub fn running_count(&self) -> usize {
        self.threads.values().filter(|j| j.running.is_some()).count()
    }

    #[inline]
    pub fn has_pending(&self, tid: ThreadId) -> bool {
        self.threads.get(&tid).is_some_and(|j| !j.pending.is_empty())
    }

    #[inline]
    pub fn pending_len(&self, tid: ThreadId) -> usize {
        self.threads.get(&tid).map_or(0, |j| j.pending.len())
    }

    /// Pending jobs of `tid` in submission order.
    pub fn pending(&self, tid: ThreadId) -> impl Iterator<Item = &Job> {
        self.threads
            .get(&tid)
            .into_iter()
            .flat_map(|j| j.pending.iter())
    }

    /// Threads with at least one job.
    pub fn threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.threads.keys().copied()
    }

    /// Total Pending jobs across all threads.
    pub fn total_pending(&self) -> usize {
        self.threads.values().map(|j| j.pending.len()).sum()
    }

    fn retire(&mut self, tid: ThreadId, id: JobId) {
        self.retired.entry(tid).or_default().insert(id);
        self.prune(tid);
    }

    fn prune(&mut self, tid: ThreadId) {
        if self.threads.get(&tid).is_some_and(ThreadJobs::is_empty) {
            self.threads.remove(&tid);
        }
    }
}
