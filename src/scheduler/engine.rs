//! Single-core EDF decision engine.
//!
//! # Model
//!
//! One logical core is handed to one thread at a time. A thread *competes*
//! for the core when it is parked in `next()` with pending work, or when it
//! resumed from a block and still owns its Blocked job. Selection happens
//! only while the core is free; a thread holding the core is never preempted.
//!
//! ```text
//!   Outside ──fetch──► Waiting ──select──► OnCore ──fetch──► Waiting
//!                                           │  ▲
//!                                   suspend │  │ select (continue job)
//!                                           ▼  │
//!                                      Suspended ──resume──► Ready
//! ```
//!
//! # Selection tiers
//!
//! | Tier | Class     | Order                                   |
//! |------|-----------|-----------------------------------------|
//! | 0    | Atlas     | deadline, submission seq, tid           |
//! | 1    | Recover   | deadline, submission seq, tid           |
//! | 2    | Timeshare | round robin (longest waiting first)     |
//!
//! # Invariants
//!
//! - At most one thread is `OnCore`, and `on_core` names it.
//! - At most one job in the table is Running, and it belongs to the `OnCore`
//!   thread. An `OnCore` thread owns exactly that job.
//! - Suspending takes the job off the core as Blocked. A Blocked job's owner
//!   is `Suspended` or `Ready`; it becomes Running again only when selected.
//! - A thread is `Suspended` exactly while the blocking monitor has an open
//!   span for it.
//! - Budget exhaustion never preempts; only a deadline ends a job without
//!   the owner's cooperation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::api::{ExecutionClass, Job, JobId, JobState, Reservation, ThreadId};
use crate::error::SchedError;

use super::blocking::BlockingMonitor;
use super::class::{ClassController, ClassEvent};
use super::job_table::JobTable;
use super::trace::{SchedEvent, SchedEventKind, SchedStats, TraceRing};

/// Where a thread is relative to the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Activity {
    /// Executing outside the scheduler's control (not in `next()`, no core).
    Outside,
    /// Parked in `next()`.
    Waiting,
    /// Holds the core.
    OnCore,
    /// Suspended while owning a job or the core.
    Suspended,
    /// Resumed with its Blocked job unfinished; wants the core back.
    Ready,
}

/// Snapshot of one thread's scheduling state.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ThreadStatus {
    pub tid: ThreadId,
    pub class: ExecutionClass,
    pub activity: Activity,
    /// Running job; only the thread holding the core has one.
    pub current_job: Option<JobId>,
    /// Job waiting to be dispatched again after a block.
    pub blocked_job: Option<JobId>,
    pub consumed_in_current: Duration,
    pub accumulated_block_time: Duration,
    /// Total length of completed suspension spans.
    pub blocked_time: Duration,
    pub pending: usize,
    pub cpu_time: Duration,
}

#[derive(Debug)]
struct ThreadEntity {
    controller: ClassController,
    activity: Activity,
    consumed_in_current: Duration,
    budget_exhausted: bool,
    /// Round-robin stamp, refreshed whenever the thread starts competing.
    queued_at: u64,
    cpu_time: Duration,
}

impl ThreadEntity {
    fn new() -> Self {
        Self {
            controller: ClassController::new(),
            activity: Activity::Outside,
            consumed_in_current: Duration::ZERO,
            budget_exhausted: false,
            queued_at: 0,
            cpu_time: Duration::ZERO,
        }
    }
}

/// Candidate for the core.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    tid: ThreadId,
    job: JobId,
    tier: u8,
    key: (Instant, u64, ThreadId),
    queued_at: u64,
    /// Continue a Blocked job rather than start a Pending one.
    resume: bool,
}

/// The EDF engine and all per-thread scheduling state.
///
/// Every method takes `now` explicitly; callers own the clock and the lock.
#[derive(Debug)]
pub struct SchedulerCore {
    jobs: JobTable,
    threads: BTreeMap<ThreadId, ThreadEntity>,
    blocking: BlockingMonitor,
    on_core: Option<ThreadId>,
    last_charge: Instant,
    next_stamp: u64,
    epoch: Instant,
    trace: TraceRing,
    stats: SchedStats,
}

impl SchedulerCore {
    pub fn new(epoch: Instant, trace_capacity: usize) -> Self {
        Self {
            jobs: JobTable::new(),
            threads: BTreeMap::new(),
            blocking: BlockingMonitor::new(),
            on_core: None,
            last_charge: epoch,
            next_stamp: 0,
            epoch,
            trace: TraceRing::new(trace_capacity),
            stats: SchedStats::default(),
        }
    }

    // ========================================================================
    // Protocol operations
    // ========================================================================

    /// Admit a job for `tid`. Does not select; callers run a decision point.
    pub fn submit(
        &mut self,
        tid: ThreadId,
        job: JobId,
        reservation: Reservation,
        now: Instant,
    ) -> Result<(), SchedError> {
        self.jobs.insert(tid, job, reservation, now)?;
        self.entity(tid);
        self.stats.submitted += 1;
        self.record(now, SchedEventKind::Submitted { tid, job });
        self.class_event(tid, ClassEvent::Submitted, now);
        Ok(())
    }

    /// Cancel a Pending job of `tid`.
    pub fn cancel(&mut self, tid: ThreadId, job: JobId, now: Instant) -> Result<(), SchedError> {
        self.jobs.cancel(tid, job)?;
        self.stats.cancelled += 1;
        self.record(now, SchedEventKind::Cancelled { tid, job });
        if !self.has_work(tid) {
            self.class_event(tid, ClassEvent::Drained, now);
        }
        Ok(())
    }

    /// `tid` entered `next()`: complete its current job and park it.
    pub fn fetch(&mut self, tid: ThreadId, now: Instant) {
        self.entity(tid);
        if let Some(job) = self.jobs.finish(tid, JobState::Completed) {
            let consumed = self.release(tid);
            self.stats.completed += 1;
            self.record(
                now,
                SchedEventKind::Completed {
                    tid,
                    job: job.id,
                    consumed_us: micros(consumed),
                },
            );
            self.class_event(tid, ClassEvent::JobFinished, now);
        } else {
            self.class_event(tid, ClassEvent::Fetch, now);
        }
        self.blocking.on_resume(tid, now);
        self.park(tid);
    }

    /// Re-park a thread that is still inside `next()` but lost its dispatch
    /// (the job missed its deadline before the thread observed it).
    ///
    /// Returns `false` if the thread no longer exists.
    pub fn ensure_waiting(&mut self, tid: ThreadId) -> bool {
        match self.threads.get(&tid).map(|e| e.activity) {
            None => false,
            Some(Activity::Outside) => {
                self.park(tid);
                true
            }
            Some(_) => true,
        }
    }

    /// `tid` left `next()` without a job (terminal interruption).
    pub fn abandon_wait(&mut self, tid: ThreadId) {
        if let Some(e) = self.threads.get_mut(&tid) {
            if e.activity == Activity::Waiting {
                e.activity = Activity::Outside;
            }
        }
    }

    /// Job dispatched to `tid`, if it holds the core.
    pub fn assignment(&self, tid: ThreadId) -> Option<JobId> {
        if self.on_core != Some(tid) {
            return None;
        }
        self.jobs.running(tid).map(|j| j.id)
    }

    /// `tid` voluntarily suspended.
    ///
    /// Its Running job waits as Blocked and the core is released for the next
    /// decision point. With budget left this is a block: the remainder
    /// becomes block credit.
    pub fn suspend(&mut self, tid: ThreadId, now: Instant) {
        let Some(activity) = self.threads.get(&tid).map(|e| e.activity) else {
            return;
        };
        if matches!(activity, Activity::Suspended | Activity::Waiting) {
            return;
        }
        let consumed = self
            .threads
            .get(&tid)
            .map_or(Duration::ZERO, |e| e.consumed_in_current);
        let report = self
            .blocking
            .on_suspend(tid, self.jobs.running(tid), consumed, now);
        self.jobs.block(tid);
        if self.on_core == Some(tid) {
            self.on_core = None;
        }
        if let Some(e) = self.threads.get_mut(&tid) {
            e.activity = Activity::Suspended;
        }
        if let Some(report) = report {
            self.stats.blocks += 1;
            log::debug!(
                "{tid} blocked in {} with {:?} unconsumed",
                report.job,
                report.unconsumed
            );
            self.record(
                now,
                SchedEventKind::Blocked {
                    tid,
                    job: report.job,
                    unconsumed_us: micros(report.unconsumed),
                },
            );
            self.class_event(
                tid,
                ClassEvent::Blocked {
                    unconsumed: report.unconsumed,
                },
                now,
            );
        }
    }

    /// `tid` resumed after a suspension.
    pub fn resume(&mut self, tid: ThreadId, now: Instant) {
        let Some(span) = self.blocking.on_resume(tid, now) else {
            return;
        };
        let has_job = self.jobs.blocked(tid).is_some();
        let stamp = self.stamp();
        if let Some(e) = self.threads.get_mut(&tid) {
            if has_job {
                e.activity = Activity::Ready;
                e.queued_at = stamp;
            } else {
                e.activity = Activity::Outside;
            }
        }
        self.record(
            now,
            SchedEventKind::Resumed {
                tid,
                blocked_us: micros(span),
            },
        );
    }

    /// The thread terminated: drop its jobs and release the core.
    pub fn exit_thread(&mut self, tid: ThreadId, now: Instant) {
        if self.threads.remove(&tid).is_none() {
            return;
        }
        for job in self.jobs.remove_thread(tid) {
            self.stats.cancelled += 1;
            self.record(now, SchedEventKind::Cancelled { tid, job: job.id });
        }
        if self.on_core == Some(tid) {
            self.on_core = None;
        }
        self.blocking.forget(tid);
        self.record(now, SchedEventKind::Exited { tid });
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Account CPU time, detect deadline misses and reached reservation
    /// windows up to `now`.
    pub fn advance(&mut self, now: Instant) {
        self.charge(now);

        let tids: Vec<ThreadId> = self.threads.keys().copied().collect();
        for tid in tids {
            self.check_running_deadline(tid, now);
            self.expire_pending(tid, now);
            self.check_window(tid, now);
        }
    }

    /// Earliest instant at which `advance` could change anything.
    pub fn next_timer(&self) -> Option<Instant> {
        let mut next: Option<Instant> = None;
        let mut consider = |t: Instant| next = Some(next.map_or(t, |n| n.min(t)));

        for (&tid, e) in &self.threads {
            if let Some(job) = self.jobs.started(tid) {
                consider(job.deadline);
                if self.on_core == Some(tid) && !e.budget_exhausted {
                    let left = job.budget.saturating_sub(e.consumed_in_current);
                    consider(self.last_charge + left);
                }
            }
            for job in self.jobs.pending(tid) {
                consider(job.deadline);
            }
            if matches!(
                e.controller.class(),
                ExecutionClass::Timeshare | ExecutionClass::Recover
            ) && self.jobs.started(tid).is_none()
            {
                if let Some(job) = self.jobs.earliest_ready(tid) {
                    consider(job.window_start());
                }
            }
        }
        next
    }

    fn charge(&mut self, now: Instant) {
        let delta = now.saturating_duration_since(self.last_charge);
        self.last_charge = self.last_charge.max(now);
        let Some(tid) = self.on_core else {
            return;
        };
        if delta.is_zero() {
            return;
        }
        let Some((job, budget)) = self.jobs.running(tid).map(|j| (j.id, j.budget)) else {
            return;
        };
        let Some(e) = self.threads.get_mut(&tid) else {
            return;
        };
        e.consumed_in_current += delta;
        e.cpu_time += delta;
        if e.controller.class() == ExecutionClass::Recover {
            e.controller.absorb(delta);
        }
        if !e.budget_exhausted && e.consumed_in_current >= budget {
            e.budget_exhausted = true;
            log::debug!("{tid} exhausted the budget of {job}");
            self.record(now, SchedEventKind::BudgetExhausted { tid, job });
        }
    }

    fn check_running_deadline(&mut self, tid: ThreadId, now: Instant) {
        let due = self.jobs.started(tid).is_some_and(|j| j.deadline <= now);
        if !due {
            return;
        }
        let Some(job) = self.jobs.finish(tid, JobState::Missed) else {
            return;
        };
        let consumed = self
            .threads
            .get(&tid)
            .map_or(Duration::ZERO, |e| e.consumed_in_current);
        let was_on_core = self.on_core == Some(tid);
        self.release(tid);
        if let Some(e) = self.threads.get_mut(&tid) {
            // A suspended thread stays asleep; everyone else keeps executing
            // best-effort without a reservation.
            if e.activity != Activity::Suspended {
                e.activity = Activity::Outside;
            }
        }
        self.stats.missed += 1;
        log::warn!(
            "{tid} missed the deadline of {} after {consumed:?} (on core: {was_on_core})",
            job.id
        );
        self.record(
            now,
            SchedEventKind::Missed {
                tid,
                job: job.id,
                consumed_us: micros(consumed),
            },
        );
        self.class_event(tid, ClassEvent::DeadlineMissed, now);
    }

    fn expire_pending(&mut self, tid: ThreadId, now: Instant) {
        let expired = self.jobs.expire(tid, now);
        if expired.is_empty() {
            return;
        }
        for job in &expired {
            self.stats.expired += 1;
            log::warn!("{tid}: {} expired before dispatch", job.id);
            self.record(now, SchedEventKind::Expired { tid, job: job.id });
        }
        if !self.has_work(tid) {
            self.class_event(tid, ClassEvent::Drained, now);
        }
    }

    fn check_window(&mut self, tid: ThreadId, now: Instant) {
        let Some(e) = self.threads.get(&tid) else {
            return;
        };
        if !matches!(
            e.controller.class(),
            ExecutionClass::Timeshare | ExecutionClass::Recover
        ) || self.jobs.started(tid).is_some()
        {
            return;
        }
        let reached = self
            .jobs
            .earliest_ready(tid)
            .is_some_and(|j| j.window_start() <= now);
        if reached {
            self.class_event(tid, ClassEvent::WindowReached, now);
        }
    }

    // ========================================================================
    // Selection
    // ========================================================================

    /// Hand the core to the best candidate, if the core is free.
    ///
    /// Returns the dispatched `(thread, job)`.
    pub fn select_next(&mut self, now: Instant) -> Option<(ThreadId, JobId)> {
        if self.on_core.is_some() {
            return None;
        }
        self.charge(now);

        let best = self
            .candidates()
            .min_by(|a, b| {
                a.tier.cmp(&b.tier).then_with(|| {
                    if a.tier == 2 {
                        (a.queued_at, a.tid).cmp(&(b.queued_at, b.tid))
                    } else {
                        a.key.cmp(&b.key)
                    }
                })
            })?;

        let started = if best.resume {
            self.jobs.unblock(best.tid).is_some()
        } else {
            self.jobs.start(best.tid, best.job).is_some()
        };
        debug_assert!(started, "selected job must be pending or blocked");
        if !started {
            return None;
        }
        let Some(e) = self.threads.get_mut(&best.tid) else {
            return None;
        };
        if !best.resume {
            e.consumed_in_current = Duration::ZERO;
            e.budget_exhausted = false;
        }
        e.activity = Activity::OnCore;
        let class = e.controller.class();
        self.on_core = Some(best.tid);
        self.stats.dispatched += 1;
        log::debug!("dispatch {} of {} as {class}", best.job, best.tid);
        self.record(
            now,
            SchedEventKind::Dispatched {
                tid: best.tid,
                job: best.job,
                class,
            },
        );
        Some((best.tid, best.job))
    }

    fn candidates(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.threads.iter().filter_map(move |(&tid, e)| {
            let tier = e.controller.class().tier()?;
            let (job, resume): (&Job, bool) = match e.activity {
                Activity::Waiting => (self.jobs.earliest_ready(tid)?, false),
                Activity::Ready => (self.jobs.blocked(tid)?, true),
                _ => return None,
            };
            Some(Candidate {
                tid,
                job: job.id,
                tier,
                key: (job.deadline, job.seq, tid),
                queued_at: e.queued_at,
                resume,
            })
        })
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[inline]
    pub fn on_core(&self) -> Option<ThreadId> {
        self.on_core
    }

    /// Started job of `tid`: Running on the core or Blocked.
    #[inline]
    pub fn started(&self, tid: ThreadId) -> Option<&Job> {
        self.jobs.started(tid)
    }

    pub fn status(&self, tid: ThreadId) -> Option<ThreadStatus> {
        let e = self.threads.get(&tid)?;
        Some(ThreadStatus {
            tid,
            class: e.controller.class(),
            activity: e.activity,
            current_job: self.jobs.running(tid).map(|j| j.id),
            blocked_job: self.jobs.blocked(tid).map(|j| j.id),
            consumed_in_current: e.consumed_in_current,
            accumulated_block_time: e.controller.block_credit(),
            blocked_time: self.blocking.blocked_total(tid),
            pending: self.jobs.pending_len(tid),
            cpu_time: e.cpu_time,
        })
    }

    /// Whether no thread owns any job.
    pub fn is_quiescent(&self) -> bool {
        self.on_core.is_none() && self.jobs.threads().next().is_none()
    }

    #[inline]
    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    #[inline]
    pub fn trace(&self) -> &TraceRing {
        &self.trace
    }

    #[inline]
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Verify the structural invariants listed in the module docs.
    pub fn check_invariants(&self) -> Result<(), String> {
        let on_core: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|(_, e)| e.activity == Activity::OnCore)
            .map(|(&t, _)| t)
            .collect();
        if on_core.len() > 1 {
            return Err(format!("multiple threads on core: {on_core:?}"));
        }
        if on_core.first().copied() != self.on_core {
            return Err(format!(
                "on_core {:?} disagrees with thread states {on_core:?}",
                self.on_core
            ));
        }
        if let Some(tid) = self.on_core {
            if self.jobs.running(tid).is_none() {
                return Err(format!("{tid} holds the core without a running job"));
            }
        }
        let running = self.jobs.running_count();
        if running > 1 {
            return Err(format!("{running} jobs are running on one core"));
        }
        for (&tid, e) in &self.threads {
            let suspended = e.activity == Activity::Suspended;
            if suspended != self.blocking.is_suspended(tid) {
                return Err(format!(
                    "{tid} is {:?} but the blocking monitor disagrees",
                    e.activity
                ));
            }
        }
        for tid in self.jobs.threads() {
            let Some(e) = self.threads.get(&tid) else {
                return Err(format!("jobs owned by unknown thread {tid}"));
            };
            if self.jobs.running(tid).is_some() && self.on_core != Some(tid) {
                return Err(format!(
                    "{tid} owns a running job while {:?}",
                    e.activity
                ));
            }
            if self.jobs.blocked(tid).is_some()
                && !matches!(e.activity, Activity::Suspended | Activity::Ready)
            {
                return Err(format!(
                    "{tid} owns a blocked job while {:?}",
                    e.activity
                ));
            }
            if e.controller.class() == ExecutionClass::Idle {
                return Err(format!("{tid} is idle but owns jobs"));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn entity(&mut self, tid: ThreadId) -> &mut ThreadEntity {
        self.threads.entry(tid).or_insert_with(ThreadEntity::new)
    }

    fn has_work(&self, tid: ThreadId) -> bool {
        self.jobs.has_pending(tid) || self.jobs.started(tid).is_some()
    }

    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    fn park(&mut self, tid: ThreadId) {
        let stamp = self.stamp();
        let e = self.entity(tid);
        e.activity = Activity::Waiting;
        e.queued_at = stamp;
    }

    /// Clear per-job accounting of `tid` and free the core if it held it.
    /// Returns the consumption of the job that ended.
    fn release(&mut self, tid: ThreadId) -> Duration {
        if self.on_core == Some(tid) {
            self.on_core = None;
        }
        let Some(e) = self.threads.get_mut(&tid) else {
            return Duration::ZERO;
        };
        let consumed = std::mem::take(&mut e.consumed_in_current);
        e.budget_exhausted = false;
        if e.activity == Activity::OnCore {
            e.activity = Activity::Outside;
        }
        consumed
    }

    fn class_event(&mut self, tid: ThreadId, event: ClassEvent, now: Instant) {
        let has_work = self.has_work(tid);
        let Some(e) = self.threads.get_mut(&tid) else {
            return;
        };
        if let Some(t) = e.controller.on_event(event, has_work) {
            self.stats.class_changes += 1;
            log::info!("{tid}: {} -> {} on {event:?}", t.from, t.to);
            self.record(
                now,
                SchedEventKind::ClassChanged {
                    tid,
                    from: t.from,
                    to: t.to,
                },
            );
        }
    }

    fn record(&mut self, now: Instant, kind: SchedEventKind) {
        self.trace.push(SchedEvent {
            at_us: micros(now.saturating_duration_since(self.epoch)),
            kind,
        });
    }
}

#[inline]
fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PROPTEST_CASES: u32 = 64;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn tid(n: u64) -> ThreadId {
        ThreadId::from_raw(n)
    }

    fn rel(budget_ms: u64, deadline_ms: u64) -> Reservation {
        Reservation::relative(ms(budget_ms), ms(deadline_ms))
    }

    fn core() -> (SchedulerCore, Instant) {
        let t0 = Instant::now();
        (SchedulerCore::new(t0, 256), t0)
    }

    #[test]
    fn submit_then_fetch_dispatches() {
        let (mut c, t0) = core();
        c.submit(tid(2), JobId(1), rel(1000, 1200), t0).unwrap();
        c.fetch(tid(2), t0);
        assert_eq!(c.select_next(t0), Some((tid(2), JobId(1))));
        assert_eq!(c.assignment(tid(2)), Some(JobId(1)));
        c.check_invariants().unwrap();

        c.advance(t0 + ms(700));
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.consumed_in_current, ms(700));
        assert!(st.consumed_in_current <= ms(1000));

        c.fetch(tid(2), t0 + ms(700));
        assert_eq!(c.on_core(), None);
        assert_eq!(c.status(tid(2)).unwrap().class, ExecutionClass::Idle);
        assert_eq!(c.stats().completed, 1);
    }

    #[test]
    fn reverse_order_submission_runs_earlier_deadline_first() {
        let (mut c, t0) = core();
        c.fetch(tid(2), t0);
        c.fetch(tid(3), t0);
        c.submit(tid(2), JobId(1), rel(1000, 3000), t0).unwrap();
        c.submit(tid(3), JobId(2), rel(1000, 2500), t0).unwrap();
        assert_eq!(c.select_next(t0), Some((tid(3), JobId(2))));
        // Non-preemptive: nothing else is selected while the core is held.
        assert_eq!(c.select_next(t0), None);
        c.fetch(tid(3), t0 + ms(1000));
        assert_eq!(c.select_next(t0 + ms(1000)), Some((tid(2), JobId(1))));
    }

    #[test]
    fn edf_tie_breaks_by_submission_then_tid() {
        let (mut c, t0) = core();
        c.fetch(tid(5), t0);
        c.fetch(tid(4), t0);
        let d = Reservation::absolute(ms(10), t0 + ms(100));
        c.submit(tid(5), JobId(1), d, t0).unwrap();
        c.submit(tid(4), JobId(1), d, t0).unwrap();
        assert_eq!(c.select_next(t0).map(|s| s.0), Some(tid(5)));
    }

    #[test]
    fn block_credits_remainder_and_hands_over_core() {
        let (mut c, t0) = core();
        c.fetch(tid(2), t0);
        c.fetch(tid(3), t0);
        c.submit(tid(2), JobId(1), rel(1000, 1200), t0).unwrap();
        c.submit(tid(3), JobId(2), rel(1000, 2300), t0).unwrap();
        assert_eq!(c.select_next(t0), Some((tid(2), JobId(1))));

        let t1 = t0 + ms(500);
        c.advance(t1);
        c.suspend(tid(2), t1);
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.class, ExecutionClass::Recover);
        assert_eq!(st.accumulated_block_time, ms(500));
        assert_eq!(st.current_job, None);
        assert_eq!(st.blocked_job, Some(JobId(1)));
        assert_eq!(c.select_next(t1), Some((tid(3), JobId(2))));
        c.check_invariants().unwrap();

        // Resumes while thread 3 holds the core.
        let t2 = t0 + ms(800);
        c.advance(t2);
        c.resume(tid(2), t2);
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.activity, Activity::Ready);
        assert_eq!(st.blocked_time, ms(300));
        assert_eq!(c.select_next(t2), None);

        let t3 = t0 + ms(900);
        c.advance(t3);
        c.fetch(tid(3), t3);
        assert_eq!(c.select_next(t3), Some((tid(2), JobId(1))));

        let t4 = t0 + ms(1100);
        c.advance(t4);
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.consumed_in_current, ms(700));
        assert_eq!(st.accumulated_block_time, ms(300));
        c.fetch(tid(2), t4);
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.class, ExecutionClass::Idle);
        assert_eq!(st.cpu_time, ms(700));
        c.check_invariants().unwrap();
    }

    #[test]
    fn blocked_job_is_not_running_while_another_holds_the_core() {
        let (mut c, t0) = core();
        c.fetch(tid(2), t0);
        c.fetch(tid(3), t0);
        c.submit(tid(2), JobId(1), rel(1000, 1200), t0).unwrap();
        c.submit(tid(3), JobId(2), rel(1000, 2300), t0).unwrap();
        c.select_next(t0);

        c.suspend(tid(2), t0 + ms(100));
        assert_eq!(c.select_next(t0 + ms(100)), Some((tid(3), JobId(2))));

        let a = c.status(tid(2)).unwrap();
        let b = c.status(tid(3)).unwrap();
        assert_eq!(a.current_job, None);
        assert_eq!(a.blocked_job, Some(JobId(1)));
        assert_eq!(b.current_job, Some(JobId(2)));
        assert_eq!(c.jobs.running_count(), 1);
        assert_eq!(c.started(tid(2)).map(|j| j.state), Some(JobState::Blocked));
        c.check_invariants().unwrap();

        // The blocked job still misses its deadline while off the core.
        c.advance(t0 + ms(1200));
        let a = c.status(tid(2)).unwrap();
        assert_eq!(a.blocked_job, None);
        assert_eq!(c.stats().missed, 1);
        assert_eq!(c.on_core(), Some(tid(3)));
        c.check_invariants().unwrap();
    }

    #[test]
    fn overrun_demotes_to_timeshare_until_window() {
        let (mut c, t0) = core();
        c.submit(tid(2), JobId(1), rel(1000, 1500), t0).unwrap();
        c.submit(tid(2), JobId(2), rel(1000, 3500), t0).unwrap();
        c.fetch(tid(2), t0);
        assert_eq!(c.select_next(t0), Some((tid(2), JobId(1))));

        c.advance(t0 + ms(1500));
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.class, ExecutionClass::Timeshare);
        assert_eq!(st.current_job, None);
        assert_eq!(st.activity, Activity::Outside);
        assert_eq!(c.on_core(), None);
        assert_eq!(c.stats().missed, 1);

        c.advance(t0 + ms(2499));
        assert_eq!(c.status(tid(2)).unwrap().class, ExecutionClass::Timeshare);
        c.advance(t0 + ms(2500));
        assert_eq!(c.status(tid(2)).unwrap().class, ExecutionClass::Atlas);
    }

    #[test]
    fn overrun_with_block_credit_goes_to_recover() {
        let (mut c, t0) = core();
        c.submit(tid(2), JobId(1), rel(2000, 2500), t0).unwrap();
        c.submit(tid(2), JobId(2), rel(2000, 5500), t0).unwrap();
        c.fetch(tid(2), t0);
        c.select_next(t0);

        c.suspend(tid(2), t0);
        let t1 = t0 + ms(1500);
        c.advance(t1);
        c.resume(tid(2), t1);
        assert_eq!(c.select_next(t1), Some((tid(2), JobId(1))));

        c.advance(t0 + ms(2500));
        let st = c.status(tid(2)).unwrap();
        assert_eq!(st.class, ExecutionClass::Recover);
        assert_eq!(st.accumulated_block_time, ms(1000));

        c.advance(t0 + ms(3500));
        assert_eq!(c.status(tid(2)).unwrap().class, ExecutionClass::Atlas);
    }

    #[test]
    fn budget_exhaustion_does_not_preempt() {
        let (mut c, t0) = core();
        c.fetch(tid(2), t0);
        c.fetch(tid(3), t0);
        c.submit(tid(2), JobId(1), rel(100, 1000), t0).unwrap();
        c.submit(tid(3), JobId(1), rel(100, 2000), t0).unwrap();
        c.select_next(t0);
        c.advance(t0 + ms(300));
        assert_eq!(c.on_core(), Some(tid(2)));
        assert_eq!(c.select_next(t0 + ms(300)), None);
        assert!(c
            .trace()
            .dump()
            .iter()
            .any(|e| matches!(e.kind, SchedEventKind::BudgetExhausted { .. })));
    }

    #[test]
    fn timeshare_tier_runs_only_without_atlas_work() {
        let (mut c, t0) = core();
        // Thread 2 overruns into Timeshare with a far future job left.
        c.submit(tid(2), JobId(1), rel(10, 100), t0).unwrap();
        c.submit(tid(2), JobId(2), rel(10, 10_000), t0).unwrap();
        c.fetch(tid(2), t0);
        c.select_next(t0);
        let t1 = t0 + ms(100);
        c.advance(t1);
        c.fetch(tid(2), t1);
        assert_eq!(c.status(tid(2)).unwrap().class, ExecutionClass::Timeshare);

        c.fetch(tid(3), t1);
        c.submit(tid(3), JobId(7), rel(10, 5000), t1).unwrap();
        assert_eq!(c.select_next(t1), Some((tid(3), JobId(7))));
        c.fetch(tid(3), t1 + ms(10));
        let pick = c.select_next(t1 + ms(10)).unwrap();
        assert_eq!(pick, (tid(2), JobId(2)));
        let dispatched_as = c.trace().dump().into_iter().rev().find_map(|e| match e.kind {
            SchedEventKind::Dispatched { class, .. } => Some(class),
            _ => None,
        });
        assert_eq!(dispatched_as, Some(ExecutionClass::Timeshare));
    }

    #[test]
    fn pending_expiry_drains_thread() {
        let (mut c, t0) = core();
        c.submit(tid(2), JobId(1), rel(10, 50), t0).unwrap();
        c.advance(t0 + ms(60));
        assert_eq!(c.status(tid(2)).unwrap().class, ExecutionClass::Idle);
        assert_eq!(c.stats().expired, 1);
        assert!(c.is_quiescent());
    }

    #[test]
    fn exit_releases_core_and_cancels_jobs() {
        let (mut c, t0) = core();
        c.fetch(tid(2), t0);
        c.fetch(tid(3), t0);
        c.submit(tid(2), JobId(1), rel(10, 50), t0).unwrap();
        c.submit(tid(2), JobId(2), rel(10, 60), t0).unwrap();
        c.submit(tid(3), JobId(1), rel(10, 80), t0).unwrap();
        c.select_next(t0);
        c.exit_thread(tid(2), t0);
        assert_eq!(c.on_core(), None);
        assert_eq!(c.stats().cancelled, 2);
        assert_eq!(c.select_next(t0), Some((tid(3), JobId(1))));
        assert!(c.status(tid(2)).is_none());
    }

    #[test]
    fn next_timer_tracks_deadlines_and_windows() {
        let (mut c, t0) = core();
        assert_eq!(c.next_timer(), None);
        c.submit(tid(2), JobId(1), rel(100, 500), t0).unwrap();
        c.fetch(tid(2), t0);
        c.select_next(t0);
        // Budget exhaustion comes before the deadline.
        assert_eq!(c.next_timer(), Some(t0 + ms(100)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(
            crate::test_utils::proptest_cases(PROPTEST_CASES)
        ))]

        /// Every dispatch of a fresh job picks the globally earliest deadline
        /// among the Atlas threads waiting at that decision point.
        #[test]
        fn dispatch_is_edf_among_waiters(
            jobs in proptest::collection::vec((0u64..4, 10u64..400), 1..24)
        ) {
            let (mut c, t0) = core();
            for t in 0..4 {
                c.fetch(tid(t + 2), t0);
            }
            for (i, (owner, deadline)) in jobs.iter().enumerate() {
                c.submit(tid(owner + 2), JobId(i as u64), rel(1, 1000 + deadline), t0).unwrap();
            }

            let mut now = t0;
            let mut last = None;
            while let Some((t, _)) = c.select_next(now) {
                let running = c.status(t).unwrap();
                prop_assert_eq!(running.class, ExecutionClass::Atlas);
                let dl = jobs[running.current_job.unwrap().0 as usize].1;
                for other in 0..4u64 {
                    if let Some(j) = c.jobs.earliest_ready(tid(other + 2)) {
                        prop_assert!(j.deadline >= t0 + ms(1000 + dl));
                    }
                }
                if let Some(prev) = last {
                    prop_assert!(dl >= prev);
                }
                last = Some(dl);
                now += ms(1);
                c.advance(now);
                c.fetch(t, now);
                c.check_invariants().map_err(TestCaseError::fail)?;
            }
            prop_assert_eq!(c.stats().completed as usize, jobs.len());
        }
    }
}
