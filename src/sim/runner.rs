//! Deterministic scheduler simulation runner and oracles.
//!
//! The runner interprets scenario programs over a [`SchedulerCore`] and a
//! [`ManualClock`], one CPU tick at a time:
//!
//! ```text
//!   advance core ─► wake sleepers ─► settle ─► check invariants ─► run one tick
//!        ▲                                                              │
//!        └──────────────────────── clock += tick ◄──────────────────────┘
//! ```
//!
//! *Settling* repeats until nothing changes: parked threads whose job was
//! dispatched return from `Next`, every runnable thread executes its
//! zero-time instructions up to the next timed one, and the core gets one
//! decision point per round. Instructions issued in the same round therefore
//! reach the core together, as a batch.
//!
//! One tick of CPU goes to the thread holding the core. When the core is
//! free it goes round robin to a best-effort thread (one without a
//! reservation in progress).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::api::{ExecutionClass, JobId, Reservation, ThreadId};
use crate::clock::{Clock, ManualClock};
use crate::config::SchedulerConfig;
use crate::error::{SchedError, SimError};
use crate::scheduler::{
    Activity, LocalRegistry, SchedEvent, SchedEventKind, SchedStats, SchedulerCore,
    ThreadRegistry,
};

use super::program::{Instr, Scenario};

/// Upper bound on settle rounds within one tick.
const SETTLE_LIMIT: usize = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Active,
    /// Inside `Next`.
    Parked,
    Sleeping { until: Instant },
    Done,
}

#[derive(Debug)]
struct SimThread {
    tid: ThreadId,
    state: RunState,
    pc: usize,
    /// Time left on the current `Busy` / `AwaitDeadline`.
    remaining: Option<Duration>,
    /// Deadline of the job most recently returned by `Next`.
    deadline: Option<Instant>,
    cpu: Duration,
    jobs: Vec<JobId>,
}

/// Scheduling state captured by a `Snapshot` instruction.
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotRecord {
    pub thread: String,
    pub label: String,
    pub at_us: u64,
    pub class: ExecutionClass,
    pub activity: Option<Activity>,
    pub current_job: Option<JobId>,
    pub blocked_job: Option<JobId>,
    pub consumed_us: u64,
    pub block_credit_us: u64,
    /// Time spent suspended so far, over completed spans.
    pub blocked_us: u64,
}

/// A protocol call in a program that returned an error.
#[derive(Clone, Debug, Serialize)]
pub struct OpError {
    pub thread: String,
    pub at_us: u64,
    pub instr: Instr,
    pub error: SchedError,
}

#[derive(Clone, Debug, Serialize)]
pub struct ThreadReport {
    pub name: String,
    pub tid: ThreadId,
    /// CPU the thread actually received, reserved or best-effort.
    pub cpu_us: u64,
    /// Jobs returned by `Next`, in order.
    pub jobs: Vec<JobId>,
    pub finished: bool,
}

/// Result of a completed simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct SimOutcome {
    pub scenario: String,
    pub elapsed_us: u64,
    pub threads: Vec<ThreadReport>,
    pub snapshots: Vec<SnapshotRecord>,
    pub op_errors: Vec<OpError>,
    pub stats: SchedStats,
    pub trace: Vec<SchedEvent>,
}

impl SimOutcome {
    pub fn thread(&self, name: &str) -> Option<&ThreadReport> {
        self.threads.iter().find(|t| t.name == name)
    }

    pub fn snapshot(&self, label: &str) -> Option<&SnapshotRecord> {
        self.snapshots.iter().find(|p| p.label == label)
    }

    /// `(thread, job)` in dispatch order. A job resumed after a block
    /// appears once per dispatch.
    pub fn dispatches(&self) -> Vec<(ThreadId, JobId)> {
        self.trace
            .iter()
            .filter_map(|e| match e.kind {
                SchedEventKind::Dispatched { tid, job, .. } => Some((tid, job)),
                _ => None,
            })
            .collect()
    }

    /// `(thread, job, consumed)` of cooperatively completed jobs, in order.
    pub fn completions(&self) -> Vec<(ThreadId, JobId, Duration)> {
        self.trace
            .iter()
            .filter_map(|e| match e.kind {
                SchedEventKind::Completed {
                    tid,
                    job,
                    consumed_us,
                } => Some((tid, job, Duration::from_micros(consumed_us))),
                _ => None,
            })
            .collect()
    }

    /// Class changes of `tid` as `(at_us, to)`.
    pub fn class_changes(&self, tid: ThreadId) -> Vec<(u64, ExecutionClass)> {
        self.trace
            .iter()
            .filter_map(|e| match e.kind {
                SchedEventKind::ClassChanged { tid: t, to, .. } if t == tid => {
                    Some((e.at_us, to))
                }
                _ => None,
            })
            .collect()
    }
}

/// Interprets one scenario to completion.
pub struct SimRunner {
    scenario: Scenario,
    clock: ManualClock,
    core: SchedulerCore,
    registry: LocalRegistry,
    threads: Vec<SimThread>,
    by_tid: BTreeMap<ThreadId, usize>,
    tick: Duration,
    rr_cursor: usize,
    snapshots: Vec<SnapshotRecord>,
    op_errors: Vec<OpError>,
}

impl SimRunner {
    pub fn new(scenario: Scenario, config: &SchedulerConfig) -> Result<Self, SimError> {
        scenario.check().map_err(|message| SimError::BadScenario {
            scenario: scenario.name.clone(),
            message,
        })?;
        let clock = ManualClock::new();
        let core = SchedulerCore::new(clock.epoch(), config.trace_capacity);
        let registry = LocalRegistry::from_config(config);
        let threads: Vec<SimThread> = scenario
            .threads
            .iter()
            .map(|_| SimThread {
                tid: registry.register(),
                state: RunState::Active,
                pc: 0,
                remaining: None,
                deadline: None,
                cpu: Duration::ZERO,
                jobs: Vec::new(),
            })
            .collect();
        let by_tid = threads.iter().enumerate().map(|(i, t)| (t.tid, i)).collect();
        Ok(Self {
            tick: Duration::from_micros(scenario.tick_us),
            scenario,
            clock,
            core,
            registry,
            threads,
            by_tid,
            rr_cursor: 0,
            snapshots: Vec::new(),
            op_errors: Vec::new(),
        })
    }

    /// Run until every thread finished or parked with no work left.
    pub fn run(mut self) -> Result<SimOutcome, SimError> {
        let max = Duration::from_millis(self.scenario.max_ms);
        log::debug!(
            "simulating {} ({} threads, tick {:?})",
            self.scenario.name,
            self.threads.len(),
            self.tick
        );
        loop {
            let now = self.clock.now();
            self.core.advance(now);
            self.wake_sleepers(now);
            self.settle(now)?;
            self.core
                .check_invariants()
                .map_err(|message| self.invariant(message))?;

            if self.finished() {
                return Ok(self.outcome());
            }
            if self.clock.elapsed() >= max {
                return Err(SimError::Timeout {
                    scenario: self.scenario.name.clone(),
                    max_ms: self.scenario.max_ms,
                });
            }

            match self.pick_runner()? {
                Some(idx) => self.run_tick(idx),
                None => {
                    let sleeping = self
                        .threads
                        .iter()
                        .any(|t| matches!(t.state, RunState::Sleeping { .. }));
                    if !sleeping && self.core.next_timer().is_none() {
                        return Err(SimError::Hang {
                            scenario: self.scenario.name.clone(),
                            at_us: self.at_us(now),
                        });
                    }
                }
            }
            self.clock.advance_by(self.tick);
        }
    }

    // ========================================================================
    // Interpretation
    // ========================================================================

    fn wake_sleepers(&mut self, now: Instant) {
        for idx in 0..self.threads.len() {
            if let RunState::Sleeping { until } = self.threads[idx].state {
                if until <= now {
                    self.threads[idx].state = RunState::Active;
                    self.core.resume(self.threads[idx].tid, now);
                }
            }
        }
    }

    fn settle(&mut self, now: Instant) -> Result<(), SimError> {
        for _ in 0..SETTLE_LIMIT {
            let mut progress = false;
            for idx in 0..self.threads.len() {
                progress |= self.step_thread(idx, now);
            }
            if self.core.select_next(now).is_some() {
                progress = true;
            }
            if !progress {
                return Ok(());
            }
        }
        Err(self.invariant(format!("no fixpoint after {SETTLE_LIMIT} settle rounds")))
    }

    /// Execute zero-time instructions of one thread. Returns whether anything
    /// changed.
    fn step_thread(&mut self, idx: usize, now: Instant) -> bool {
        let tid = self.threads[idx].tid;
        let mut progress = false;

        if self.threads[idx].state == RunState::Parked {
            let Some(job) = self.core.assignment(tid) else {
                self.core.ensure_waiting(tid);
                return false;
            };
            let deadline = self.core.started(tid).map(|j| j.deadline);
            let t = &mut self.threads[idx];
            t.jobs.push(job);
            t.deadline = deadline;
            t.state = RunState::Active;
            t.pc += 1;
            progress = true;
        }
        if self.threads[idx].state != RunState::Active {
            return progress;
        }

        loop {
            let pc = self.threads[idx].pc;
            let Some(instr) = self.scenario.threads[idx].code.get(pc).cloned() else {
                self.core.exit_thread(tid, now);
                self.registry.deregister(tid);
                self.threads[idx].state = RunState::Done;
                return true;
            };
            match instr {
                Instr::Submit {
                    target,
                    job,
                    budget_ms,
                    deadline_ms,
                    absolute,
                } => {
                    let budget = Duration::from_millis(budget_ms);
                    let deadline = Duration::from_millis(deadline_ms);
                    let reservation = if absolute {
                        Reservation::absolute(budget, self.clock.epoch() + deadline)
                    } else {
                        Reservation::relative(budget, deadline)
                    };
                    let target = self.threads[target].tid;
                    let res = self
                        .registry
                        .authorize(Some(tid), target)
                        .and_then(|()| self.core.submit(target, JobId(job), reservation, now));
                    self.note_result(idx, now, &instr, res);
                }
                Instr::Remove { target, job } => {
                    let target = self.threads[target].tid;
                    let res = self
                        .registry
                        .authorize(Some(tid), target)
                        .and_then(|()| self.core.cancel(target, JobId(job), now));
                    self.note_result(idx, now, &instr, res);
                }
                Instr::Snapshot { label } => self.snapshot(idx, label, now),
                Instr::Next => {
                    self.core.fetch(tid, now);
                    self.threads[idx].state = RunState::Parked;
                    return true;
                }
                Instr::Block { ms } => {
                    self.core.suspend(tid, now);
                    let t = &mut self.threads[idx];
                    t.state = RunState::Sleeping {
                        until: now + Duration::from_millis(ms),
                    };
                    t.pc += 1;
                    return true;
                }
                Instr::Busy { ms } => {
                    if !self.timed(idx, Duration::from_millis(ms)) {
                        return progress;
                    }
                }
                Instr::AwaitDeadline => {
                    let left = self.threads[idx]
                        .deadline
                        .map_or(Duration::ZERO, |d| d.saturating_duration_since(now));
                    if !self.timed(idx, left) {
                        return progress;
                    }
                }
            }
            self.threads[idx].pc += 1;
            progress = true;
        }
    }

    /// Arm or check a timed instruction. Returns `true` once it has elapsed.
    fn timed(&mut self, idx: usize, span: Duration) -> bool {
        let t = &mut self.threads[idx];
        let remaining = *t.remaining.get_or_insert(span);
        if remaining.is_zero() {
            t.remaining = None;
            true
        } else {
            false
        }
    }

    fn note_result(&mut self, idx: usize, now: Instant, instr: &Instr, res: Result<(), SchedError>) {
        if let Err(error) = res {
            log::debug!("{}: {instr:?} failed: {error}", self.scenario.threads[idx].name);
            self.op_errors.push(OpError {
                thread: self.scenario.threads[idx].name.clone(),
                at_us: self.at_us(now),
                instr: instr.clone(),
                error,
            });
        }
    }

    fn snapshot(&mut self, idx: usize, label: String, now: Instant) {
        let status = self.core.status(self.threads[idx].tid);
        let us = |d: Duration| u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        self.snapshots.push(SnapshotRecord {
            thread: self.scenario.threads[idx].name.clone(),
            label,
            at_us: self.at_us(now),
            class: status.as_ref().map_or(ExecutionClass::Idle, |s| s.class),
            activity: status.as_ref().map(|s| s.activity),
            current_job: status.as_ref().and_then(|s| s.current_job),
            blocked_job: status.as_ref().and_then(|s| s.blocked_job),
            consumed_us: status.as_ref().map_or(0, |s| us(s.consumed_in_current)),
            block_credit_us: status.as_ref().map_or(0, |s| us(s.accumulated_block_time)),
            blocked_us: status.as_ref().map_or(0, |s| us(s.blocked_time)),
        });
    }

    // ========================================================================
    // CPU
    // ========================================================================

    /// Thread that receives the next tick, if any.
    fn pick_runner(&mut self) -> Result<Option<usize>, SimError> {
        if let Some(tid) = self.core.on_core() {
            let idx = self.by_tid.get(&tid).copied();
            return match idx {
                Some(idx) if self.threads[idx].state == RunState::Active => Ok(Some(idx)),
                _ => Err(self.invariant(format!("{tid} holds the core but cannot run"))),
            };
        }

        let n = self.threads.len();
        for off in 0..n {
            let idx = (self.rr_cursor + off) % n;
            if self.best_effort(idx) {
                self.rr_cursor = idx + 1;
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Runnable without a reservation in progress.
    fn best_effort(&self, idx: usize) -> bool {
        let t = &self.threads[idx];
        if t.state != RunState::Active {
            return false;
        }
        self.core
            .status(t.tid)
            .map_or(true, |s| s.activity == Activity::Outside)
    }

    fn run_tick(&mut self, idx: usize) {
        let tick = self.tick;
        let t = &mut self.threads[idx];
        t.cpu += tick;
        if let Some(r) = t.remaining.as_mut() {
            *r = r.saturating_sub(tick);
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    fn finished(&self) -> bool {
        if self.core.on_core().is_some() {
            return false;
        }
        self.threads.iter().all(|t| match t.state {
            RunState::Done => true,
            RunState::Parked => self
                .core
                .status(t.tid)
                .map_or(true, |s| {
                    s.pending == 0 && s.current_job.is_none() && s.blocked_job.is_none()
                }),
            RunState::Active | RunState::Sleeping { .. } => false,
        })
    }

    fn outcome(self) -> SimOutcome {
        let us = |d: Duration| u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        let threads = self
            .threads
            .iter()
            .zip(&self.scenario.threads)
            .map(|(t, p)| ThreadReport {
                name: p.name.clone(),
                tid: t.tid,
                cpu_us: us(t.cpu),
                jobs: t.jobs.clone(),
                finished: t.state == RunState::Done,
            })
            .collect();
        SimOutcome {
            scenario: self.scenario.name.clone(),
            elapsed_us: us(self.clock.elapsed()),
            threads,
            snapshots: self.snapshots,
            op_errors: self.op_errors,
            stats: self.core.stats(),
            trace: self.core.trace().dump(),
        }
    }

    fn at_us(&self, now: Instant) -> u64 {
        let d = now.saturating_duration_since(self.clock.epoch());
        u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
    }

    fn invariant(&self, message: String) -> SimError {
        SimError::Invariant {
            scenario: self.scenario.name.clone(),
            at_us: self.at_us(self.clock.now()),
            message,
        }
    }
}

/// Run `scenario` with `config`.
pub fn simulate(scenario: Scenario, config: &SchedulerConfig) -> Result<SimOutcome, SimError> {
    SimRunner::new(scenario, config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::program::ThreadProgram;

    fn run(threads: Vec<ThreadProgram>) -> SimOutcome {
        simulate(Scenario::new("unit", "", threads), &SchedulerConfig::default())
            .expect("simulation")
    }

    #[test]
    fn empty_scenario_finishes_immediately() {
        let out = run(Vec::new());
        assert_eq!(out.elapsed_us, 0);
        assert!(out.trace.is_empty());
    }

    #[test]
    fn best_effort_thread_gets_cpu_without_reservations() {
        let out = run(vec![ThreadProgram::new("spin", vec![Instr::Busy { ms: 5 }])]);
        assert_eq!(out.thread("spin").unwrap().cpu_us, 5_000);
        assert_eq!(out.elapsed_us, 5_000);
    }

    #[test]
    fn self_submitted_job_runs_and_completes() {
        let out = run(vec![ThreadProgram::new(
            "t",
            vec![
                Instr::submit(0, 1, 10, 50),
                Instr::Next,
                Instr::Busy { ms: 4 },
                Instr::snapshot("working"),
                Instr::Next,
            ],
        )]);
        let snap = out.snapshot("working").unwrap();
        assert_eq!(snap.class, ExecutionClass::Atlas);
        assert_eq!(snap.consumed_us, 4_000);
        assert_eq!(out.completions().len(), 1);
        assert_eq!(out.completions()[0].2, Duration::from_millis(4));
    }

    #[test]
    fn failed_operations_are_recorded() {
        let out = run(vec![ThreadProgram::new(
            "t",
            vec![
                Instr::submit(0, 1, 0, 50),
                Instr::Remove { target: 0, job: 9 },
            ],
        )]);
        assert_eq!(out.op_errors.len(), 2);
        assert!(matches!(
            out.op_errors[0].error,
            SchedError::MalformedDescriptor(_)
        ));
        assert!(matches!(out.op_errors[1].error, SchedError::UnknownJob { .. }));
    }

    #[test]
    fn bad_target_is_rejected_up_front() {
        let s = Scenario::new(
            "bad",
            "",
            vec![ThreadProgram::new("t", vec![Instr::submit(5, 1, 1, 1)])],
        );
        let err = simulate(s, &SchedulerConfig::default()).unwrap_err();
        assert!(matches!(err, SimError::BadScenario { .. }));
    }

    #[test]
    fn timeout_when_work_never_ends() {
        let mut s = Scenario::new(
            "forever",
            "",
            vec![ThreadProgram::new("t", vec![Instr::Busy { ms: 1_000 }])],
        );
        s.max_ms = 10;
        let err = simulate(s, &SchedulerConfig::default()).unwrap_err();
        assert_eq!(
            err,
            SimError::Timeout {
                scenario: "forever".into(),
                max_ms: 10
            }
        );
    }
}
