//! Thread-facing submission and fetch protocol.
//!
//! [`Scheduler`] wraps one [`SchedulerCore`] behind a mutex and a condition
//! variable. Every protocol call is a *decision point*: it advances the core
//! to the clock's current time, applies its own effect, then lets the core
//! hand a free processor to the best candidate.
//!
//! # Cooperation
//!
//! The scheduler cannot stop a running OS thread. `next()` is the only call
//! that parks; a thread that holds the core keeps it until it calls `next()`
//! again, reports a block, or its job's deadline passes. Block reports
//! (`block_current` / `resume_current`) never park the caller.
//!
//! # Timers
//!
//! Waiters in `next()` sleep until the core's next timer (deadline, window
//! or budget exhaustion) plus the configured slack, so misses are detected
//! even when no other thread calls into the scheduler. Clocks that do not
//! track real time ([`ManualClock`](crate::clock::ManualClock)) are driven by
//! explicit [`poll`](Scheduler::poll) calls instead.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::api::{JobId, JobRequest, Reservation, ThreadId};
use crate::clock::{Clock, MonotonicClock};
use crate::config::SchedulerConfig;
use crate::error::{ConfigError, SchedError};

use super::binding::{current_thread, set_current_thread};
use super::cancel::{CancelToken, Wake};
use super::engine::{SchedulerCore, ThreadStatus};
use super::registry::{LocalRegistry, ThreadRegistry};
use super::trace::{SchedEvent, SchedStats};

struct Shared<C, R> {
    core: Mutex<SchedulerCore>,
    wakeup: Condvar,
    clock: C,
    registry: R,
    config: SchedulerConfig,
}

impl<C: Clock, R: ThreadRegistry> Wake for Shared<C, R> {
    fn wake(&self) {
        let _core = self.core.lock();
        self.wakeup.notify_all();
    }
}

impl<C: Clock, R: ThreadRegistry> Shared<C, R> {
    /// Advance to the current time and fill the core if it is free.
    fn settle(&self, core: &mut SchedulerCore) {
        let now = self.clock.now();
        core.advance(now);
        if let Some((tid, job)) = core.select_next(now) {
            log::trace!("{tid} selected for {job}");
        }
        self.wakeup.notify_all();
    }
}

/// Handle to one scheduler instance. Clones share the instance.
pub struct Scheduler<C: Clock = MonotonicClock, R: ThreadRegistry = LocalRegistry> {
    shared: Arc<Shared<C, R>>,
}

impl<C: Clock, R: ThreadRegistry> Clone for Scheduler<C, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Scheduler {
    /// Scheduler on the OS monotonic clock with an in-process registry.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, MonotonicClock)
    }
}

impl<C: Clock> Scheduler<C, LocalRegistry> {
    pub fn with_clock(config: SchedulerConfig, clock: C) -> Result<Self, ConfigError> {
        let registry = LocalRegistry::from_config(&config);
        Self::with_parts(config, clock, registry)
    }
}

impl<C: Clock, R: ThreadRegistry> Scheduler<C, R> {
    pub fn with_parts(config: SchedulerConfig, clock: C, registry: R) -> Result<Self, ConfigError> {
        config.validate()?;
        let core = SchedulerCore::new(clock.now(), config.trace_capacity);
        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                wakeup: Condvar::new(),
                clock,
                registry,
                config,
            }),
        })
    }

    // ========================================================================
    // Thread lifecycle
    // ========================================================================

    /// Issue an identity for the calling OS thread and bind it.
    ///
    /// Dropping the guard terminates the identity: its jobs are cancelled,
    /// the core is released if held, and the binding is restored.
    pub fn register_current_thread(&self) -> ThreadGuard<C, R> {
        let tid = self.shared.registry.register();
        log::debug!("registered {tid}");
        self.bind(tid)
    }

    /// Spawn an OS thread registered with this scheduler.
    ///
    /// The identity is issued before the thread starts, so it can be used as
    /// a submission target immediately.
    pub fn spawn<F, T>(&self, name: &str, f: F) -> io::Result<(ThreadId, JoinHandle<T>)>
    where
        F: FnOnce(ThreadId) -> T + Send + 'static,
        T: Send + 'static,
    {
        let tid = self.shared.registry.register();
        let sched = self.clone();
        let spawned = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let _guard = sched.bind(tid);
                f(tid)
            });
        match spawned {
            Ok(handle) => Ok((tid, handle)),
            Err(e) => {
                self.shared.registry.deregister(tid);
                Err(e)
            }
        }
    }

    fn bind(&self, tid: ThreadId) -> ThreadGuard<C, R> {
        let prev = current_thread();
        set_current_thread(Some(tid));
        ThreadGuard {
            sched: self.clone(),
            tid,
            prev,
        }
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Reserve `reservation` for job `job` of thread `target`.
    ///
    /// # Errors
    /// `NotFound`, `PermissionDenied`, `DuplicateId`, `MalformedDescriptor`.
    pub fn submit(
        &self,
        target: ThreadId,
        job: impl Into<JobId>,
        reservation: Reservation,
    ) -> Result<(), SchedError> {
        let caller = current_thread();
        let job = job.into();
        let mut core = self.shared.core.lock();
        self.shared.registry.authorize(caller, target)?;
        let now = self.shared.clock.now();
        core.advance(now);
        core.submit(target, job, reservation, now)?;
        self.shared.settle(&mut core);
        Ok(())
    }

    /// Submit several jobs with a single decision point at the end.
    ///
    /// Results are positional; a failing request does not affect the others.
    pub fn submit_batch(&self, requests: &[JobRequest]) -> Vec<Result<(), SchedError>> {
        let caller = current_thread();
        let mut core = self.shared.core.lock();
        let now = self.shared.clock.now();
        core.advance(now);
        let results = requests
            .iter()
            .map(|r| {
                self.shared.registry.authorize(caller, r.target)?;
                core.submit(r.target, r.job, r.reservation, now)
            })
            .collect();
        self.shared.settle(&mut core);
        results
    }

    /// Cancel a Pending job of `target`.
    ///
    /// # Errors
    /// `NotFound`, `PermissionDenied`, `UnknownJob`.
    pub fn remove(&self, target: ThreadId, job: impl Into<JobId>) -> Result<(), SchedError> {
        let caller = current_thread();
        let job = job.into();
        let mut core = self.shared.core.lock();
        self.shared.registry.authorize(caller, target)?;
        let now = self.shared.clock.now();
        core.advance(now);
        core.cancel(target, job, now)?;
        self.shared.settle(&mut core);
        Ok(())
    }

    /// Finish the caller's current job (if any) and wait for the next one.
    ///
    /// Returns the id of the job the caller now executes.
    ///
    /// # Errors
    /// - `Unbound` if the calling thread is not registered.
    /// - `Interrupted` once `token` received a terminal interruption.
    pub fn next(&self, token: &CancelToken) -> Result<JobId, SchedError> {
        let tid = current_thread().ok_or(SchedError::Unbound)?;
        let waker: Arc<dyn Wake> = self.shared.clone();
        token.attach(Arc::downgrade(&waker));
        drop(waker);

        let mut core = self.shared.core.lock();
        let now = self.shared.clock.now();
        core.advance(now);
        core.fetch(tid, now);

        let mut seen = token.generation();
        loop {
            self.shared.settle(&mut core);
            if let Some(job) = core.assignment(tid) {
                return Ok(job);
            }
            if !core.ensure_waiting(tid) {
                return Err(SchedError::NotFound(tid));
            }
            if token.is_terminal() {
                core.abandon_wait(tid);
                log::debug!("{tid} interrupted in next()");
                return Err(SchedError::Interrupted);
            }
            let generation = token.generation();
            if generation != seen {
                seen = generation;
                log::trace!("{tid} restarting wait after transient interrupt");
                continue;
            }
            self.wait(&mut core);
        }
    }

    fn wait(&self, core: &mut MutexGuard<'_, SchedulerCore>) {
        let timeout = core
            .next_timer()
            .and_then(|t| self.shared.clock.timeout_until(t + self.shared.config.timer_slack()));
        match timeout {
            Some(d) => {
                self.shared.wakeup.wait_for(core, d);
            }
            None => self.shared.wakeup.wait(core),
        }
    }

    /// Report that the calling thread is about to suspend voluntarily.
    pub fn block_current(&self) -> Result<(), SchedError> {
        let tid = current_thread().ok_or(SchedError::Unbound)?;
        let mut core = self.shared.core.lock();
        let now = self.shared.clock.now();
        core.advance(now);
        core.suspend(tid, now);
        self.shared.settle(&mut core);
        Ok(())
    }

    /// Report that the calling thread resumed after `block_current`.
    pub fn resume_current(&self) -> Result<(), SchedError> {
        let tid = current_thread().ok_or(SchedError::Unbound)?;
        let mut core = self.shared.core.lock();
        let now = self.shared.clock.now();
        core.advance(now);
        core.resume(tid, now);
        self.shared.settle(&mut core);
        Ok(())
    }

    /// Run `f` as a voluntary suspension of the calling thread.
    pub fn blocking<T>(&self, f: impl FnOnce() -> T) -> Result<T, SchedError> {
        self.block_current()?;
        let out = f();
        self.resume_current()?;
        Ok(out)
    }

    /// Run a decision point without any protocol effect.
    pub fn poll(&self) {
        let mut core = self.shared.core.lock();
        self.shared.settle(&mut core);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn status(&self, tid: ThreadId) -> Option<ThreadStatus> {
        self.shared.core.lock().status(tid)
    }

    pub fn stats(&self) -> SchedStats {
        self.shared.core.lock().stats()
    }

    pub fn trace(&self) -> Vec<SchedEvent> {
        self.shared.core.lock().trace().dump()
    }

    pub fn on_core(&self) -> Option<ThreadId> {
        self.shared.core.lock().on_core()
    }

    #[inline]
    pub fn clock(&self) -> &C {
        &self.shared.clock
    }

    #[inline]
    pub fn registry(&self) -> &R {
        &self.shared.registry
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}

/// Registration of one OS thread. Dropping it terminates the identity.
#[must_use = "dropping the guard deregisters the thread"]
pub struct ThreadGuard<C: Clock = MonotonicClock, R: ThreadRegistry = LocalRegistry> {
    sched: Scheduler<C, R>,
    tid: ThreadId,
    prev: Option<ThreadId>,
}

impl<C: Clock, R: ThreadRegistry> ThreadGuard<C, R> {
    #[inline]
    pub fn tid(&self) -> ThreadId {
        self.tid
    }
}

impl<C: Clock, R: ThreadRegistry> Drop for ThreadGuard<C, R> {
    fn drop(&mut self) {
        let shared = &self.sched.shared;
        {
            let mut core = shared.core.lock();
            let now = shared.clock.now();
            core.advance(now);
            core.exit_thread(self.tid, now);
            shared.registry.deregister(self.tid);
            shared.settle(&mut core);
        }
        log::debug!("{} exited", self.tid);
        set_current_thread(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::cancel::Interrupt;
    use std::time::Duration;

    fn manual() -> (Scheduler<Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let sched = Scheduler::with_clock(SchedulerConfig::default(), clock.clone()).unwrap();
        (sched, clock)
    }

    #[test]
    fn unbound_caller_cannot_fetch() {
        let (sched, _) = manual();
        let err = thread::spawn(move || sched.next(&CancelToken::new()))
            .join()
            .unwrap();
        assert_eq!(err, Err(SchedError::Unbound));
    }

    #[test]
    fn self_submission_then_fetch() {
        let (sched, clock) = manual();
        let guard = sched.register_current_thread();
        sched
            .submit(
                guard.tid(),
                7,
                Reservation::relative(Duration::from_millis(10), Duration::from_millis(50)),
            )
            .unwrap();
        assert_eq!(sched.next(&CancelToken::new()), Ok(JobId(7)));
        clock.advance_by(Duration::from_millis(4));
        sched.poll();
        let st = sched.status(guard.tid()).unwrap();
        assert_eq!(st.consumed_in_current, Duration::from_millis(4));
    }

    #[test]
    fn terminal_interrupt_is_sticky() {
        let (sched, _) = manual();
        let _guard = sched.register_current_thread();
        let token = CancelToken::new();
        token.interrupt(Interrupt::Terminal);
        assert_eq!(sched.next(&token), Err(SchedError::Interrupted));
        assert_eq!(sched.next(&token), Err(SchedError::Interrupted));
    }

    #[test]
    fn guard_drop_restores_binding() {
        let (sched, _) = manual();
        {
            let outer = sched.register_current_thread();
            {
                let inner = sched.register_current_thread();
                assert_eq!(current_thread(), Some(inner.tid()));
            }
            assert_eq!(current_thread(), Some(outer.tid()));
        }
        assert_eq!(current_thread(), None);
    }
}
