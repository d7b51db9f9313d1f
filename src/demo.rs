//! Producer/consumer workload on real OS threads.
//!
//! Producers submit jobs to a fixed set of consumer threads; consumers fetch
//! them with `next()` and busy-work for a fixed span. Each consumer has a
//! [`JobWindow`] bounding how many of its jobs may be submitted but not yet
//! worked off, so producers cannot run arbitrarily far ahead.
//!
//! Job ids are laid out so that no two producers ever collide on the same
//! consumer: `sample * producers * consumers + producer * consumers + consumer`.

use std::hint::spin_loop;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::api::{Reservation, ThreadId};
use crate::error::SchedError;
use crate::scheduler::{CancelToken, Interrupt, Scheduler, SchedStats};

// ============================================================================
// JobWindow
// ============================================================================

/// Cap on outstanding jobs for one consumer.
///
/// Producers park in [`acquire`](Self::acquire) while the window is full and
/// are woken by [`release_raw`](Self::release_raw).
///
/// # Invariants
///
/// - `available + outstanding == total` at all times
/// - Over-release panics in debug builds
#[derive(Debug)]
pub struct JobWindow {
    total: u32,
    avail: Mutex<u32>,
    freed: Condvar,
}

impl JobWindow {
    /// # Panics
    /// Panics if `total` is 0.
    pub fn new(total: u32) -> Self {
        assert!(total > 0, "JobWindow total must be > 0");
        Self {
            total,
            avail: Mutex::new(total),
            freed: Condvar::new(),
        }
    }

    #[inline]
    pub fn available(&self) -> u32 {
        *self.avail.lock()
    }

    /// Claim one slot, or `None` if the window is full.
    pub fn try_acquire(&self) -> Option<WindowPermit<'_>> {
        let mut avail = self.avail.lock();
        if *avail == 0 {
            return None;
        }
        *avail -= 1;
        Some(WindowPermit { window: self })
    }

    /// Claim one slot, waiting for a release while the window is full.
    pub fn acquire(&self) -> WindowPermit<'_> {
        let mut avail = self.avail.lock();
        while *avail == 0 {
            self.freed.wait(&mut avail);
        }
        *avail -= 1;
        WindowPermit { window: self }
    }

    /// Return a slot handed off with [`WindowPermit::into_raw`].
    pub fn release_raw(&self) {
        let mut avail = self.avail.lock();
        debug_assert!(
            *avail < self.total,
            "JobWindow over-release: prev={} total={}",
            *avail,
            self.total
        );
        *avail += 1;
        drop(avail);
        self.freed.notify_one();
    }
}

/// RAII slot of a [`JobWindow`]; released on drop unless handed off.
#[derive(Debug)]
pub struct WindowPermit<'a> {
    window: &'a JobWindow,
}

impl WindowPermit<'_> {
    /// Detach the slot from the permit. The consumer releases it later with
    /// [`JobWindow::release_raw`].
    #[inline]
    pub fn into_raw(self) {
        std::mem::forget(self);
    }
}

impl Drop for WindowPermit<'_> {
    #[inline]
    fn drop(&mut self) {
        self.window.release_raw();
    }
}

// ============================================================================
// Workload
// ============================================================================

/// Shape of the producer/consumer run.
#[derive(Clone, Debug, Serialize)]
pub struct ProducerConsumer {
    pub consumers: usize,
    pub producers: usize,
    /// Rounds each producer makes over all consumers.
    pub samples: usize,
    /// Busy work per job.
    pub work: Duration,
    pub budget: Duration,
    pub deadline: Duration,
    /// Outstanding jobs allowed per consumer.
    pub window: u32,
}

impl Default for ProducerConsumer {
    fn default() -> Self {
        Self {
            consumers: 3,
            producers: 10,
            samples: 20,
            work: Duration::from_micros(500),
            budget: Duration::from_millis(5000),
            deadline: Duration::from_millis(5000),
            window: 16,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Sched(#[from] SchedError),
    #[error("{0} panicked")]
    Panicked(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct DemoReport {
    pub config: ProducerConsumer,
    pub jobs: usize,
    pub per_consumer: Vec<usize>,
    pub elapsed_ms: u64,
    pub stats: SchedStats,
}

impl ProducerConsumer {
    fn jobs_per_consumer(&self) -> usize {
        self.producers * self.samples
    }

    /// Run the workload to completion on `sched`.
    pub fn run(&self, sched: &Scheduler) -> Result<DemoReport, DemoError> {
        let started = Instant::now();
        let windows: Arc<Vec<JobWindow>> =
            Arc::new((0..self.consumers).map(|_| JobWindow::new(self.window)).collect());

        let mut consumers = Vec::with_capacity(self.consumers);
        for idx in 0..self.consumers {
            let name = format!("consumer-{idx}");
            let (sched_c, windows_c) = (sched.clone(), Arc::clone(&windows));
            let (expected, work) = (self.jobs_per_consumer(), self.work);
            let (tid, handle) = sched
                .spawn(&name, move |_tid| {
                    consume(&sched_c, &windows_c[idx], expected, work)
                })
                .map_err(|source| DemoError::Spawn {
                    name: name.clone(),
                    source,
                })?;
            consumers.push((name, tid, handle));
        }
        let targets: Arc<Vec<ThreadId>> = Arc::new(consumers.iter().map(|c| c.1).collect());

        let barrier = Arc::new(Barrier::new(self.producers));
        let mut producers = Vec::with_capacity(self.producers);
        for producer in 0..self.producers {
            let name = format!("producer-{producer}");
            let ctx = (
                sched.clone(),
                Arc::clone(&windows),
                Arc::clone(&targets),
                Arc::clone(&barrier),
            );
            let plan = self.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let (sched, windows, targets, barrier) = ctx;
                    barrier.wait();
                    produce(&sched, &plan, producer, &windows, &targets)
                })
                .map_err(|source| DemoError::Spawn {
                    name: name.clone(),
                    source,
                })?;
            producers.push((name, handle));
        }

        for (name, handle) in producers {
            handle.join().map_err(|_| DemoError::Panicked(name))??;
        }
        let mut per_consumer = Vec::with_capacity(consumers.len());
        for (name, _, handle) in consumers {
            per_consumer.push(handle.join().map_err(|_| DemoError::Panicked(name))??);
        }

        let report = DemoReport {
            config: self.clone(),
            jobs: per_consumer.iter().sum(),
            per_consumer,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            stats: sched.stats(),
        };
        log::info!(
            "producer/consumer finished {} jobs in {} ms",
            report.jobs,
            report.elapsed_ms
        );
        Ok(report)
    }
}

fn produce(
    sched: &Scheduler,
    plan: &ProducerConsumer,
    producer: usize,
    windows: &[JobWindow],
    targets: &[ThreadId],
) -> Result<(), SchedError> {
    let n = targets.len();
    for sample in 0..plan.samples {
        for (consumer, &target) in targets.iter().enumerate() {
            let id = (sample * plan.producers * n + producer * n + consumer) as u64;
            let permit = windows[consumer].acquire();
            sched.submit(
                target,
                id,
                Reservation::relative(plan.budget, plan.deadline),
            )?;
            permit.into_raw();
        }
    }
    Ok(())
}

fn consume(
    sched: &Scheduler,
    window: &JobWindow,
    expected: usize,
    work: Duration,
) -> Result<usize, SchedError> {
    let token = CancelToken::new();
    let mut done = 0;
    while done < expected {
        let job = sched.next(&token)?;
        log::trace!("working on {job}");
        let until = Instant::now() + work;
        while Instant::now() < until {
            spin_loop();
        }
        window.release_raw();
        done += 1;
    }

    // Complete the last job without waiting for another.
    let finish = CancelToken::new();
    finish.interrupt(Interrupt::Terminal);
    match sched.next(&finish) {
        Err(SchedError::Interrupted) => Ok(done),
        Err(e) => Err(e),
        Ok(job) => {
            log::warn!("unexpected extra {job} after the workload finished");
            Ok(done)
        }
    }
}
