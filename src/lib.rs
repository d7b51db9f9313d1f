//! Deadline-driven job scheduling for cooperating threads.
//!
//! ## Scope
//! Threads reserve CPU time as jobs: an execution budget plus a deadline.
//! One logical core is handed to the ready job with the earliest deadline
//! (EDF). Threads that block inside a reservation or overrun a deadline fall
//! back to the Recover and Timeshare classes until their next reservation.
//!
//! ## Key invariants
//! - At most one thread holds the core; holding it is never preempted.
//! - A job never accrues more reserved time than its budget through block
//!   credit.
//! - EDF ties break by submission order, then thread id.
//!
//! ## Notable entry points
//! - [`Scheduler`]: thread-facing `submit` / `next` / `remove` protocol.
//! - [`SchedulerCore`]: the deterministic decision engine.
//! - [`sim`]: scenario simulator over a [`ManualClock`].
//! - [`demo::ProducerConsumer`]: real-thread workload.

pub mod api;
pub mod clock;
pub mod config;
pub mod demo;
pub mod error;
pub mod scheduler;
pub mod sim;
#[cfg(test)]
pub mod test_utils;

pub use api::{
    Deadline, ExecutionClass, Job, JobId, JobRequest, JobState, Reservation, ThreadId,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SchedulerConfig;
pub use error::{ConfigError, DescriptorFault, SchedError, SimError};
pub use scheduler::{
    CancelToken, Interrupt, LocalRegistry, SchedEvent, SchedStats, Scheduler, SchedulerCore,
    ThreadGuard, ThreadRegistry, ThreadStatus,
};
