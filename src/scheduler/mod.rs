//! Single-core EDF scheduler with Recover and Timeshare fallback classes.
//!
//! # Layers
//!
//! ```text
//!   Scheduler (protocol.rs)     submit / next / remove, thread binding, waits
//!        │
//!   SchedulerCore (engine.rs)   selection, budget accounting, misses, windows
//!        │
//!   ├── JobTable (job_table.rs)         per-thread reservations
//!   ├── ClassController (class.rs)      Atlas / Recover / Timeshare / Idle
//!   └── BlockingMonitor (blocking.rs)   voluntary suspensions, block credit
//! ```
//!
//! The core is single-threaded state with explicit `now` arguments; the
//! protocol layer owns the lock, the clock and the registry.

mod binding;
mod blocking;
mod cancel;
mod class;
mod engine;
mod job_table;
mod protocol;
mod registry;
mod trace;

pub use binding::current_thread;
pub use blocking::{BlockReport, BlockingMonitor};
pub use cancel::{CancelToken, Interrupt};
pub use class::{ClassController, ClassEvent, Transition};
pub use engine::{Activity, SchedulerCore, ThreadStatus};
pub use job_table::JobTable;
pub use protocol::{Scheduler, ThreadGuard};
pub use registry::{LocalRegistry, ThreadRegistry};
pub use trace::{SchedEvent, SchedEventKind, SchedStats, TraceRing};
