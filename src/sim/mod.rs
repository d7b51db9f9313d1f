//! Deterministic scheduling simulation.
//!
//! Purpose:
//! - Replay scheduling situations against [`SchedulerCore`](crate::scheduler::SchedulerCore)
//!   without OS threads or OS time.
//! - Keep scenarios small, serializable and exactly repeatable.
//!
//! Invariants:
//! - Simulated time advances only in whole ticks of the scenario quantum.
//! - At most one thread consumes CPU per tick.
//! - Core invariants are checked after every settle.

pub mod program;
pub mod runner;
pub mod scenarios;

pub use program::{Instr, Scenario, ThreadProgram};
pub use runner::{simulate, OpError, SnapshotRecord, SimOutcome, SimRunner, ThreadReport};
