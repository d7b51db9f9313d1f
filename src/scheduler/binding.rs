//! Thread-local scheduler identity.
//!
//! # Purpose
//!
//! Protocol calls that act on "the calling thread" (`next`, block/resume
//! reports) resolve the caller through this binding instead of any OS thread
//! identifier:
//! - `Scheduler::register_current_thread` binds the issued [`ThreadId`]
//! - the returned guard clears the binding when dropped
//! - unregistered threads see `None` and get `SchedError::Unbound`
//!
//! # Correctness Invariant
//!
//! `current_thread()` returns `Some(tid)` **only** between registration and
//! the drop of its guard, on the thread that registered.

use std::cell::Cell;

use crate::api::ThreadId;

/// Sentinel meaning "not registered". Registries never issue raw id 0.
const UNBOUND: u64 = 0;

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(UNBOUND) };
}

/// Bind (or clear, with `None`) the scheduler identity of this OS thread.
#[inline]
pub fn set_current_thread(tid: Option<ThreadId>) {
    CURRENT.with(|c| c.set(tid.map_or(UNBOUND, ThreadId::as_raw)));
}

/// Scheduler identity of this OS thread, if registered.
#[inline]
pub fn current_thread() -> Option<ThreadId> {
    CURRENT.with(|c| match c.get() {
        UNBOUND => None,
        raw => Some(ThreadId::from_raw(raw)),
    })
}
