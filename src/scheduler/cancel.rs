//! Interruption of a thread parked in `next()`.
//!
//! A [`CancelToken`] is shared between the waiting thread and whoever may
//! interrupt it. Two kinds exist:
//!
//! - **Transient**: the wait restarts without the caller observing anything.
//! - **Terminal**: sticky; every later `next()` with this token returns
//!   `SchedError::Interrupted` after completing the caller's current job.
//!
//! # Lost wakeups
//!
//! Flags are published before the waker runs, and the waker takes the
//! scheduler lock before notifying. A waiter checks the flags while holding
//! that lock, so an interrupt either is seen before the wait begins or its
//! notification arrives after.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Kind of interruption delivered to a waiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Transient,
    Terminal,
}

/// Something that can wake parked waiters.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct TokenInner {
    transient: AtomicU64,
    terminal: AtomicBool,
    waker: Mutex<Option<Weak<dyn Wake>>>,
}

/// Shared interruption handle. Clones refer to the same token.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("transient", &self.generation())
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an interruption and wake the waiter, if one is attached.
    pub fn interrupt(&self, kind: Interrupt) {
        match kind {
            Interrupt::Transient => {
                self.inner.transient.fetch_add(1, Ordering::SeqCst);
            }
            Interrupt::Terminal => self.inner.terminal.store(true, Ordering::SeqCst),
        }
        let waker = self.inner.waker.lock().as_ref().and_then(Weak::upgrade);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.inner.terminal.load(Ordering::SeqCst)
    }

    /// Count of transient interruptions delivered so far.
    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.inner.transient.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, waker: Weak<dyn Wake>) {
        *self.inner.waker.lock() = Some(waker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Wake for Counter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn interrupts_wake_attached_waker() {
        let counter = Arc::new(Counter::default());
        let token = CancelToken::new();
        let weak: Weak<dyn Wake> = Arc::downgrade(&(counter.clone() as Arc<dyn Wake>));
        token.attach(weak);

        token.interrupt(Interrupt::Transient);
        assert_eq!(token.generation(), 1);
        assert!(!token.is_terminal());

        token.interrupt(Interrupt::Terminal);
        assert!(token.is_terminal());
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropped_waker_is_ignored() {
        let token = CancelToken::new();
        {
            let counter: Arc<dyn Wake> = Arc::new(Counter::default());
            token.attach(Arc::downgrade(&counter));
        }
        token.interrupt(Interrupt::Terminal);
        assert!(token.clone().is_terminal());
    }
}
