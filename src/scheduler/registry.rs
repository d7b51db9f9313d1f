//! Thread identity registry and authorization.
//!
//! The scheduler never derives identities from the OS. A [`ThreadRegistry`]
//! issues them, tracks which are live, and decides whether a caller may
//! target another thread. [`LocalRegistry`] is the in-process default: a
//! dense counter plus a protected set seeded with [`ThreadId::INIT`].

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::api::ThreadId;
use crate::config::SchedulerConfig;
use crate::error::SchedError;

/// Issues thread identities and answers authorization queries.
pub trait ThreadRegistry: Send + Sync + 'static {
    /// Issue a fresh live identity.
    fn register(&self) -> ThreadId;

    /// Retire an identity. Unknown ids are ignored.
    fn deregister(&self, tid: ThreadId);

    fn is_live(&self, tid: ThreadId) -> bool;

    /// Check that `caller` may submit to or remove from `target`.
    ///
    /// `caller` is `None` for threads not registered with the scheduler.
    ///
    /// # Errors
    /// - `NotFound` if `target` is not live.
    /// - `PermissionDenied` if `target` is protected and `caller` is neither
    ///   `target` itself nor privileged.
    fn authorize(&self, caller: Option<ThreadId>, target: ThreadId) -> Result<(), SchedError>;
}

#[derive(Debug)]
struct RegistryState {
    next: u64,
    live: BTreeSet<ThreadId>,
    protected: BTreeSet<ThreadId>,
    privileged: BTreeSet<ThreadId>,
}

/// In-process registry. Identities start at 2; 1 is reserved for init.
#[derive(Debug)]
pub struct LocalRegistry {
    state: Mutex<RegistryState>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        let mut live = BTreeSet::new();
        let mut protected = BTreeSet::new();
        if config.protect_init {
            live.insert(ThreadId::INIT);
            protected.insert(ThreadId::INIT);
        }
        Self {
            state: Mutex::new(RegistryState {
                next: ThreadId::INIT.as_raw() + 1,
                live,
                protected,
                privileged: config.privileged_threads().collect(),
            }),
        }
    }

    /// Mark `tid` as protected; only privileged callers may target it.
    pub fn protect(&self, tid: ThreadId) {
        self.state.lock().protected.insert(tid);
    }

    pub fn grant_privilege(&self, tid: ThreadId) {
        self.state.lock().privileged.insert(tid);
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry for LocalRegistry {
    fn register(&self) -> ThreadId {
        let mut st = self.state.lock();
        let tid = ThreadId::from_raw(st.next);
        st.next += 1;
        st.live.insert(tid);
        tid
    }

    fn deregister(&self, tid: ThreadId) {
        let mut st = self.state.lock();
        st.live.remove(&tid);
        st.protected.remove(&tid);
    }

    fn is_live(&self, tid: ThreadId) -> bool {
        self.state.lock().live.contains(&tid)
    }

    fn authorize(&self, caller: Option<ThreadId>, target: ThreadId) -> Result<(), SchedError> {
        let st = self.state.lock();
        if !st.live.contains(&target) {
            return Err(SchedError::NotFound(target));
        }
        if st.protected.contains(&target) {
            let allowed = caller.is_some_and(|c| c == target || st.privileged.contains(&c));
            if !allowed {
                return Err(SchedError::PermissionDenied(target));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_ids_after_init() {
        let reg = LocalRegistry::new();
        assert_eq!(reg.register(), ThreadId::from_raw(2));
        assert_eq!(reg.register(), ThreadId::from_raw(3));
        assert!(reg.is_live(ThreadId::INIT));
        assert_eq!(reg.live_count(), 3);
    }

    #[test]
    fn init_is_protected() {
        let reg = LocalRegistry::new();
        let me = reg.register();
        assert_eq!(
            reg.authorize(Some(me), ThreadId::INIT),
            Err(SchedError::PermissionDenied(ThreadId::INIT))
        );
        assert_eq!(
            reg.authorize(None, ThreadId::INIT),
            Err(SchedError::PermissionDenied(ThreadId::INIT))
        );
        reg.grant_privilege(me);
        assert_eq!(reg.authorize(Some(me), ThreadId::INIT), Ok(()));
    }

    #[test]
    fn dead_or_unknown_target_not_found() {
        let reg = LocalRegistry::new();
        let t = reg.register();
        assert_eq!(reg.authorize(None, t), Ok(()));
        reg.deregister(t);
        assert_eq!(reg.authorize(None, t), Err(SchedError::NotFound(t)));
        let never = ThreadId::from_raw(4242);
        assert_eq!(reg.authorize(None, never), Err(SchedError::NotFound(never)));
    }

    #[test]
    fn init_unregistered_when_unprotected() {
        let cfg = SchedulerConfig {
            protect_init: false,
            ..SchedulerConfig::default()
        };
        let reg = LocalRegistry::from_config(&cfg);
        assert_eq!(
            reg.authorize(None, ThreadId::INIT),
            Err(SchedError::NotFound(ThreadId::INIT))
        );
    }

    #[test]
    fn protected_thread_may_target_itself() {
        let reg = LocalRegistry::new();
        let t = reg.register();
        let other = reg.register();
        reg.protect(t);
        assert_eq!(reg.authorize(Some(t), t), Ok(()));
        assert_eq!(
            reg.authorize(Some(other), t),
            Err(SchedError::PermissionDenied(t))
        );
    }
}
