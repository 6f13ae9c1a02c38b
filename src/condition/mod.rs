//! Counting wait/signal rendezvous primitive
//!
//! A [`WaitCondition`] balances signals against waits in one signed atomic
//! counter. It never blocks an OS thread and never takes a lock; the counter
//! is the sole shared state, so any interleaving of [`enter_wait`] and
//! [`signal`] calls from any number of threads leaves it at exactly
//! `#signals - #waits`.
//!
//! The counter starts at 0. A wait decrements it; the waiter is genuinely
//! blocked when the new value is negative. A signal increments it; the
//! single increment that moves the counter from negative back to
//! non-negative is the *release edge*, and whoever observes it owns waking
//! the blocked task. Signaling before anyone waits is legal and pre-charges
//! the counter, so a later wait returns immediately.
//!
//! [`enter_wait`]: WaitCondition::enter_wait
//! [`signal`]: WaitCondition::signal

use std::sync::atomic::{AtomicI64, Ordering};


/// Small integer naming one of a task's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(pub u32);

impl ConditionId {
    /// Condition conventionally signaled by finishing children.
    pub const FINISHED: ConditionId = ConditionId(0);
}

impl From<u32> for ConditionId {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl std::fmt::Display for ConditionId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "cond({})", self.0)
    }
}

/// Counting rendezvous between waiters and signalers.
///
/// May be owned by a single task (the common case, one entry in its
/// condition map) or shared by several independent signalers feeding one
/// consumer (fan-in).
#[derive(Debug, Default)]
pub struct WaitCondition {
    /// Pending signals minus pending waits.
    count: AtomicI64,
}

impl WaitCondition {
    /// Create a condition with a balanced counter.
    #[inline]
    pub const fn new() -> Self {
        Self {
            count: AtomicI64::new(0),
        }
    }

    /// Record one wait and return the counter value it replaced.
    ///
    /// The caller is genuinely blocked when the returned value is `<= 0`
    /// (the counter went negative). A positive return means a pre-charged
    /// signal was consumed and the caller stays runnable. A negative return
    /// means the counter was already negative and is now owed one more
    /// signal (double wait / fan-in).
    #[inline]
    pub fn enter_wait(&self) -> i64 {
        self.count.fetch_sub(1, Ordering::SeqCst)
    }

    /// Record one signal.
    ///
    /// Returns `true` exactly when this increment is the release edge, the
    /// transition from negative to non-negative. The caller that observes
    /// `true` owns scheduling the blocked task; every other signal either
    /// pre-charges the counter or pays down an outstanding wait.
    #[inline]
    pub fn signal(&self) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst) == -1
    }

    /// Current counter value.
    #[inline]
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether a waiter entering now would stay runnable.
    ///
    /// A snapshot; it may be stale by the time the caller acts on it.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.count() >= 0
    }
}
