//! Task identifiers

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "task({})", self.0)
    }
}

/// Thread-safe generator for task IDs.
#[derive(Debug, Default)]
pub struct TaskIdGenerator {
    next_id: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a new generator starting at 0.
    #[inline]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
        }
    }

    /// Generate the next task ID.
    #[inline]
    pub fn next_id(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

static GENERATOR: Lazy<TaskIdGenerator> = Lazy::new(TaskIdGenerator::new);

/// Allocate a process-unique task ID.
pub(crate) fn next_task_id() -> TaskId {
    GENERATOR.next_id()
}
