//! Cooperative multiplexer engines
//!
//! An [`Engine`] owns a FIFO queue of runnable tasks and advances each of
//! them exactly one step per [`mainloop`](Engine::mainloop) pass. Engines
//! do not own threads: the caller decides where passes run. One engine per
//! thread is the normal arrangement; [`AuxiliaryThread`] packages the
//! common second case, a private engine driven on its own native thread so
//! long or sleeping steps cannot stall the primary loop.
//!
//! A task that blocks during its step leaves the runnable set through the
//! wait/signal protocol itself (see [`crate::condition`] and
//! [`crate::task`]), never through the engine polling task state after the
//! fact; the engine merely applies the disposition the protocol decided.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use crate::task::core::Disposition;
use crate::task::{Task, TaskId};

pub mod auxiliary;
pub mod config;

pub use auxiliary::AuxiliaryThread;
pub use config::{AuxiliaryConfig, EngineConfig};

#[cfg(test)]
mod tests;

static GLOBAL: Lazy<Engine> = Lazy::new(|| Engine::new("main"));

struct EngineShared {
    name: String,
    /// Runnable tasks, FIFO. Insertion order is the only priority.
    queue: Mutex<VecDeque<Task>>,
    /// Blocked tasks this engine still tracks, in parking order.
    blocked: Mutex<IndexMap<TaskId, Task>>,
    /// Wall-clock cap on one pass.
    max_pass_duration: Mutex<Option<Duration>>,
}

/// Shared handle to one multiplexer.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl PartialEq for Engine {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Engine {}

impl std::fmt::Debug for Engine {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.shared.name)
            .field("runnable", &self.runnable_count())
            .field("blocked", &self.blocked_count())
            .finish()
    }
}

impl Engine {
    /// Create an engine with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EngineConfig::default())
    }

    /// Create an engine with custom configuration.
    pub fn with_config(
        name: impl Into<String>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                name: name.into(),
                queue: Mutex::new(VecDeque::new()),
                blocked: Mutex::new(IndexMap::new()),
                max_pass_duration: Mutex::new(config.max_pass_duration),
            }),
        }
    }

    /// The process-wide default engine, used by `Task::run` when no target
    /// was chosen.
    pub fn global() -> &'static Engine {
        &GLOBAL
    }

    /// Engine name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Cap the wall-clock time of one `mainloop` pass.
    pub fn set_max_duration(
        &self,
        limit: Duration,
    ) {
        *self.shared.max_pass_duration.lock() = Some(limit);
    }

    /// Remove the pass cap.
    pub fn clear_max_duration(&self) {
        *self.shared.max_pass_duration.lock() = None;
    }

    /// Number of runnable tasks queued right now.
    pub fn runnable_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of blocked tasks this engine tracks.
    pub fn blocked_count(&self) -> usize {
        self.shared.blocked.lock().len()
    }

    /// Whether the engine has neither runnable nor blocked tasks.
    pub fn is_quiescent(&self) -> bool {
        self.runnable_count() == 0 && self.blocked_count() == 0
    }

    /// Run one pass: step every task that was runnable when the pass
    /// started, once each, in FIFO order. Returns the number of steps
    /// taken.
    ///
    /// Tasks that become runnable during the pass (signals, spawns, other
    /// threads) are picked up by the next pass. When the configured pass
    /// cap is exceeded, the unstepped remainder is deferred to the front
    /// of the queue.
    pub fn mainloop(&self) -> usize {
        let cap = *self.shared.max_pass_duration.lock();
        let started = Instant::now();
        let mut batch: VecDeque<Task> = std::mem::take(&mut *self.shared.queue.lock());
        let mut stepped = 0;

        loop {
            if let Some(cap) = cap {
                if started.elapsed() >= cap && !batch.is_empty() {
                    trace!(
                        engine = %self.shared.name,
                        deferred = batch.len(),
                        "pass cap hit; deferring remainder"
                    );
                    break;
                }
            }
            let Some(task) = batch.pop_front() else { break };
            match task.multiplex(self) {
                Disposition::Requeue => self.shared.queue.lock().push_back(task),
                disposition => {
                    trace!(engine = %self.shared.name, task = %task.name(), ?disposition, "step");
                }
            }
            stepped += 1;
        }

        // Deferred tasks go ahead of anything enqueued during the pass.
        if !batch.is_empty() {
            let mut queue = self.shared.queue.lock();
            while let Some(task) = batch.pop_back() {
                queue.push_front(task);
            }
        }
        stepped
    }

    /// Make `task` runnable on this engine.
    ///
    /// Sole entry point for the runnable set; the caller must own the wake
    /// (initial `run`, the wake CAS, or a migration).
    pub(crate) fn enqueue_runnable(
        &self,
        task: Task,
    ) {
        self.shared.blocked.lock().shift_remove(&task.id());
        trace!(engine = %self.shared.name, task = %task.name(), "enqueue");
        self.shared.queue.lock().push_back(task);
    }

    /// Track a task that just parked.
    pub(crate) fn blocked_insert(
        &self,
        task: Task,
    ) {
        self.shared.blocked.lock().insert(task.id(), task);
    }

    /// Stop tracking a parked task.
    pub(crate) fn blocked_remove(
        &self,
        id: TaskId,
    ) {
        self.shared.blocked.lock().shift_remove(&id);
    }
}
