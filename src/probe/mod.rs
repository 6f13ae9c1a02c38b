//! Introspection hook
//!
//! An optional [`Probe`] attached to a task receives a [`ProbeEvent`] on
//! every lifecycle and run-state transition: the call site, a human
//! description, a full [`TaskSnapshot`], and up to three auxiliary tags the
//! machine (or an external driver) may set. The core treats the hook as
//! side-effect-free; it is the sole interface consumed by external
//! random-testing and graph-visualization tooling, which stays outside this
//! crate.
//!
//! [`RecordingProbe`] is a ready-made sink that collects events in memory
//! and renders them as JSON for such tooling.

use parking_lot::Mutex;
use serde::Serialize;

use crate::task::{CancelRequest, Lifecycle, RunState};


/// One auxiliary `(value, label)` pair attached to probe events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeTag {
    /// Machine-defined value.
    pub value: i64,
    /// Static label naming the value.
    pub label: &'static str,
}

/// Full state of a task at one transition.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    /// Task name.
    pub task: String,
    /// Task id.
    pub task_id: u64,
    /// Coarse lifecycle state.
    pub lifecycle: Lifecycle,
    /// Machine-owned run-state, if one has been chosen.
    pub run_state: Option<RunState>,
    /// Human-readable run-state name, when the machine was reachable.
    pub run_state_name: Option<String>,
    /// Pending cancellation request.
    pub cancel: CancelRequest,
    /// Whether the task's own step function is currently executing.
    pub in_step: bool,
}

/// One transition, as delivered to a [`Probe`].
#[derive(Debug, Clone, Serialize)]
pub struct ProbeEvent {
    /// Call site that produced the event.
    pub site: &'static str,
    /// Human description of the transition.
    pub description: String,
    /// Task state right after the transition.
    pub snapshot: TaskSnapshot,
    /// Auxiliary tag slots.
    pub tags: [Option<ProbeTag>; 3],
}

/// Callback invoked on every task transition.
///
/// Implementations must be cheap and must not call back into the task being
/// observed; the event may be delivered while the task is mid-step.
pub trait Probe: Send + Sync {
    /// Observe one transition.
    fn on_transition(&self, event: &ProbeEvent);
}

/// Probe that records every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProbe {
    events: Mutex<Vec<ProbeEvent>>,
}

impl RecordingProbe {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drain and return all recorded events.
    pub fn take(&self) -> Vec<ProbeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Clone the recorded events without draining them.
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().clone()
    }

    /// Render the recorded events as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.events.lock())
    }
}

impl Probe for RecordingProbe {
    fn on_transition(&self, event: &ProbeEvent) {
        self.events.lock().push(event.clone());
    }
}
