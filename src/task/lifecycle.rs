//! Task lifecycle states
//!
//! The lifecycle is the core's own coarse state, orthogonal to the
//! subclass-defined run-state. It only ever moves forward:
//! `Unstarted -> Initializing -> {Running <-> Blocked}* -> Finishing ->
//! Finished`, with an escape edge into `Aborting` from every non-terminal
//! state. `Finished` is the only terminal state.

use serde::Serialize;

/// Coarse scheduling state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    /// Created, `run()` not called yet.
    Unstarted,
    /// Inside the initialization hook.
    Initializing,
    /// Runnable; stepped by its target engine each pass.
    Running,
    /// Idle on one or more conditions; revived only by a signal.
    Blocked,
    /// Inside the finish hook.
    Finishing,
    /// Cancellation honoured; cleanup hook may be running.
    Aborting,
    /// Terminal. Never leaves this state.
    Finished,
}

impl Lifecycle {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => Lifecycle::Unstarted,
            1 => Lifecycle::Initializing,
            2 => Lifecycle::Running,
            3 => Lifecycle::Blocked,
            4 => Lifecycle::Finishing,
            5 => Lifecycle::Aborting,
            6 => Lifecycle::Finished,
            _ => Lifecycle::Unstarted,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            Lifecycle::Unstarted => 0,
            Lifecycle::Initializing => 1,
            Lifecycle::Running => 2,
            Lifecycle::Blocked => 3,
            Lifecycle::Finishing => 4,
            Lifecycle::Aborting => 5,
            Lifecycle::Finished => 6,
        }
    }

    /// Whether this is the terminal state.
    #[inline]
    pub fn is_terminal(self) -> bool {
        self == Lifecycle::Finished
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Lifecycle::Unstarted => "Unstarted",
            Lifecycle::Initializing => "Initializing",
            Lifecycle::Running => "Running",
            Lifecycle::Blocked => "Blocked",
            Lifecycle::Finishing => "Finishing",
            Lifecycle::Aborting => "Aborting",
            Lifecycle::Finished => "Finished",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Pending cancellation request, in increasing severity.
///
/// `Abort` is honoured at the task's next safe point and runs the cleanup
/// hook. `Kill` additionally forces a blocked task runnable so the safe
/// point arrives immediately. `ForceKill` skips the cleanup hook entirely
/// and may leak subclass resources; it exists for process teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CancelRequest {
    /// No cancellation requested.
    None,
    /// Run the cleanup hook at the next safe point, then finish.
    Abort,
    /// Like `Abort`, but wakes a blocked task immediately.
    Kill,
    /// Like `Kill`, but skips the cleanup hook.
    ForceKill,
}

impl CancelRequest {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => CancelRequest::Abort,
            2 => CancelRequest::Kill,
            3 => CancelRequest::ForceKill,
            _ => CancelRequest::None,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(self) -> u8 {
        match self {
            CancelRequest::None => 0,
            CancelRequest::Abort => 1,
            CancelRequest::Kill => 2,
            CancelRequest::ForceKill => 3,
        }
    }
}
