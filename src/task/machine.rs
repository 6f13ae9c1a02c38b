//! The capability interface implemented by concrete tasks
//!
//! A task's logic lives in a [`StateMachine`]: the core drives it through
//! the lifecycle, the machine decides what each run-state does. All
//! scheduling operations (`wait`, `yield`, `finish`, ...) go through the
//! [`TaskContext`] passed into the hooks, which is the only place they are
//! legal.
//!
//! [`TaskContext`]: crate::task::TaskContext

use super::TaskContext;

/// Opaque run-state value, owned and interpreted by the concrete machine.
///
/// Meaningful only while the task's lifecycle is `Running`/`Blocked`.
/// Concrete machines usually define constants or an enum cast to `u32`;
/// ordering matters for [`advance_state`](TaskContext::advance_state).
pub type RunState = u32;

/// Sentinel for "no run-state chosen yet". Reserved; machines must not use it.
pub(crate) const RUN_STATE_UNSET: RunState = u32::MAX;

/// A user task, expressed as an explicit finite-state machine.
///
/// The core guarantees that `initialize`, `step`, and the two cleanup hooks
/// are never invoked concurrently for one task, so `&mut self` access is
/// single-writer by construction.
pub trait StateMachine: Send {
    /// Choose the first run-state via [`TaskContext::set_state`].
    ///
    /// Runs inline on the thread calling `run()`, before the task is
    /// enqueued. May also pick a target engine or abort; anything else is a
    /// protocol violation.
    fn initialize(&mut self, cx: &mut TaskContext<'_>);

    /// Advance the machine by one step in `run_state`.
    ///
    /// Called once per engine pass while the task is runnable. A step that
    /// neither waits, yields, finishes, nor aborts leaves the task runnable
    /// and it is stepped again next pass.
    fn step(&mut self, run_state: RunState, cx: &mut TaskContext<'_>);

    /// Cleanup hook for the cancellation path. Skipped by `force_kill()`.
    fn on_abort(&mut self, _cx: &mut TaskContext<'_>) {}

    /// Cleanup hook for the normal finish path.
    fn on_finish(&mut self, _cx: &mut TaskContext<'_>) {}

    /// Human-readable name of `run_state`, consumed only by introspection.
    fn state_name(&self, run_state: RunState) -> &'static str;
}
