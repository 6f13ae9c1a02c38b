//! In-step operations
//!
//! A [`TaskContext`] exists only while the core is inside one of a task's
//! hooks, so operations that are legal "only from inside the task's own
//! step" are unrepresentable elsewhere. The context records what the step
//! decided (block, yield, finish, abort); the engine applies the decision
//! after the step returns, which is what keeps the block decision atomic
//! with removal from the runnable set.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use super::core::Task;
use super::machine::{RunState, RUN_STATE_UNSET};
use crate::condition::{ConditionId, WaitCondition};
use crate::engine::Engine;

/// Which hook the context was handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Initialize,
    Step,
    Hook,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Initialize => "initialize",
            Phase::Step => "step",
            Phase::Hook => "cleanup hook",
        }
    }
}

/// What a step decided to do, applied by the engine once the step returns.
#[derive(Debug, Clone)]
pub(crate) enum StepOutcome {
    /// No suspension; the task is stepped again next pass.
    Continue,
    /// At least one `wait` went negative; park unless a signal raced in.
    Blocked,
    /// Relinquish this turn, optionally migrating to another engine.
    Yielded(Option<Engine>),
    /// Normal completion.
    Finished,
    /// Self-requested cancellation.
    Aborted,
}

/// Handle to the scheduling operations legal inside a task's own hooks.
pub struct TaskContext<'a> {
    task: &'a Task,
    phase: Phase,
    outcome: StepOutcome,
    blocked_on: SmallVec<[(ConditionId, Arc<WaitCondition>); 2]>,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        task: &'a Task,
        phase: Phase,
    ) -> Self {
        Self {
            task,
            phase,
            outcome: StepOutcome::Continue,
            blocked_on: SmallVec::new(),
        }
    }

    pub(crate) fn into_outcome(
        self
    ) -> (
        StepOutcome,
        SmallVec<[(ConditionId, Arc<WaitCondition>); 2]>,
    ) {
        (self.outcome, self.blocked_on)
    }

    /// The task this context belongs to.
    #[inline]
    pub fn task(&self) -> &Task {
        self.task
    }

    /// Go idle on `id` unless the condition is already pre-charged.
    ///
    /// Performs one atomic decrement on the condition counter. If the
    /// counter goes negative the task leaves the runnable set once this
    /// step returns; a signal from any thread revives it. If a signal had
    /// already arrived, the charge is consumed and the task simply keeps
    /// running. Waiting twice without an intervening signal leaves the
    /// counter at -2 and requires exactly two signals.
    pub fn wait(
        &mut self,
        id: ConditionId,
    ) {
        self.check_phase("wait", &[Phase::Step]);
        match self.outcome {
            StepOutcome::Continue | StepOutcome::Blocked => {}
            _ => self.violation("wait", "the step already yielded or finished"),
        }
        let core = self.task.core();
        let cond = core.condition(id);
        let prev = cond.enter_wait();
        if prev <= 0 {
            trace!(task = %core.name, %id, count = prev - 1, "wait: blocked");
            core.emit("TaskContext::wait", format!("{id}: blocked"), None);
            self.blocked_on.push((id, cond));
            self.outcome = StepOutcome::Blocked;
        } else {
            trace!(task = %core.name, %id, count = prev - 1, "wait: consumed pre-charged signal");
            core.emit("TaskContext::wait", format!("{id}: already signalled"), None);
        }
    }

    /// Continue into `resume` if `predicate` already holds, otherwise
    /// `wait(id)` and enter `resume` automatically on release.
    ///
    /// The predicate is evaluated exactly once, before any counter
    /// mutation; when it is already true no suspension occurs at all.
    pub fn wait_until(
        &mut self,
        predicate: impl FnOnce() -> bool,
        id: ConditionId,
        resume: RunState,
    ) {
        self.check_phase("wait_until", &[Phase::Step]);
        if predicate() {
            self.task
                .core()
                .emit("TaskContext::wait_until", format!("{id}: predicate already true"), None);
            self.set_state(resume);
            return;
        }
        // Record the resume state before the counter moves, so a release
        // racing with this wait applies it too.
        self.task.core().set_resume(resume);
        self.wait(id);
        if !matches!(self.outcome, StepOutcome::Blocked) {
            // The wait consumed a pre-charged signal; the release is now.
            self.task.core().apply_resume();
        }
    }

    /// Relinquish this engine turn without blocking.
    ///
    /// The task stays runnable and re-enters the FIFO tail, so every other
    /// runnable task on the engine gets a turn first.
    pub fn yield_now(&mut self) {
        self.check_phase("yield_now", &[Phase::Step]);
        self.check_fresh_outcome("yield_now");
        self.outcome = StepOutcome::Yielded(None);
    }

    /// Like [`yield_now`](Self::yield_now), but migrate to `engine` first.
    pub fn yield_to(
        &mut self,
        engine: &Engine,
    ) {
        self.check_phase("yield_to", &[Phase::Step]);
        self.check_fresh_outcome("yield_to");
        self.outcome = StepOutcome::Yielded(Some(engine.clone()));
    }

    /// Move scheduling rights to `engine` at the next scheduling event.
    pub fn target(
        &mut self,
        engine: &Engine,
    ) {
        self.check_phase("target", &[Phase::Initialize, Phase::Step]);
        let core = self.task.core();
        core.set_engine(engine.clone());
        core.emit(
            "TaskContext::target",
            format!("target engine set to `{}`", engine.name()),
            None,
        );
    }

    /// Unconditional run-state transition (explicit back-edges included).
    pub fn set_state(
        &mut self,
        state: RunState,
    ) {
        self.check_phase("set_state", &[Phase::Initialize, Phase::Step]);
        if state == RUN_STATE_UNSET {
            self.violation("set_state", "u32::MAX is a reserved run-state");
        }
        let core = self.task.core();
        core.store_run_state(state);
        core.emit("TaskContext::set_state", format!("set_state({state})"), None);
    }

    /// Forward-only run-state transition.
    ///
    /// A request to move to a state numerically at or behind the current
    /// one is a silent no-op, which keeps a stale or duplicate event
    /// handler from rewinding progress.
    pub fn advance_state(
        &mut self,
        state: RunState,
    ) {
        self.check_phase("advance_state", &[Phase::Initialize, Phase::Step]);
        if state == RUN_STATE_UNSET {
            self.violation("advance_state", "u32::MAX is a reserved run-state");
        }
        let core = self.task.core();
        if core.advance_run_state(state) {
            core.emit(
                "TaskContext::advance_state",
                format!("advance_state({state}): advanced"),
                None,
            );
        } else {
            core.emit(
                "TaskContext::advance_state",
                format!("advance_state({state}): behind current state, ignored"),
                None,
            );
        }
    }

    /// Complete the task.
    ///
    /// The finish hook runs once the step returns, a registered parent is
    /// signaled, and the lifecycle ends in `Finished`.
    pub fn finish(&mut self) {
        self.check_phase("finish", &[Phase::Step]);
        self.check_fresh_outcome("finish");
        self.outcome = StepOutcome::Finished;
    }

    /// Cancel the task from inside its own step.
    pub fn abort(&mut self) {
        self.check_phase("abort", &[Phase::Initialize, Phase::Step]);
        self.check_fresh_outcome("abort");
        self.outcome = StepOutcome::Aborted;
    }

    /// Signal one of this task's own conditions.
    pub fn signal(
        &mut self,
        id: ConditionId,
    ) {
        self.task.signal(id);
    }

    /// Attach an auxiliary `(value, label)` tag to subsequent probe events.
    ///
    /// `slot` must be 0..3.
    pub fn set_probe_tag(
        &mut self,
        slot: usize,
        value: i64,
        label: &'static str,
    ) {
        self.task.set_probe_tag(slot, value, label);
    }

    /// Clear an auxiliary probe tag slot.
    pub fn clear_probe_tag(
        &mut self,
        slot: usize,
    ) {
        self.task.clear_probe_tag(slot);
    }

    fn check_phase(
        &self,
        op: &str,
        allowed: &[Phase],
    ) {
        if !allowed.contains(&self.phase) {
            self.violation(op, "not legal in this hook");
        }
    }

    fn check_fresh_outcome(
        &self,
        op: &str,
    ) {
        if !matches!(self.outcome, StepOutcome::Continue) {
            self.violation(op, "the step already decided to suspend or finish");
        }
    }

    fn violation(
        &self,
        op: &str,
        why: &str,
    ) -> ! {
        panic!(
            "protocol violation: {op}() in {} of task `{}`: {why}",
            self.phase.name(),
            self.task.core().name,
        );
    }
}
