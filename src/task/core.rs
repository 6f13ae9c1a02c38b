//! Task core: shared ownership, lifecycle driving, and the block/wake path
//!
//! A [`Task`] is a cheap-clone handle over atomically refcounted core
//! state. The engine's runnable queue, its blocked-task bookkeeping, and a
//! parent's link all hold handles; the machine is destroyed only when the
//! last handle drops, so no caller can delete a running task out from
//! under the runtime.
//!
//! The block/wake protocol lives in [`Task::multiplex`] (engine side) and
//! [`Task::signal`] (any thread): after a step that waited, the engine
//! stores `Blocked`, re-checks every counter the step went negative on, and
//! resolves races through a single compare-and-swap on the lifecycle.
//! Whoever wins that CAS, engine or signaler, owns re-enqueueing the task;
//! nobody else may, so a wakeup is delivered exactly once and never lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::context::{Phase, StepOutcome, TaskContext};
use super::id::{next_task_id, TaskId};
use super::lifecycle::{CancelRequest, Lifecycle};
use super::machine::{RunState, StateMachine, RUN_STATE_UNSET};
use crate::condition::{ConditionId, WaitCondition};
use crate::engine::Engine;
use crate::probe::{Probe, ProbeEvent, ProbeTag, TaskSnapshot};

/// What the engine should do with a task after one multiplex call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Still runnable on this engine; push to the FIFO tail.
    Requeue,
    /// Now held by another engine's queue.
    Migrated,
    /// Blocked; held in this engine's blocked set until signaled.
    Parked,
    /// A racing signaler won the wake CAS and owns the re-enqueue.
    HandedOff,
    /// Finished or aborted; drop the engine's reference.
    Done,
}

/// Link from a child back to the parent resumed on its finish.
pub(crate) struct ParentLink {
    task: Weak<TaskCore>,
    condition: ConditionId,
}

pub(crate) struct TaskCore {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    /// The user machine; locked only while a hook runs.
    machine: Mutex<Box<dyn StateMachine>>,
    lifecycle: AtomicU8,
    run_state: AtomicU32,
    /// Run-state applied automatically when a `wait_until` is released.
    resume_state: AtomicU32,
    conditions: RwLock<HashMap<ConditionId, Arc<WaitCondition>>>,
    parent: Mutex<Option<ParentLink>>,
    engine: RwLock<Option<Engine>>,
    cancel: AtomicU8,
    /// True only while one of the task's own hooks is executing.
    in_step: AtomicBool,
    probe: Option<Arc<dyn Probe>>,
    tags: Mutex<[Option<ProbeTag>; 3]>,
}

impl TaskCore {
    pub(crate) fn new(
        name: String,
        machine: Box<dyn StateMachine>,
        engine: Option<Engine>,
        probe: Option<Arc<dyn Probe>>,
    ) -> Self {
        Self {
            id: next_task_id(),
            name,
            machine: Mutex::new(machine),
            lifecycle: AtomicU8::new(Lifecycle::Unstarted.as_u8()),
            run_state: AtomicU32::new(RUN_STATE_UNSET),
            resume_state: AtomicU32::new(RUN_STATE_UNSET),
            conditions: RwLock::new(HashMap::new()),
            parent: Mutex::new(None),
            engine: RwLock::new(engine),
            cancel: AtomicU8::new(CancelRequest::None.as_u8()),
            in_step: AtomicBool::new(false),
            probe,
            tags: Mutex::new([None; 3]),
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    fn store_lifecycle(
        &self,
        state: Lifecycle,
    ) {
        trace!(task = %self.name, lifecycle = %state, "lifecycle");
        self.lifecycle.store(state.as_u8(), Ordering::SeqCst);
    }

    /// The wake CAS: Blocked -> Running. The unique winner owns the
    /// re-enqueue on the target engine.
    fn try_unblock(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                Lifecycle::Blocked.as_u8(),
                Lifecycle::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Get or create the condition named `id`.
    pub(crate) fn condition(
        &self,
        id: ConditionId,
    ) -> Arc<WaitCondition> {
        if let Some(cond) = self.conditions.read().get(&id) {
            return cond.clone();
        }
        self.conditions
            .write()
            .entry(id)
            .or_default()
            .clone()
    }

    pub(crate) fn store_run_state(
        &self,
        state: RunState,
    ) {
        self.run_state.store(state, Ordering::SeqCst);
    }

    /// Forward-only transition; returns whether it took effect.
    pub(crate) fn advance_run_state(
        &self,
        state: RunState,
    ) -> bool {
        let mut current = self.run_state.load(Ordering::SeqCst);
        loop {
            if current != RUN_STATE_UNSET && state <= current {
                return false;
            }
            match self.run_state.compare_exchange(
                current,
                state,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn set_resume(
        &self,
        state: RunState,
    ) {
        self.resume_state.store(state, Ordering::SeqCst);
    }

    /// Apply a recorded `wait_until` resume state, at most once.
    pub(crate) fn apply_resume(&self) {
        let state = self.resume_state.swap(RUN_STATE_UNSET, Ordering::SeqCst);
        if state != RUN_STATE_UNSET {
            self.run_state.store(state, Ordering::SeqCst);
        }
    }

    pub(crate) fn set_engine(
        &self,
        engine: Engine,
    ) {
        *self.engine.write() = Some(engine);
    }

    pub(crate) fn target_engine(&self) -> Option<Engine> {
        self.engine.read().clone()
    }

    fn cancel_request(&self) -> CancelRequest {
        CancelRequest::from_u8(self.cancel.load(Ordering::SeqCst))
    }

    fn snapshot_with(
        &self,
        machine: Option<&dyn StateMachine>,
    ) -> TaskSnapshot {
        let run_state = match self.run_state.load(Ordering::SeqCst) {
            RUN_STATE_UNSET => None,
            state => Some(state),
        };
        let run_state_name = run_state.and_then(|state| match machine {
            Some(machine) => Some(machine.state_name(state).to_string()),
            // The machine may be mid-step on this or another thread; the
            // name is best-effort for out-of-band observers.
            None => self
                .machine
                .try_lock()
                .map(|guard| guard.state_name(state).to_string()),
        });
        TaskSnapshot {
            task: self.name.clone(),
            task_id: self.id.inner(),
            lifecycle: self.lifecycle(),
            run_state,
            run_state_name,
            cancel: self.cancel_request(),
            in_step: self.in_step.load(Ordering::SeqCst),
        }
    }

    /// Deliver one transition to the probe (if any) and the trace log.
    pub(crate) fn emit(
        &self,
        site: &'static str,
        description: impl Into<String>,
        machine: Option<&dyn StateMachine>,
    ) {
        let description = description.into();
        trace!(task = %self.name, site, %description, "transition");
        if let Some(probe) = &self.probe {
            let event = ProbeEvent {
                site,
                description,
                snapshot: self.snapshot_with(machine),
                tags: *self.tags.lock(),
            };
            probe.on_transition(&event);
        }
    }
}

/// Shared handle to one task.
///
/// Clones are cheap and all refer to the same task. The last handle to
/// drop destroys the machine; there is no other way to destroy it.
#[derive(Clone)]
pub struct Task {
    core: Arc<TaskCore>,
}

impl std::fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("lifecycle", &self.core.lifecycle())
            .finish()
    }
}

impl Task {
    pub(crate) fn from_core(core: Arc<TaskCore>) -> Self {
        Self { core }
    }

    /// Create a task with default options; see [`TaskBuilder`] for more.
    ///
    /// [`TaskBuilder`]: crate::task::TaskBuilder
    pub fn new(
        name: impl Into<String>,
        machine: impl StateMachine + 'static,
    ) -> Self {
        super::builder::TaskBuilder::new().name(name).build(machine)
    }

    /// Builder for tasks with a probe, a preset engine, or a custom name.
    pub fn builder() -> super::builder::TaskBuilder {
        super::builder::TaskBuilder::new()
    }

    pub(crate) fn core(&self) -> &TaskCore {
        &self.core
    }

    /// Task id.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current lifecycle state. A snapshot; may be stale immediately.
    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        self.core.lifecycle()
    }

    /// Whether the task is initializing or runnable.
    #[inline]
    pub fn running(&self) -> bool {
        matches!(
            self.core.lifecycle(),
            Lifecycle::Initializing | Lifecycle::Running
        )
    }

    /// Whether the task is blocked on a condition.
    #[inline]
    pub fn waiting(&self) -> bool {
        self.core.lifecycle() == Lifecycle::Blocked
    }

    /// Whether the task reached its terminal state.
    #[inline]
    pub fn finished(&self) -> bool {
        self.core.lifecycle() == Lifecycle::Finished
    }

    /// Current run-state, if one has been chosen.
    #[inline]
    pub fn run_state(&self) -> Option<RunState> {
        match self.core.run_state.load(Ordering::SeqCst) {
            RUN_STATE_UNSET => None,
            state => Some(state),
        }
    }

    /// Pending cancellation request.
    #[inline]
    pub fn cancel_requested(&self) -> CancelRequest {
        self.core.cancel_request()
    }

    /// Full introspection snapshot, as delivered to probes.
    pub fn snapshot(&self) -> TaskSnapshot {
        self.core.snapshot_with(None)
    }

    /// Start the task on its builder-chosen engine, or the global one.
    ///
    /// Runs the initialization hook inline on the calling thread, then
    /// enqueues the task. Calling `run()` twice is a protocol violation
    /// and panics.
    pub fn run(&self) {
        self.run_with(None, None);
    }

    /// Start the task on a specific engine.
    pub fn run_on(
        &self,
        engine: &Engine,
    ) {
        self.run_with(None, Some(engine));
    }

    /// Start the task as a child: `parent` is signaled on `condition`
    /// when this task finishes or aborts.
    pub fn run_child(
        &self,
        parent: &Task,
        condition: ConditionId,
    ) {
        self.run_with(Some((parent, condition)), None);
    }

    /// Start the task, naming an optional parent and target engine.
    pub fn run_with(
        &self,
        parent: Option<(&Task, ConditionId)>,
        engine: Option<&Engine>,
    ) {
        let core = &self.core;
        if core
            .lifecycle
            .compare_exchange(
                Lifecycle::Unstarted.as_u8(),
                Lifecycle::Initializing.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            panic!(
                "protocol violation: run() called twice on task `{}` (lifecycle {})",
                core.name,
                core.lifecycle()
            );
        }
        core.emit("Task::run", "run()", None);
        if let Some((parent, condition)) = parent {
            *core.parent.lock() = Some(ParentLink {
                task: Arc::downgrade(&parent.core),
                condition,
            });
        }
        if let Some(engine) = engine {
            core.set_engine(engine.clone());
        }

        // Initialization hook, inline on the calling thread. It must pick
        // the first run-state; it may also retarget or abort.
        assert!(
            !core.in_step.swap(true, Ordering::SeqCst),
            "protocol violation: initialize of task `{}` invoked concurrently",
            core.name
        );
        let mut machine = core.machine.lock();
        let outcome = {
            let mut cx = TaskContext::new(self, Phase::Initialize);
            machine.initialize(&mut cx);
            cx.into_outcome().0
        };
        core.in_step.store(false, Ordering::SeqCst);

        match outcome {
            StepOutcome::Aborted => {
                self.terminate(&mut **machine, false);
                return;
            }
            StepOutcome::Continue => {
                if core.run_state.load(Ordering::SeqCst) == RUN_STATE_UNSET {
                    panic!(
                        "protocol violation: initialization hook of task `{}` chose no run-state",
                        core.name
                    );
                }
            }
            // The Initialize phase guards forbid every other outcome.
            _ => unreachable!(),
        }
        core.emit("Task::run", "initialized", Some(&**machine));
        drop(machine);

        let target = match core.target_engine() {
            Some(engine) => engine,
            None => {
                let engine = Engine::global().clone();
                core.set_engine(engine.clone());
                engine
            }
        };
        core.store_lifecycle(Lifecycle::Running);
        debug!(task = %core.name, engine = %target.name(), "task started");
        target.enqueue_runnable(self.clone());
    }

    /// Signal condition `id` of this task. Callable from any thread.
    ///
    /// Increments the counter; on the release edge (negative to
    /// non-negative) the task is made runnable and re-enqueued on its
    /// target engine exactly once. Signaling with no outstanding wait
    /// pre-charges the counter.
    pub fn signal(
        &self,
        id: ConditionId,
    ) {
        let core = &self.core;
        let cond = core.condition(id);
        let released = cond.signal();
        trace!(task = %core.name, %id, count = cond.count(), released, "signal");
        if released {
            core.emit("Task::signal", format!("{id}: released"), None);
            self.signalled(id);
        } else {
            core.emit("Task::signal", format!("{id}: pre-charged"), None);
        }
    }

    /// A release edge was observed for `id`; wake the task if it is parked.
    fn signalled(
        &self,
        id: ConditionId,
    ) {
        let core = &self.core;
        core.apply_resume();
        if core.try_unblock() {
            core.emit("Task::signalled", format!("{id}: unblocked"), None);
            match core.target_engine() {
                Some(engine) => engine.enqueue_runnable(self.clone()),
                None => warn!(task = %core.name, "released with no target engine"),
            }
        } else {
            // Mid-step or already runnable; the engine's post-step counter
            // re-check owns the decision in that window.
            core.emit("Task::signalled", format!("{id}: not parked"), None);
        }
    }

    /// Request cancellation at the task's next safe point.
    ///
    /// A blocked task stays blocked until signaled; use [`kill`](Self::kill)
    /// to force the safe point immediately.
    pub fn abort(&self) {
        self.request_cancel("Task::abort", CancelRequest::Abort);
    }

    /// Cancel, forcing a blocked task runnable so cleanup runs immediately.
    pub fn kill(&self) {
        self.request_cancel("Task::kill", CancelRequest::Kill);
    }

    /// Cancel without running the cleanup hook. Teardown only; the machine
    /// may leak resources it would have released in the hook.
    pub fn force_kill(&self) {
        self.request_cancel("Task::force_kill", CancelRequest::ForceKill);
    }

    fn request_cancel(
        &self,
        site: &'static str,
        request: CancelRequest,
    ) {
        let core = &self.core;
        core.cancel.fetch_max(request.as_u8(), Ordering::SeqCst);
        debug!(task = %core.name, ?request, "cancellation requested");
        core.emit(site, format!("{request:?} requested"), None);
        if request >= CancelRequest::Kill && core.try_unblock() {
            core.emit(site, "forced runnable for cancellation", None);
            match core.target_engine() {
                Some(engine) => engine.enqueue_runnable(self.clone()),
                None => warn!(task = %core.name, "killed while blocked with no engine"),
            }
        }
    }

    /// Attach an auxiliary `(value, label)` tag to subsequent probe events.
    ///
    /// `slot` must be 0..3. External drivers use this to mark the operation
    /// they are about to inject.
    pub fn set_probe_tag(
        &self,
        slot: usize,
        value: i64,
        label: &'static str,
    ) {
        assert!(slot < 3, "probe tag slot out of range: {slot}");
        self.core.tags.lock()[slot] = Some(ProbeTag { value, label });
    }

    /// Clear an auxiliary probe tag slot.
    pub fn clear_probe_tag(
        &self,
        slot: usize,
    ) {
        assert!(slot < 3, "probe tag slot out of range: {slot}");
        self.core.tags.lock()[slot] = None;
    }

    /// Advance the task by one step. Engine-side entry point.
    pub(crate) fn multiplex(
        &self,
        engine: &Engine,
    ) -> Disposition {
        let core = &self.core;

        // A pending cancellation is honoured at the step boundary.
        let cancel = core.cancel_request();
        if cancel != CancelRequest::None {
            let mut machine = core.machine.lock();
            self.terminate(&mut **machine, cancel == CancelRequest::ForceKill);
            return Disposition::Done;
        }

        if core.lifecycle() != Lifecycle::Running {
            // A concurrent force_kill can finish the task between dequeue
            // and here.
            warn!(
                task = %core.name,
                lifecycle = %core.lifecycle(),
                "skipping step of non-runnable task"
            );
            return Disposition::Done;
        }

        assert!(
            !core.in_step.swap(true, Ordering::SeqCst),
            "protocol violation: step of task `{}` invoked concurrently with itself",
            core.name
        );
        let mut machine = core.machine.lock();
        let run_state = core.run_state.load(Ordering::SeqCst);
        core.emit("Engine::mainloop", "before step", Some(&**machine));
        let (outcome, blocked_on) = {
            let mut cx = TaskContext::new(self, Phase::Step);
            machine.step(run_state, &mut cx);
            cx.into_outcome()
        };
        core.in_step.store(false, Ordering::SeqCst);

        match outcome {
            StepOutcome::Continue => {
                core.emit("Engine::mainloop", "after step: still runnable", Some(&**machine));
                drop(machine);
                self.requeue_disposition(engine)
            }
            StepOutcome::Yielded(target) => {
                let description = match &target {
                    Some(target) => format!("yield to engine `{}`", target.name()),
                    None => "yield".to_string(),
                };
                if let Some(target) = target {
                    core.set_engine(target);
                }
                core.emit("TaskContext::yield", description, Some(&**machine));
                drop(machine);
                self.requeue_disposition(engine)
            }
            StepOutcome::Finished => {
                self.finish_path(&mut **machine);
                Disposition::Done
            }
            StepOutcome::Aborted => {
                self.terminate(&mut **machine, false);
                Disposition::Done
            }
            StepOutcome::Blocked => {
                drop(machine);
                self.park_or_keep(engine, blocked_on)
            }
        }
    }

    /// Re-enqueue a still-runnable task, honouring a pending migration.
    fn requeue_disposition(
        &self,
        current: &Engine,
    ) -> Disposition {
        match self.core.target_engine() {
            Some(target) if target != *current => {
                trace!(
                    task = %self.core.name,
                    from = %current.name(),
                    to = %target.name(),
                    "migrating"
                );
                target.enqueue_runnable(self.clone());
                Disposition::Migrated
            }
            _ => Disposition::Requeue,
        }
    }

    /// Publish the block decision and close the wait/signal race.
    ///
    /// The step already drove the counters negative; here the lifecycle is
    /// stored `Blocked`, the task parked in the engine's blocked set, and
    /// every counter re-checked. A counter back at `>= 0` means a signal
    /// landed in the window; the wake CAS then decides a single owner for
    /// the re-enqueue.
    fn park_or_keep(
        &self,
        engine: &Engine,
        blocked_on: SmallVec<[(ConditionId, Arc<WaitCondition>); 2]>,
    ) -> Disposition {
        let core = &self.core;
        core.store_lifecycle(Lifecycle::Blocked);
        core.emit(
            "Task::multiplex",
            format!("blocked on {} condition(s)", blocked_on.len()),
            None,
        );
        engine.blocked_insert(self.clone());

        // A kill that landed mid-step must not leave the task parked.
        if core.cancel_request() >= CancelRequest::Kill {
            engine.blocked_remove(core.id);
            return if core.try_unblock() {
                Disposition::Requeue
            } else {
                Disposition::HandedOff
            };
        }

        for (id, cond) in &blocked_on {
            if cond.count() >= 0 {
                engine.blocked_remove(core.id);
                if core.try_unblock() {
                    core.apply_resume();
                    core.emit(
                        "Task::multiplex",
                        format!("{id}: signal raced in; still runnable"),
                        None,
                    );
                    return Disposition::Requeue;
                }
                // The signaler won the wake CAS and owns the re-enqueue.
                core.emit("Task::multiplex", format!("{id}: handed off to signaler"), None);
                return Disposition::HandedOff;
            }
        }
        trace!(task = %core.name, engine = %engine.name(), "parked");
        Disposition::Parked
    }

    /// Normal completion: finish hook, parent notification, terminal state.
    fn finish_path(
        &self,
        machine: &mut dyn StateMachine,
    ) {
        let core = &self.core;
        core.store_lifecycle(Lifecycle::Finishing);
        core.emit("Task::finish", "finishing", Some(&*machine));
        core.in_step.store(true, Ordering::SeqCst);
        {
            let mut cx = TaskContext::new(self, Phase::Hook);
            machine.on_finish(&mut cx);
        }
        core.in_step.store(false, Ordering::SeqCst);
        self.notify_parent();
        core.store_lifecycle(Lifecycle::Finished);
        core.emit("Task::finish", "finished", Some(&*machine));
        debug!(task = %core.name, "task finished");
    }

    /// Cancellation path; `skip_hook` is the `force_kill` variant.
    fn terminate(
        &self,
        machine: &mut dyn StateMachine,
        skip_hook: bool,
    ) {
        let core = &self.core;
        core.store_lifecycle(Lifecycle::Aborting);
        core.emit("Task::abort", "aborting", Some(&*machine));
        if !skip_hook {
            core.in_step.store(true, Ordering::SeqCst);
            {
                let mut cx = TaskContext::new(self, Phase::Hook);
                machine.on_abort(&mut cx);
            }
            core.in_step.store(false, Ordering::SeqCst);
        }
        self.notify_parent();
        core.store_lifecycle(Lifecycle::Finished);
        core.emit("Task::abort", "finished (aborted)", Some(&*machine));
        debug!(task = %core.name, skip_hook, "task aborted");
    }

    /// Signal the registered parent, if it is still alive.
    fn notify_parent(&self) {
        let link = self.core.parent.lock().take();
        if let Some(link) = link {
            if let Some(parent) = link.task.upgrade() {
                Task::from_core(parent).signal(link.condition);
            }
        }
    }
}
