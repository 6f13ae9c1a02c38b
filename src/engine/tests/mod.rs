//! Engine and auxiliary thread tests

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::condition::ConditionId;
use crate::engine::{AuxiliaryThread, Engine, EngineConfig};
use crate::task::{RunState, StateMachine, Task, TaskContext};

const COND: ConditionId = ConditionId(1);

type StepLog = Arc<Mutex<Vec<&'static str>>>;

/// Logs its label each step; yields `turns` times, then finishes.
struct Chatty {
    label: &'static str,
    log: StepLog,
    turns: u32,
}

impl Chatty {
    fn new(
        label: &'static str,
        log: &StepLog,
        turns: u32,
    ) -> Self {
        Self {
            label,
            log: log.clone(),
            turns,
        }
    }
}

impl StateMachine for Chatty {
    fn initialize(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        cx.set_state(0);
    }

    fn step(
        &mut self,
        _run_state: RunState,
        cx: &mut TaskContext<'_>,
    ) {
        self.log.lock().push(self.label);
        if self.turns == 0 {
            cx.finish();
        } else {
            self.turns -= 1;
            cx.yield_now();
        }
    }

    fn state_name(
        &self,
        _run_state: RunState,
    ) -> &'static str {
        "Chat"
    }
}

/// Waits once on [`COND`], then logs and finishes.
struct WaitThenLog {
    label: &'static str,
    log: StepLog,
    waited: bool,
}

impl StateMachine for WaitThenLog {
    fn initialize(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        cx.set_state(0);
    }

    fn step(
        &mut self,
        _run_state: RunState,
        cx: &mut TaskContext<'_>,
    ) {
        if !self.waited {
            self.waited = true;
            cx.wait(COND);
        } else {
            self.log.lock().push(self.label);
            cx.finish();
        }
    }

    fn state_name(
        &self,
        _run_state: RunState,
    ) -> &'static str {
        "WaitThenLog"
    }
}

/// Signals `target`'s condition, logs, and finishes.
struct SignalOther {
    label: &'static str,
    log: StepLog,
    target: Task,
}

impl StateMachine for SignalOther {
    fn initialize(
        &mut self,
        cx: &mut TaskContext<'_>,
    ) {
        cx.set_state(0);
    }

    fn step(
        &mut self,
        _run_state: RunState,
        cx: &mut TaskContext<'_>,
    ) {
        self.target.signal(COND);
        self.log.lock().push(self.label);
        cx.finish();
    }

    fn state_name(
        &self,
        _run_state: RunState,
    ) -> &'static str {
        "Signal"
    }
}

#[cfg(test)]
mod fairness_tests {
    use super::*;

    #[test]
    fn test_fifo_one_step_per_task_per_pass() {
        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new("fifo");
        for label in ["a", "b", "c"] {
            Task::new(label, Chatty::new(label, &log, 8)).run_on(&engine);
        }

        assert_eq!(engine.mainloop(), 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(engine.mainloop(), 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_tasks_woken_mid_pass_run_next_pass() {
        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new("mid-pass");

        let sleeper = Task::new(
            "sleeper",
            WaitThenLog {
                label: "sleeper",
                log: log.clone(),
                waited: false,
            },
        );
        sleeper.run_on(&engine);
        engine.mainloop();
        assert!(sleeper.waiting());

        let waker = Task::new(
            "waker",
            SignalOther {
                label: "waker",
                log: log.clone(),
                target: sleeper.clone(),
            },
        );
        waker.run_on(&engine);

        // The waker's signal enqueues the sleeper during this pass; the
        // sleeper's step belongs to the next one.
        engine.mainloop();
        assert_eq!(*log.lock(), vec!["waker"]);
        engine.mainloop();
        assert_eq!(*log.lock(), vec!["waker", "sleeper"]);
        assert!(sleeper.finished());
    }
}

#[cfg(test)]
mod duration_tests {
    use super::*;

    /// Burns ~2ms per step, yielding forever.
    struct Slow {
        label: &'static str,
        log: StepLog,
    }

    impl StateMachine for Slow {
        fn initialize(
            &mut self,
            cx: &mut TaskContext<'_>,
        ) {
            cx.set_state(0);
        }

        fn step(
            &mut self,
            _run_state: RunState,
            cx: &mut TaskContext<'_>,
        ) {
            self.log.lock().push(self.label);
            std::thread::sleep(Duration::from_millis(2));
            cx.yield_now();
        }

        fn state_name(
            &self,
            _run_state: RunState,
        ) -> &'static str {
            "Slow"
        }
    }

    #[test]
    fn test_pass_cap_defers_remaining_tasks() {
        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::with_config(
            "capped",
            EngineConfig {
                max_pass_duration: Some(Duration::from_millis(1)),
            },
        );
        for label in ["s1", "s2", "s3"] {
            Task::new(
                label,
                Slow {
                    label,
                    log: log.clone(),
                },
            )
            .run_on(&engine);
        }

        // Each pass steps exactly one slow task, then hits the cap;
        // deferred tasks keep their FIFO position ahead of the requeued
        // one.
        assert_eq!(engine.mainloop(), 1);
        assert_eq!(*log.lock(), vec!["s1"]);
        assert_eq!(engine.mainloop(), 1);
        assert_eq!(*log.lock(), vec!["s1", "s2"]);
        assert_eq!(engine.mainloop(), 1);
        assert_eq!(*log.lock(), vec!["s1", "s2", "s3"]);
        assert_eq!(engine.mainloop(), 1);
        assert_eq!(*log.lock(), vec!["s1", "s2", "s3", "s1"]);
    }
}

#[cfg(test)]
mod migration_tests {
    use super::*;

    /// Hops to `other` once, then finishes there.
    struct Hopper {
        other: Engine,
        moved: bool,
    }

    impl StateMachine for Hopper {
        fn initialize(
            &mut self,
            cx: &mut TaskContext<'_>,
        ) {
            cx.set_state(0);
        }

        fn step(
            &mut self,
            _run_state: RunState,
            cx: &mut TaskContext<'_>,
        ) {
            if !self.moved {
                self.moved = true;
                cx.yield_to(&self.other);
            } else {
                cx.finish();
            }
        }

        fn state_name(
            &self,
            _run_state: RunState,
        ) -> &'static str {
            "Hop"
        }
    }

    #[test]
    fn test_yield_to_migrates_at_next_scheduling_event() {
        let first = Engine::new("first");
        let second = Engine::new("second");
        let task = Task::new(
            "hopper",
            Hopper {
                other: second.clone(),
                moved: false,
            },
        );
        task.run_on(&first);

        first.mainloop();
        assert!(first.is_quiescent());
        assert_eq!(second.runnable_count(), 1);
        assert!(!task.finished());

        second.mainloop();
        assert!(task.finished());
        assert!(second.is_quiescent());
    }

    /// Picks its engine in the initialization hook.
    struct SelfTargeting {
        target: Engine,
    }

    impl StateMachine for SelfTargeting {
        fn initialize(
            &mut self,
            cx: &mut TaskContext<'_>,
        ) {
            cx.set_state(0);
            cx.target(&self.target);
        }

        fn step(
            &mut self,
            _run_state: RunState,
            cx: &mut TaskContext<'_>,
        ) {
            cx.finish();
        }

        fn state_name(
            &self,
            _run_state: RunState,
        ) -> &'static str {
            "Targeted"
        }
    }

    #[test]
    fn test_initialize_can_choose_the_target_engine() {
        let chosen = Engine::new("chosen");
        let task = Task::new(
            "self-targeting",
            SelfTargeting {
                target: chosen.clone(),
            },
        );
        // No engine named here: the hook's choice wins over the global.
        task.run();
        assert_eq!(chosen.runnable_count(), 1);
        chosen.mainloop();
        assert!(task.finished());
    }
}

#[cfg(test)]
mod auxiliary_tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let aux = AuxiliaryThread::new("aux-idem");
        aux.start().unwrap();
        aux.start().unwrap();
        assert!(aux.is_running());

        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        let task = Task::new("bg", Chatty::new("bg", &log, 2));
        task.run_on(aux.engine());

        let mut waited = Duration::ZERO;
        while !task.finished() {
            thread::sleep(Duration::from_millis(1));
            waited += Duration::from_millis(1);
            assert!(waited < Duration::from_secs(5), "auxiliary engine stalled");
        }

        aux.stop().unwrap();
        aux.stop().unwrap();
        assert!(!aux.is_running());
    }

    #[test]
    fn test_stopped_thread_leaves_queue_intact() {
        let aux = AuxiliaryThread::new("aux-park");
        let log: StepLog = Arc::new(Mutex::new(Vec::new()));
        let task = Task::new("queued", Chatty::new("queued", &log, 0));
        task.run_on(aux.engine());
        assert_eq!(aux.engine().runnable_count(), 1);

        // Never started; the task just sits there until someone drives the
        // engine.
        aux.engine().mainloop();
        assert!(task.finished());
        aux.stop().unwrap();
    }
}
