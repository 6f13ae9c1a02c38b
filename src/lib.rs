//! Taskmill
//!
//! A cooperative, state-machine-based task runtime. User code defines
//! tasks as explicit finite-state machines; [`Engine`]s step every
//! runnable task once per pass until it blocks, finishes, or is
//! cancelled. A blocked task is revived by a [`signal`](task::Task::signal)
//! from any thread through a counting rendezvous
//! ([`WaitCondition`]) that never loses a wakeup, however the signal and
//! the task's own decision to block interleave, and never parks an OS
//! thread.
//!
//! # Example
//!
//! ```rust
//! use taskmill::{Engine, RunState, StateMachine, Task, TaskContext};
//!
//! struct Countdown {
//!     left: u32,
//! }
//!
//! const TICK: RunState = 0;
//! const DONE: RunState = 1;
//!
//! impl StateMachine for Countdown {
//!     fn initialize(&mut self, cx: &mut TaskContext<'_>) {
//!         cx.set_state(TICK);
//!     }
//!
//!     fn step(&mut self, run_state: RunState, cx: &mut TaskContext<'_>) {
//!         match run_state {
//!             TICK => {
//!                 self.left -= 1;
//!                 if self.left == 0 {
//!                     cx.set_state(DONE);
//!                 }
//!                 cx.yield_now();
//!             }
//!             DONE => cx.finish(),
//!             _ => unreachable!(),
//!         }
//!     }
//!
//!     fn state_name(&self, run_state: RunState) -> &'static str {
//!         match run_state {
//!             TICK => "Tick",
//!             DONE => "Done",
//!             _ => "unknown",
//!         }
//!     }
//! }
//!
//! let engine = Engine::new("docs");
//! let task = Task::new("countdown", Countdown { left: 3 });
//! task.run_on(&engine);
//! while !task.finished() {
//!     engine.mainloop();
//! }
//! ```

#![warn(rust_2018_idioms)]

// Public modules
pub mod condition;
pub mod engine;
pub mod error;
pub mod probe;
pub mod task;

// Utility modules
pub mod util;

// Re-exports
pub use condition::{ConditionId, WaitCondition};
pub use engine::{AuxiliaryConfig, AuxiliaryThread, Engine, EngineConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use probe::{Probe, ProbeEvent, ProbeTag, RecordingProbe, TaskSnapshot};
pub use task::{
    CancelRequest, Lifecycle, RunState, StateMachine, Task, TaskBuilder, TaskContext, TaskId,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
