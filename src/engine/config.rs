//! Engine and auxiliary thread configuration

use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wall-clock cap on one `mainloop` pass; `None` means unbounded.
    ///
    /// A fairness bound, not a correctness requirement: tasks left over
    /// when the cap is hit are deferred to the next pass, ahead of newly
    /// enqueued work.
    pub max_pass_duration: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pass_duration: None,
        }
    }
}

/// Auxiliary thread configuration.
#[derive(Debug, Clone)]
pub struct AuxiliaryConfig {
    /// Name given to the native thread.
    pub thread_name: String,
    /// Pause between passes while the engine has work.
    pub busy_pause: Duration,
    /// Pause between passes while the engine is idle.
    pub idle_pause: Duration,
}

impl Default for AuxiliaryConfig {
    fn default() -> Self {
        Self {
            thread_name: "taskmill-aux".to_string(),
            busy_pause: Duration::from_micros(50),
            idle_pause: Duration::from_millis(1),
        }
    }
}
