//! Task builder

use std::sync::Arc;

use super::core::{Task, TaskCore};
use super::machine::StateMachine;
use crate::engine::Engine;
use crate::probe::Probe;

/// Builder for constructing tasks with various options.
#[derive(Default)]
pub struct TaskBuilder {
    name: Option<String>,
    engine: Option<Engine>,
    probe: Option<Arc<dyn Probe>>,
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the initial target engine.
    #[inline]
    pub fn engine(
        mut self,
        engine: &Engine,
    ) -> Self {
        self.engine = Some(engine.clone());
        self
    }

    /// Attach an introspection probe.
    #[inline]
    pub fn probe(
        mut self,
        probe: Arc<dyn Probe>,
    ) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the task around `machine`.
    pub fn build(
        self,
        machine: impl StateMachine + 'static,
    ) -> Task {
        let core = Arc::new(TaskCore::new(
            self.name.unwrap_or_else(|| "task".to_string()),
            Box::new(machine),
            self.engine,
            self.probe,
        ));
        Task::from_core(core)
    }
}

impl std::fmt::Debug for TaskBuilder {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("name", &self.name)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("probe", &self.probe.is_some())
            .finish()
    }
}
