//! Auxiliary engine thread
//!
//! Pairs one [`Engine`] with one native thread, so tasks whose steps sleep
//! or block on slow work can run without stalling the primary engine. The
//! thread's lifecycle is explicit and independent of any task's:
//! [`start`](AuxiliaryThread::start) and [`stop`](AuxiliaryThread::stop)
//! are idempotent and safe to call once per process lifetime.

use std::thread;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, error};

use super::config::AuxiliaryConfig;
use super::Engine;
use crate::error::{RuntimeError, RuntimeResult};

static GLOBAL: Lazy<AuxiliaryThread> = Lazy::new(AuxiliaryThread::default);

struct Worker {
    handle: thread::JoinHandle<()>,
    stop: Sender<()>,
}

/// A dedicated background thread hosting a private engine.
pub struct AuxiliaryThread {
    engine: Engine,
    config: AuxiliaryConfig,
    worker: Mutex<Option<Worker>>,
}

impl Default for AuxiliaryThread {
    fn default() -> Self {
        Self::with_config(AuxiliaryConfig::default())
    }
}

impl std::fmt::Debug for AuxiliaryThread {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("AuxiliaryThread")
            .field("engine", &self.engine)
            .field("running", &self.worker.lock().is_some())
            .finish()
    }
}

impl AuxiliaryThread {
    /// Create a stopped auxiliary thread with its own engine.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::with_config(AuxiliaryConfig {
            thread_name: name,
            ..AuxiliaryConfig::default()
        })
    }

    /// Create a stopped auxiliary thread with custom pacing.
    pub fn with_config(config: AuxiliaryConfig) -> Self {
        Self {
            engine: Engine::new(format!("{}-engine", config.thread_name)),
            config,
            worker: Mutex::new(None),
        }
    }

    /// The process-wide auxiliary thread (original design: one auxiliary
    /// engine next to the main-thread engine). Must be started explicitly.
    pub fn global() -> &'static AuxiliaryThread {
        &GLOBAL
    }

    /// The engine this thread drives. Valid as a task target whether or
    /// not the thread is currently running.
    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Whether the native thread is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Start the native thread. Idempotent.
    pub fn start(&self) -> RuntimeResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let (stop, stop_rx) = bounded(1);
        let engine = self.engine.clone();
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || Self::worker_loop(&engine, &stop_rx, &config))?;
        *worker = Some(Worker { handle, stop });
        debug!(thread = %self.config.thread_name, "auxiliary thread started");
        Ok(())
    }

    /// Stop the native thread and wait for it to exit. Idempotent.
    ///
    /// Tasks still queued on the engine stay queued; a later `start`
    /// resumes stepping them.
    pub fn stop(&self) -> RuntimeResult<()> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };
        // The worker exits on either the message or the disconnect.
        let _ = worker.stop.send(());
        if worker.handle.join().is_err() {
            error!(thread = %self.config.thread_name, "auxiliary thread panicked");
            return Err(RuntimeError::ThreadPanicked);
        }
        debug!(thread = %self.config.thread_name, "auxiliary thread stopped");
        Ok(())
    }

    fn worker_loop(
        engine: &Engine,
        stop: &Receiver<()>,
        config: &AuxiliaryConfig,
    ) {
        loop {
            let stepped = engine.mainloop();
            let pause = if stepped > 0 {
                config.busy_pause
            } else {
                config.idle_pause
            };
            match stop.recv_timeout(pause) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}
