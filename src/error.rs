//! Runtime errors
//!
//! Protocol violations (calling `run()` twice, finishing a finished task)
//! are programmer errors and panic with a diagnostic; see the crate docs.
//! This module covers the recoverable conditions only.

use std::io;
use thiserror::Error;

/// Runtime result
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Recoverable runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn auxiliary thread: {0}")]
    ThreadSpawn(#[from] io::Error),

    #[error("auxiliary thread panicked before shutdown")]
    ThreadPanicked,
}
