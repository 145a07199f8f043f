//! Core domain errors.

use thiserror::Error;

use crate::Operation;

/// Core domain errors for BuildRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A task tried to move backwards through the pipeline, or out of a terminal state.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: Operation, to: Operation },

    /// Malformed build configuration or product version.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
