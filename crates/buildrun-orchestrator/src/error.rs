//! Orchestrator errors.

use thiserror::Error;

use buildrun_core::{CoreError, JobId};
use buildrun_repository::RepositoryProvisioningError;

/// Build queue errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was shut down; waiting consumers are released with this.
    #[error("Build queue is shut down")]
    Shutdown,
}

/// Errors reported by a [`BuildDriver`](crate::driver::BuildDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to submit build: {0}")]
    Submit(String),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Build process error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build driver error: {0}")]
    Failed(String),
}

/// Errors reported by a [`Datastore`](crate::datastore::Datastore).
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("Datastore I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize build result: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised by a caller-supplied callback. Logged, never propagated.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback failed: {0}")]
    Failed(String),

    #[error("Callback panicked: {0}")]
    Panicked(String),
}

/// Why a build task did not complete successfully.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Malformed build configuration; the task is never queued.
    #[error("Configuration error: {0}")]
    Configuration(#[from] CoreError),

    #[error("Repository provisioning failed: {0}")]
    RepositoryProvisioning(#[from] RepositoryProvisioningError),

    /// The remote build finished with a failure outcome.
    #[error("Build execution failed: {0}")]
    BuildExecution(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error("Build cancelled: {0}")]
    Cancelled(String),

    /// Stages were registered out of pipeline order.
    #[error("Pipeline error: {0}")]
    Pipeline(CoreError),

    /// A stage ran without the state an earlier stage should have left behind.
    #[error("Missing pipeline state: {0}")]
    MissingState(&'static str),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl BuildError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
