//! Build driver contract.

use async_trait::async_trait;

use buildrun_core::{ArtifactRef, BuildConfiguration, JobId, RepositorySession};

use crate::error::DriverError;

/// Terminal outcome of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

/// Executes builds on behalf of the pipeline (a CI server, a local process, ...).
#[async_trait]
pub trait BuildDriver: Send + Sync {
    /// Start a build resolving and deploying through `session`.
    ///
    /// Returns once the driver has accepted the job, not when it finishes.
    async fn submit(
        &self,
        config: &BuildConfiguration,
        session: &RepositorySession,
    ) -> Result<JobId, DriverError>;

    /// Wait until the job reaches a terminal outcome.
    async fn await_completion(&self, job: &JobId) -> Result<JobOutcome, DriverError>;

    /// Full build log.
    async fn fetch_log(&self, job: &JobId) -> Result<String, DriverError>;

    /// Artifacts the job deployed.
    async fn fetch_artifacts(&self, job: &JobId) -> Result<Vec<ArtifactRef>, DriverError>;

    /// Stop a running job. Drivers that cannot cancel may ignore this.
    async fn cancel(&self, _job: &JobId) -> Result<(), DriverError> {
        Ok(())
    }

    /// Forget a finished job once the pipeline has read what it needs.
    ///
    /// Log and artifact lookups for the job may fail afterwards.
    async fn release(&self, _job: &JobId) -> Result<(), DriverError> {
        Ok(())
    }
}
