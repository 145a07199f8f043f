//! The standard build stages.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use buildrun_core::{BuildResult, Operation, ProductVersion, TaskId};
use buildrun_repository::RepositoryCoordinator;

use crate::datastore::Datastore;
use crate::driver::{BuildDriver, JobOutcome};
use crate::error::BuildError;
use crate::pipeline::{Stage, StageOutcome};
use crate::task::BuildTask;

/// Turn a fallible stage body into a stage outcome.
fn outcome(result: Result<(), BuildError>) -> StageOutcome {
    match result {
        Ok(()) => StageOutcome::Continue,
        Err(e) => StageOutcome::Abort(e),
    }
}

/// Provisions the build's repository group and attaches the session.
pub struct ConfigureRepository {
    coordinator: Arc<RepositoryCoordinator>,
}

impl ConfigureRepository {
    pub fn new(coordinator: Arc<RepositoryCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Stage for ConfigureRepository {
    fn operation(&self) -> Operation {
        Operation::CreateRepository
    }

    async fn handle(&self, task: &mut BuildTask, cancel: &CancellationToken) -> StageOutcome {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return StageOutcome::Abort(BuildError::Cancelled(
                    "worker cancelled while provisioning repositories".to_string(),
                ));
            }
            session = self.coordinator.create_build_repository(
                &task.config,
                task.product_version.as_ref(),
                task.submitted_at,
            ) => session,
        };

        outcome(session.map_err(BuildError::from).map(|session| {
            task.attach_session(session);
        }))
    }
}

/// Hands the build to the driver.
pub struct StartBuild {
    driver: Arc<dyn BuildDriver>,
}

impl StartBuild {
    pub fn new(driver: Arc<dyn BuildDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Stage for StartBuild {
    fn operation(&self) -> Operation {
        Operation::BuildScheduled
    }

    async fn handle(&self, task: &mut BuildTask, _cancel: &CancellationToken) -> StageOutcome {
        let Some(session) = task.session() else {
            return StageOutcome::Abort(BuildError::MissingState("repository session"));
        };

        match self.driver.submit(&task.config, session).await {
            Ok(job) => {
                info!(task_id = %task.id, job = %job, "Build submitted to driver");
                task.job = Some(job);
                StageOutcome::Continue
            }
            Err(e) => StageOutcome::Abort(e.into()),
        }
    }
}

/// Waits for the driver to report an outcome.
///
/// The only stage that may wait indefinitely. Cancellation stops the wait
/// and asks the driver to cancel the job.
pub struct WaitForCompletion {
    driver: Arc<dyn BuildDriver>,
}

impl WaitForCompletion {
    pub fn new(driver: Arc<dyn BuildDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Stage for WaitForCompletion {
    fn operation(&self) -> Operation {
        Operation::WaitingBuildToComplete
    }

    async fn handle(&self, task: &mut BuildTask, cancel: &CancellationToken) -> StageOutcome {
        let Some(job) = task.job.clone() else {
            return StageOutcome::Abort(BuildError::MissingState("job handle"));
        };

        let completion = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = self.driver.cancel(&job).await {
                    warn!(task_id = %task.id, job = %job, error = %e, "Failed to cancel build job");
                }
                return StageOutcome::Abort(BuildError::Cancelled(format!(
                    "worker cancelled while waiting for job {job}"
                )));
            }
            completion = self.driver.await_completion(&job) => completion,
        };

        match completion {
            Ok(JobOutcome::Success) => {
                info!(task_id = %task.id, job = %job, "Build finished: SUCCESS");
                StageOutcome::Continue
            }
            Ok(JobOutcome::Failure) => {
                info!(task_id = %task.id, job = %job, "Build finished: FAILURE");
                // Keep the log of a failed build when the driver still has it.
                match self.driver.fetch_log(&job).await {
                    Ok(log) => task.result.build_log = log,
                    Err(e) => debug!(task_id = %task.id, error = %e, "No log for failed build"),
                }
                if let Err(e) = self.driver.release(&job).await {
                    warn!(task_id = %task.id, job = %job, error = %e, "Failed to release build job");
                }
                StageOutcome::Abort(BuildError::BuildExecution(format!(
                    "job {job} finished with FAILURE"
                )))
            }
            Err(e) => StageOutcome::Abort(e.into()),
        }
    }
}

/// Collects the build log and deployed artifacts.
pub struct RetrieveResults {
    driver: Arc<dyn BuildDriver>,
}

impl RetrieveResults {
    pub fn new(driver: Arc<dyn BuildDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl Stage for RetrieveResults {
    fn operation(&self) -> Operation {
        Operation::CollectResults
    }

    async fn handle(&self, task: &mut BuildTask, _cancel: &CancellationToken) -> StageOutcome {
        let Some(job) = task.job.clone() else {
            return StageOutcome::Abort(BuildError::MissingState("job handle"));
        };

        let collected = async {
            let log = self.driver.fetch_log(&job).await?;
            let artifacts = self.driver.fetch_artifacts(&job).await?;
            Ok::<_, BuildError>((log, artifacts))
        }
        .await;
        if let Err(e) = self.driver.release(&job).await {
            warn!(task_id = %task.id, job = %job, error = %e, "Failed to release build job");
        }

        outcome(collected.map(|(log, artifacts)| {
            debug!(task_id = %task.id, artifacts = artifacts.len(), "Collected build results");
            task.result.build_log = log;
            task.result.artifacts = artifacts;
        }))
    }
}

/// Persists the result, promotes the build repository, and reports completion.
pub struct CompleteBuild {
    datastore: Arc<dyn Datastore>,
    coordinator: Arc<RepositoryCoordinator>,
}

impl CompleteBuild {
    pub fn new(datastore: Arc<dyn Datastore>, coordinator: Arc<RepositoryCoordinator>) -> Self {
        Self {
            datastore,
            coordinator,
        }
    }

    async fn promote(
        &self,
        task_id: &TaskId,
        result: &BuildResult,
        product_version: Option<&ProductVersion>,
    ) -> Result<(), BuildError> {
        let promotion = self.coordinator.promote(result, product_version).await?;
        let promoted = promotion.execute().await?;
        debug!(task_id = %task_id, promotion = ?promoted, "Promotion finished");
        Ok(())
    }
}

#[async_trait]
impl Stage for CompleteBuild {
    fn operation(&self) -> Operation {
        Operation::CompletingBuild
    }

    async fn handle(&self, task: &mut BuildTask, _cancel: &CancellationToken) -> StageOutcome {
        task.result.succeed();
        if let Err(e) = self.datastore.persist(&task.result).await {
            return StageOutcome::Abort(e.into());
        }

        if let Err(e) = self
            .promote(&task.id, &task.result, task.product_version.as_ref())
            .await
        {
            // The stored record still says SUCCESS; replace it with the failure.
            task.result.fail(e.to_string());
            if let Err(persist_err) = self.datastore.persist(&task.result).await {
                warn!(
                    task_id = %task.id,
                    error = %persist_err,
                    "Failed to record promotion failure"
                );
            }
            return StageOutcome::Abort(e);
        }

        if let Err(e) = task.transition(Operation::Done) {
            return StageOutcome::Abort(BuildError::Pipeline(e));
        }
        info!(
            task_id = %task.id,
            project = %task.config.project_name,
            artifacts = task.result.artifacts.len(),
            "Build completed"
        );
        task.complete();
        StageOutcome::Continue
    }
}
