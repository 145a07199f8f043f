//! The fixed stage pipeline every build task runs through.
//!
//! ```text
//! ConfigureRepository -> StartBuild -> WaitForCompletion -> RetrieveResults -> CompleteBuild
//! ```
//!
//! Before a stage runs, the task moves to that stage's operation and the
//! status callback fires. A stage that aborts sends the task to `FAILED`,
//! fires the completion callback with the failed result, and ends the run.

mod stages;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use buildrun_core::{BuildOutcome, Operation};
use buildrun_repository::RepositoryCoordinator;

use crate::datastore::Datastore;
use crate::driver::BuildDriver;
use crate::error::BuildError;
use crate::task::BuildTask;

pub use stages::{CompleteBuild, ConfigureRepository, RetrieveResults, StartBuild, WaitForCompletion};

/// What a stage decided.
#[derive(Debug)]
pub enum StageOutcome {
    /// Move on to the next stage.
    Continue,
    /// Stop the pipeline and fail the task.
    Abort(BuildError),
}

/// One step of the build pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Operation reported while this stage runs.
    fn operation(&self) -> Operation;

    /// Do the stage's work on `task`.
    ///
    /// `cancel` fires when the worker is asked to stop; long waits must watch it.
    async fn handle(&self, task: &mut BuildTask, cancel: &CancellationToken) -> StageOutcome;
}

/// Ordered list of stages.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Pipeline with caller-chosen stages, run in the given order.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The five standard build stages.
    pub fn standard(
        coordinator: Arc<RepositoryCoordinator>,
        driver: Arc<dyn BuildDriver>,
        datastore: Arc<dyn Datastore>,
    ) -> Self {
        Self::new(vec![
            Box::new(ConfigureRepository::new(coordinator.clone())),
            Box::new(StartBuild::new(driver.clone())),
            Box::new(WaitForCompletion::new(driver.clone())),
            Box::new(RetrieveResults::new(driver)),
            Box::new(CompleteBuild::new(datastore, coordinator)),
        ])
    }

    /// Operations of the registered stages, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.stages.iter().map(|stage| stage.operation()).collect()
    }

    /// Drive `task` through every stage, stopping at the first abort.
    pub async fn run(&self, mut task: BuildTask, cancel: CancellationToken) -> BuildOutcome {
        for stage in &self.stages {
            if cancel.is_cancelled() {
                return self.abort(
                    task,
                    BuildError::Cancelled("worker cancelled between stages".to_string()),
                );
            }

            let operation = stage.operation();
            match task.transition(operation) {
                Ok(status) => task.notify_status(status),
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Stage out of order");
                    return self.abort(task, BuildError::Pipeline(e));
                }
            }

            match stage.handle(&mut task, &cancel).await {
                StageOutcome::Continue => {}
                StageOutcome::Abort(reason) => return self.abort(task, reason),
            }
        }

        if task.is_awaiting_completion() {
            // Custom pipelines may leave out CompleteBuild.
            task.result.succeed();
            if let Err(e) = task.transition(Operation::Done) {
                warn!(task_id = %task.id, error = %e, "Could not mark task done");
            }
            task.complete();
        }
        task.result.outcome
    }

    /// Fail a task that never reached a worker.
    pub fn cancel_queued(&self, task: BuildTask, reason: &str) -> BuildOutcome {
        self.abort(task, BuildError::Cancelled(reason.to_string()))
    }

    fn abort(&self, mut task: BuildTask, reason: BuildError) -> BuildOutcome {
        warn!(
            task_id = %task.id,
            project = %task.config.project_name,
            operation = ?task.status().map(|s| s.operation),
            reason = %reason,
            "Build task aborted"
        );

        if reason.is_cancelled() {
            task.result.cancel(reason.to_string());
        } else {
            task.result.fail(reason.to_string());
        }

        match task.transition(Operation::Failed) {
            Ok(status) => task.notify_status(status),
            Err(e) => warn!(task_id = %task.id, error = %e, "Task already terminal"),
        }

        if !task.complete() {
            error!(task_id = %task.id, "Completion callback already fired before abort");
        }
        task.result.outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::{recording_task, Recorder};

    struct Counting {
        operation: Operation,
        calls: Arc<AtomicUsize>,
        abort: bool,
    }

    #[async_trait]
    impl Stage for Counting {
        fn operation(&self) -> Operation {
            self.operation
        }

        async fn handle(&self, _task: &mut BuildTask, _cancel: &CancellationToken) -> StageOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.abort {
                StageOutcome::Abort(BuildError::BuildExecution("scripted".into()))
            } else {
                StageOutcome::Continue
            }
        }
    }

    fn counting(operation: Operation, calls: &Arc<AtomicUsize>, abort: bool) -> Box<dyn Stage> {
        Box::new(Counting {
            operation,
            calls: calls.clone(),
            abort,
        })
    }

    #[tokio::test]
    async fn test_abort_stops_pipeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            counting(Operation::CreateRepository, &calls, false),
            counting(Operation::BuildScheduled, &calls, true),
            counting(Operation::WaitingBuildToComplete, &calls, false),
        ]);
        let recorder = Recorder::new();

        let outcome = pipeline
            .run(recording_task("foo", &recorder), CancellationToken::new())
            .await;

        assert_eq!(outcome, BuildOutcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            recorder.operations(),
            vec![
                Operation::CreateRepository,
                Operation::BuildScheduled,
                Operation::Failed
            ]
        );
        let results = recorder.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, BuildOutcome::Failed);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("scripted"));
    }

    #[tokio::test]
    async fn test_out_of_order_stages_abort() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![
            counting(Operation::BuildScheduled, &calls, false),
            counting(Operation::CreateRepository, &calls, false),
        ]);
        let recorder = Recorder::new();

        let outcome = pipeline
            .run(recording_task("foo", &recorder), CancellationToken::new())
            .await;

        assert_eq!(outcome, BuildOutcome::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.operations(),
            vec![Operation::BuildScheduled, Operation::Failed]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_first_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![counting(Operation::CreateRepository, &calls, false)]);
        let recorder = Recorder::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pipeline.run(recording_task("foo", &recorder), cancel).await;

        assert_eq!(outcome, BuildOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.operations(), vec![Operation::Failed]);
        assert_eq!(recorder.results().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_pipeline_without_complete_stage_still_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(vec![counting(Operation::CreateRepository, &calls, false)]);
        let recorder = Recorder::new();

        let outcome = pipeline
            .run(recording_task("foo", &recorder), CancellationToken::new())
            .await;

        assert_eq!(outcome, BuildOutcome::Success);
        assert_eq!(recorder.results().len(), 1);
    }
}
