//! Build orchestrator - admits tasks and runs them through the pipeline.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use buildrun_core::{BuildConfiguration, ProductVersion, TaskId};

use crate::error::{BuildError, QueueError};
use crate::pipeline::Pipeline;
use crate::queue::BuildQueue;
use crate::task::{BuildTask, CompletionCallback, StatusCallback};

/// Accepts build submissions and drives each one through the pipeline on
/// its own tokio task, at most `max_concurrent_builds` at a time.
pub struct BuildOrchestrator {
    queue: Arc<BuildQueue>,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    max_concurrent_builds: usize,
    shutdown: CancellationToken,
    workers: TaskTracker,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BuildOrchestrator {
    pub fn new(pipeline: Pipeline, max_concurrent_builds: usize) -> Self {
        let max_concurrent_builds = max_concurrent_builds.max(1);
        Self {
            queue: Arc::new(BuildQueue::new()),
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(max_concurrent_builds)),
            max_concurrent_builds,
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start dispatching queued tasks. Calling it again does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        if dispatcher.is_some() || self.shutdown.is_cancelled() {
            return;
        }

        info!(
            max_concurrent_builds = self.max_concurrent_builds,
            stages = ?self.pipeline.operations(),
            "Starting build orchestrator"
        );
        *dispatcher = Some(tokio::spawn(dispatch(
            self.queue.clone(),
            self.pipeline.clone(),
            self.permits.clone(),
            self.shutdown.clone(),
            self.workers.clone(),
        )));
    }

    /// Queue a build.
    ///
    /// The configuration is checked here; a malformed one is rejected and never
    /// queued. Once queued, `on_status` sees every stage the task enters and
    /// `on_complete` fires exactly once with the final result.
    pub fn submit(
        &self,
        config: BuildConfiguration,
        product_version: Option<ProductVersion>,
        on_status: StatusCallback,
        on_complete: CompletionCallback,
    ) -> Result<TaskId, BuildError> {
        config.validate()?;
        if let Some(product) = &product_version {
            product.validate()?;
        }
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Shutdown.into());
        }

        let task = BuildTask::new(config, product_version, on_status, on_complete);
        let task_id = task.id.clone();
        info!(
            task_id = %task_id,
            project = %task.config.project_name,
            product = ?task.product_version,
            "Build submitted"
        );
        self.queue.enqueue(task)?;
        Ok(task_id)
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Tasks currently held by a worker.
    pub fn active_builds(&self) -> usize {
        self.max_concurrent_builds - self.permits.available_permits()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting builds, cancel running ones, and wait for every worker.
    ///
    /// Tasks still queued are failed as cancelled, so every submitted task
    /// gets its completion callback.
    pub async fn shutdown(&self) {
        info!(
            queued = self.queued(),
            active = self.active_builds(),
            "Shutting down build orchestrator"
        );
        self.shutdown.cancel();
        self.queue.shutdown();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher ended abnormally");
            }
        }

        for task in self.queue.drain().await {
            self.pipeline
                .cancel_queued(task, "orchestrator shut down before the build started");
        }

        self.workers.close();
        self.workers.wait().await;
        info!("Build orchestrator stopped");
    }
}

/// Take a worker slot, then a task, then hand both to a new worker.
async fn dispatch(
    queue: Arc<BuildQueue>,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    workers: TaskTracker,
) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let task = match queue.dequeue().await {
            Ok(task) => task,
            Err(QueueError::Shutdown) => break,
        };

        let pipeline = pipeline.clone();
        let cancel = shutdown.child_token();
        workers.spawn(async move {
            let _permit = permit;
            let task_id = task.id.clone();
            let outcome = pipeline.run(task, cancel).await;
            debug!(task_id = %task_id, outcome = ?outcome, "Worker finished");
        });
    }
    debug!("Dispatcher stopped");
}
