//! Build tasks and the callbacks that report on them.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use buildrun_core::{
    BuildConfiguration, BuildResult, CoreError, JobId, Operation, ProductVersion,
    RepositorySession, TaskId, TaskStatus,
};

use crate::error::CallbackError;

/// Receives every status transition of a task, on the task's worker.
pub type StatusCallback = Arc<dyn Fn(TaskStatus) -> Result<(), CallbackError> + Send + Sync>;

/// Receives the final result of a task. Called once.
pub type CompletionCallback = Box<dyn FnOnce(BuildResult) -> Result<(), CallbackError> + Send>;

/// One submitted build, from enqueue until its completion callback fires.
pub struct BuildTask {
    pub id: TaskId,
    pub config: BuildConfiguration,
    pub product_version: Option<ProductVersion>,
    pub submitted_at: DateTime<Utc>,

    /// Job handle from the build driver, set by StartBuild.
    pub job: Option<JobId>,

    /// Result being assembled by the stages.
    pub result: BuildResult,

    session: Option<RepositorySession>,
    history: Vec<TaskStatus>,
    on_status: StatusCallback,
    on_complete: Option<CompletionCallback>,
}

impl BuildTask {
    pub fn new(
        config: BuildConfiguration,
        product_version: Option<ProductVersion>,
        on_status: StatusCallback,
        on_complete: CompletionCallback,
    ) -> Self {
        let id = TaskId::generate();
        let result = BuildResult::new(id.clone(), config.project_name.clone());
        Self {
            id,
            config,
            product_version,
            submitted_at: Utc::now(),
            job: None,
            result,
            session: None,
            history: Vec::new(),
            on_status,
            on_complete: Some(on_complete),
        }
    }

    /// Latest status, if the task has entered any stage.
    pub fn status(&self) -> Option<TaskStatus> {
        self.history.last().copied()
    }

    /// Every status the task has been through, oldest first.
    pub fn history(&self) -> &[TaskStatus] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.status()
            .map(|status| status.operation.is_terminal())
            .unwrap_or(false)
    }

    pub fn session(&self) -> Option<&RepositorySession> {
        self.session.as_ref()
    }

    /// Attach the repository session. The first session wins; later ones are ignored.
    pub fn attach_session(&mut self, session: RepositorySession) {
        if self.session.is_some() {
            error!(task_id = %self.id, "Repository session already attached");
            return;
        }
        self.result.build_repo_id = Some(session.build_repo_id().to_string());
        self.session = Some(session);
    }

    /// Move the task to `operation` and record it in the history.
    ///
    /// Does not notify the status callback; see [`notify_status`](Self::notify_status).
    pub fn transition(&mut self, operation: Operation) -> Result<TaskStatus, CoreError> {
        if let Some(current) = self.status() {
            if !current.operation.can_transition_to(operation) {
                return Err(CoreError::InvalidStateTransition {
                    from: current.operation,
                    to: operation,
                });
            }
        }

        let status = TaskStatus::now(operation);
        self.history.push(status);
        info!(
            task_id = %self.id,
            project = %self.config.project_name,
            operation = %operation,
            "Task status changed"
        );
        Ok(status)
    }

    /// Hand `status` to the status callback. Failures are logged and swallowed.
    pub fn notify_status(&self, status: TaskStatus) {
        let callback = self.on_status.clone();
        if let Err(e) = guard_callback(|| callback(status)) {
            error!(
                task_id = %self.id,
                operation = %status.operation,
                error = %e,
                "Status callback failed"
            );
        }
    }

    /// Fire the completion callback with the current result.
    ///
    /// Returns false if it had already fired.
    pub fn complete(&mut self) -> bool {
        let Some(on_complete) = self.on_complete.take() else {
            return false;
        };

        let result = self.result.clone();
        if let Err(e) = guard_callback(move || on_complete(result)) {
            error!(task_id = %self.id, error = %e, "Completion callback failed");
        }
        true
    }

    /// Whether the completion callback is still pending.
    pub fn is_awaiting_completion(&self) -> bool {
        self.on_complete.is_some()
    }
}

impl fmt::Debug for BuildTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildTask")
            .field("id", &self.id)
            .field("project", &self.config.project_name)
            .field("product_version", &self.product_version)
            .field("status", &self.status())
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

/// Run a caller-supplied callback, turning a panic into a [`CallbackError`].
fn guard_callback<F>(callback: F) -> Result<(), CallbackError>
where
    F: FnOnce() -> Result<(), CallbackError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(CallbackError::Panicked(message))
        }
    }
}
