//! Build results and artifact references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Final outcome of a build task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildOutcome {
    /// Not decided yet.
    #[default]
    Pending,
    /// Build succeeded, result persisted, artifacts promoted.
    Success,
    /// Some stage aborted the task.
    Failed,
    /// The worker was cancelled, usually by service shutdown.
    Cancelled,
}

impl BuildOutcome {
    /// Returns true if the outcome is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// An artifact a build deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Coordinates, e.g. `org.example:foo:jar:1.0`.
    pub identifier: String,

    /// File name within the repository.
    pub filename: String,

    /// URL the artifact was deployed to. Embeds the owning hosted store id.
    pub deploy_url: String,
}

impl ArtifactRef {
    pub fn new(
        identifier: impl Into<String>,
        filename: impl Into<String>,
        deploy_url: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            filename: filename.into(),
            deploy_url: deploy_url.into(),
        }
    }
}

/// Everything the pipeline learned about one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub task_id: TaskId,
    pub project_name: String,
    pub outcome: BuildOutcome,
    pub build_log: String,
    pub artifacts: Vec<ArtifactRef>,

    /// Build repository the artifacts were deployed into, if one was provisioned.
    pub build_repo_id: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Why the task failed, if it did.
    pub error: Option<String>,
}

impl BuildResult {
    /// Empty placeholder for a task that has just started.
    pub fn new(task_id: TaskId, project_name: impl Into<String>) -> Self {
        Self {
            task_id,
            project_name: project_name.into(),
            outcome: BuildOutcome::Pending,
            build_log: String::new(),
            artifacts: Vec::new(),
            build_repo_id: None,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Mark the result as successful.
    pub fn succeed(&mut self) {
        self.outcome = BuildOutcome::Success;
        self.finished_at = Some(Utc::now());
    }

    /// Mark the result as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.outcome = BuildOutcome::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Mark the result as cancelled.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.outcome = BuildOutcome::Cancelled;
        self.finished_at = Some(Utc::now());
        self.error = Some(reason.into());
    }

    pub fn is_success(&self) -> bool {
        self.outcome == BuildOutcome::Success
    }
}
