//! Pipeline operations and task status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation a build task is performing.
///
/// Variants are declared in pipeline order; the derived `Ord` is that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Provisioning the build's repository group.
    CreateRepository,
    /// Build handed to the build driver.
    BuildScheduled,
    /// Waiting for the remote build to reach an outcome.
    WaitingBuildToComplete,
    /// Collecting log and artifacts from the driver.
    CollectResults,
    /// Persisting the result and promoting artifacts.
    CompletingBuild,
    /// Task finished successfully.
    Done,
    /// Task aborted.
    Failed,
}

impl Operation {
    /// The five stage operations, in the order the pipeline reports them.
    pub const PIPELINE: [Operation; 5] = [
        Operation::CreateRepository,
        Operation::BuildScheduled,
        Operation::WaitingBuildToComplete,
        Operation::CollectResults,
        Operation::CompletingBuild,
    ];

    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Position of a stage operation in [`Operation::PIPELINE`].
    pub fn stage_index(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|op| op == self)
    }

    /// Whether a task currently at `self` may move to `next`.
    ///
    /// Terminal operations accept nothing. `Failed` is reachable from any
    /// non-terminal operation; everything else must move strictly forward.
    pub fn can_transition_to(&self, next: Operation) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Operation::Failed || next > *self
    }

    /// Wire name, e.g. `WAITING_BUILD_TO_COMPLETE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRepository => "CREATE_REPOSITORY",
            Self::BuildScheduled => "BUILD_SCHEDULED",
            Self::WaitingBuildToComplete => "WAITING_BUILD_TO_COMPLETE",
            Self::CollectResults => "COLLECT_RESULTS",
            Self::CompletingBuild => "COMPLETING_BUILD",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of where a task was at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// Snapshot `operation` at the current time.
    pub fn now(operation: Operation) -> Self {
        Self {
            operation,
            timestamp: Utc::now(),
        }
    }
}
