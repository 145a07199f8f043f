//! Build result persistence.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use buildrun_core::BuildResult;

use crate::error::DatastoreError;

/// Where completed build results are recorded.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Record `result`. A later call for the same task supersedes earlier ones.
    async fn persist(&self, result: &BuildResult) -> Result<(), DatastoreError>;
}

/// Keeps the latest result of each task in memory, in first-persisted order.
#[derive(Default)]
pub struct InMemoryDatastore {
    results: Mutex<Vec<BuildResult>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything persisted so far.
    pub fn results(&self) -> Vec<BuildResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn persist(&self, result: &BuildResult) -> Result<(), DatastoreError> {
        let mut results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        match results.iter_mut().find(|r| r.task_id == result.task_id) {
            Some(existing) => *existing = result.clone(),
            None => results.push(result.clone()),
        }
        Ok(())
    }
}

/// Appends each result as one JSON line to a file.
///
/// Readers take the last line written for a task as its result.
pub struct JsonLinesDatastore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesDatastore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl Datastore for JsonLinesDatastore {
    async fn persist(&self, result: &BuildResult) -> Result<(), DatastoreError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');

        // Whole lines only; concurrent workers must not interleave writes.
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(task_id = %result.task_id, path = %self.path.display(), "Build result persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrun_core::TaskId;

    #[tokio::test]
    async fn test_in_memory_datastore() {
        let store = InMemoryDatastore::new();
        assert!(store.is_empty());

        store
            .persist(&BuildResult::new(TaskId::generate(), "foo"))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.results()[0].project_name, "foo");
    }

    #[tokio::test]
    async fn test_in_memory_datastore_replaces_same_task() {
        let store = InMemoryDatastore::new();
        let mut result = BuildResult::new(TaskId::generate(), "foo");
        result.succeed();
        store.persist(&result).await.unwrap();
        store
            .persist(&BuildResult::new(TaskId::generate(), "bar"))
            .await
            .unwrap();

        result.fail("promotion failed");
        store.persist(&result).await.unwrap();

        let results = store.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], result);
        assert_eq!(results[1].project_name, "bar");
    }

    #[tokio::test]
    async fn test_json_lines_datastore_appends() {
        let path = std::env::temp_dir().join(format!("buildrun-{}.jsonl", TaskId::generate()));
        let store = JsonLinesDatastore::new(&path);

        let mut first = BuildResult::new(TaskId::generate(), "first");
        first.succeed();
        store.persist(&first).await.unwrap();
        store
            .persist(&BuildResult::new(TaskId::generate(), "second"))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<BuildResult> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], first);
        assert_eq!(lines[1].project_name, "second");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
