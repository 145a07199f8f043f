//! Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use buildrun_core::{
    ArtifactRef, BuildConfiguration, BuildResult, EnvironmentRef, JobId, Operation,
    RepositorySession, ScmInfo, TaskStatus,
};
use buildrun_repository::{InMemoryStore, RepositoryCoordinator};

use crate::datastore::InMemoryDatastore;
use crate::driver::{BuildDriver, JobOutcome};
use crate::error::DriverError;
use crate::pipeline::Pipeline;
use crate::task::{BuildTask, CompletionCallback, StatusCallback};

pub fn build_config(project: &str) -> BuildConfiguration {
    BuildConfiguration::new(
        project,
        ScmInfo::new(format!("https://git.example.com/{project}.git")).with_revision("main"),
        EnvironmentRef::new("jdk17-maven3"),
    )
}

pub fn task_for(project: &str) -> BuildTask {
    BuildTask::new(
        build_config(project),
        None,
        Arc::new(|_| Ok(())),
        Box::new(|_| Ok(())),
    )
}

pub fn noop_task() -> BuildTask {
    task_for("noop")
}

/// Captures what the callbacks of one or more tasks saw.
#[derive(Clone, Default)]
pub struct Recorder {
    operations: Arc<Mutex<Vec<Operation>>>,
    results: Arc<Mutex<Vec<BuildResult>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_callback(&self) -> StatusCallback {
        let operations = self.operations.clone();
        Arc::new(move |status: TaskStatus| {
            operations.lock().unwrap().push(status.operation);
            Ok(())
        })
    }

    pub fn completion_callback(&self) -> CompletionCallback {
        let results = self.results.clone();
        Box::new(move |result| {
            results.lock().unwrap().push(result);
            Ok(())
        })
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().unwrap().clone()
    }

    pub fn results(&self) -> Vec<BuildResult> {
        self.results.lock().unwrap().clone()
    }

    /// Poll until `operation` has been reported.
    pub async fn wait_for(&self, operation: Operation, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.operations().contains(&operation) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {operation}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until `count` completion callbacks have fired.
    pub async fn wait_for_results(&self, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.results.lock().unwrap().len() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} results"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn recording_task(project: &str, recorder: &Recorder) -> BuildTask {
    BuildTask::new(
        build_config(project),
        None,
        recorder.status_callback(),
        recorder.completion_callback(),
    )
}

struct ScriptedJob {
    project: String,
    build_repo_id: String,
}

/// Build driver whose outcome is decided by project name.
///
/// Projects marked failing finish with FAILURE, projects marked hanging never
/// finish, everything else deploys one jar into its build repository.
#[derive(Default)]
pub struct ScriptedBuildDriver {
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    jobs: Mutex<HashMap<JobId, ScriptedJob>>,
    submissions: AtomicUsize,
    artifact_fetches: AtomicUsize,
    cancellations: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedBuildDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_project(&self, project: &str) {
        self.failing.lock().unwrap().insert(project.to_string());
    }

    pub fn hang_project(&self, project: &str) {
        self.hanging.lock().unwrap().insert(project.to_string());
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn artifact_fetches(&self) -> usize {
        self.artifact_fetches.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Jobs submitted and not yet released.
    pub fn live_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    fn project_of(&self, job: &JobId) -> Result<String, DriverError> {
        self.jobs
            .lock()
            .unwrap()
            .get(job)
            .map(|j| j.project.clone())
            .ok_or_else(|| DriverError::UnknownJob(job.clone()))
    }

    fn fails(&self, project: &str) -> bool {
        self.failing.lock().unwrap().contains(project)
    }
}

#[async_trait]
impl BuildDriver for ScriptedBuildDriver {
    async fn submit(
        &self,
        config: &BuildConfiguration,
        session: &RepositorySession,
    ) -> Result<JobId, DriverError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let job = JobId::generate();
        self.jobs.lock().unwrap().insert(
            job.clone(),
            ScriptedJob {
                project: config.project_name.clone(),
                build_repo_id: session.build_repo_id().to_string(),
            },
        );
        Ok(job)
    }

    async fn await_completion(&self, job: &JobId) -> Result<JobOutcome, DriverError> {
        let project = self.project_of(job)?;
        let hangs = self.hanging.lock().unwrap().contains(&project);
        if hangs {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;

        if self.fails(&project) {
            Ok(JobOutcome::Failure)
        } else {
            Ok(JobOutcome::Success)
        }
    }

    async fn fetch_log(&self, job: &JobId) -> Result<String, DriverError> {
        let project = self.project_of(job)?;
        let verdict = if self.fails(&project) { "FAILURE" } else { "SUCCESS" };
        Ok(format!("Building {project}\nFinished: {verdict}\n"))
    }

    async fn fetch_artifacts(&self, job: &JobId) -> Result<Vec<ArtifactRef>, DriverError> {
        self.artifact_fetches.fetch_add(1, Ordering::SeqCst);
        let jobs = self.jobs.lock().unwrap();
        let scripted = jobs
            .get(job)
            .ok_or_else(|| DriverError::UnknownJob(job.clone()))?;

        let project = &scripted.project;
        let filename = format!("{project}-1.0.jar");
        Ok(vec![ArtifactRef::new(
            format!("org.example:{project}:jar:1.0"),
            filename.clone(),
            format!(
                "http://repo/api/hosted/{}/org/example/{project}/1.0/{filename}",
                scripted.build_repo_id
            ),
        )])
    }

    async fn cancel(&self, job: &JobId) -> Result<(), DriverError> {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().remove(job);
        Ok(())
    }

    async fn release(&self, job: &JobId) -> Result<(), DriverError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.jobs
            .lock()
            .unwrap()
            .remove(job)
            .map(|_| ())
            .ok_or_else(|| DriverError::UnknownJob(job.clone()))
    }
}

/// In-memory collaborators wired the way the binary wires the real ones.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub coordinator: Arc<RepositoryCoordinator>,
    pub driver: Arc<ScriptedBuildDriver>,
    pub datastore: Arc<InMemoryDatastore>,
}

impl Harness {
    /// Collaborators with the global repositories already in place.
    pub async fn new() -> Self {
        let harness = Self::without_global_repositories();
        harness.coordinator.ensure_global_repositories().await.unwrap();
        harness
    }

    /// Collaborators over a store holding only the `public` group, so builds
    /// provision but have no shared group to be promoted into.
    pub fn without_global_repositories() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(RepositoryCoordinator::new(store.clone()));

        Self {
            store,
            coordinator,
            driver: Arc::new(ScriptedBuildDriver::new()),
            datastore: Arc::new(InMemoryDatastore::new()),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::standard(
            self.coordinator.clone(),
            self.driver.clone(),
            self.datastore.clone(),
        )
    }
}
