//! Local build driver running a shell command per build.
//!
//! The command runs under `sh -c` in a per-job directory, with the build's
//! repository coordinates in its environment:
//!
//! | variable                  | value                                        |
//! |---------------------------|----------------------------------------------|
//! | `BUILDRUN_PROJECT`        | project name                                 |
//! | `BUILDRUN_SCM_URL`        | SCM url                                      |
//! | `BUILDRUN_SCM_REVISION`   | SCM revision, empty when not set             |
//! | `BUILDRUN_BUILD_REPO`     | build repository id                          |
//! | `BUILDRUN_REPOSITORY_URL` | tracking URL to resolve dependencies through |
//! | `BUILDRUN_DEPLOY_URL`     | tracking URL of the hosted build repository  |
//! | `BUILDRUN_ENVIRONMENT`    | environment id                               |
//! | `BUILDRUN_ENV_<KEY>`      | each environment attribute, key uppercased   |
//!
//! Combined stdout and stderr form the build log. Artifacts are read back
//! from Maven's upload lines in that log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, LazyLock, Mutex, OnceLock, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use buildrun_core::{ArtifactRef, BuildConfiguration, JobId, RepositorySession};

use crate::driver::{BuildDriver, JobOutcome};
use crate::error::DriverError;

/// `Uploaded to <repo>: <url> (<size>)` from Maven 3.5+, `Uploaded: <url>` before that.
static UPLOADED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Uploaded(?: to [^:\s]+)?: (\S+)").expect("Invalid regex pattern")
});

const SKIPPED_SUFFIXES: [&str; 5] = [".md5", ".sha1", ".sha256", ".sha512", ".asc"];

/// Deploy URL for the hosted build repository behind a tracking URL.
///
/// `.../folo/track/<id>/group/<id>` becomes `.../folo/track/<id>/hosted/<id>`.
/// URLs without a trailing group segment are returned unchanged.
pub fn deploy_url(tracking_url: &str) -> String {
    let trimmed = tracking_url.trim_end_matches('/');
    let Some((prefix, id)) = trimmed.rsplit_once('/') else {
        return tracking_url.to_string();
    };
    match prefix.strip_suffix("/group") {
        Some(base) if !id.is_empty() => format!("{base}/hosted/{id}"),
        _ => tracking_url.to_string(),
    }
}

/// Artifacts named by Maven upload lines in a build log.
///
/// Checksums, signatures and `maven-metadata.xml` are skipped, as are
/// repeated uploads of the same URL.
pub fn parse_uploaded_artifacts(log: &str) -> Vec<ArtifactRef> {
    let mut artifacts: Vec<ArtifactRef> = Vec::new();
    for caps in log.lines().filter_map(|line| UPLOADED.captures(line)) {
        let url = &caps[1];
        let Some(filename) = url.rsplit('/').next().filter(|f| !f.is_empty()) else {
            continue;
        };
        if filename.starts_with("maven-metadata")
            || SKIPPED_SUFFIXES.iter().any(|suffix| filename.ends_with(suffix))
        {
            continue;
        }
        if artifacts.iter().any(|a| a.deploy_url == url) {
            continue;
        }
        artifacts.push(ArtifactRef::new(
            artifact_identifier(url, filename),
            filename,
            url,
        ));
    }
    artifacts
}

/// `group:artifact:version:filename` from a Maven repository path.
///
/// The path is taken after the `hosted/<id>` segments; without them the
/// filename alone is used.
fn artifact_identifier(url: &str, filename: &str) -> String {
    let segments: Vec<&str> = url.split('/').collect();
    let Some(hosted) = segments.iter().position(|s| *s == "hosted") else {
        return filename.to_string();
    };
    let path = segments.get(hosted + 2..).unwrap_or_default();
    if path.len() < 4 {
        return filename.to_string();
    }

    let n = path.len();
    let group = path[..n - 3].join(".");
    format!("{}:{}:{}:{}", group, path[n - 3], path[n - 2], filename)
}

struct JobRecord {
    outcome: JobOutcome,
    log: String,
}

struct Job {
    project: String,
    dir: PathBuf,
    process: tokio::sync::Mutex<Option<JoinHandle<std::io::Result<Output>>>>,
    abort: AbortHandle,
    record: OnceLock<JobRecord>,
}

/// [`BuildDriver`] running builds as local child processes.
pub struct ShellBuildDriver {
    command: String,
    work_dir: PathBuf,
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
}

impl ShellBuildDriver {
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            work_dir: work_dir.into(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn job(&self, id: &JobId) -> Result<Arc<Job>, DriverError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::UnknownJob(id.clone()))
    }

    fn forget(&self, id: &JobId) -> Result<Arc<Job>, DriverError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| DriverError::UnknownJob(id.clone()))
    }

    fn finished(&self, id: &JobId) -> Result<Arc<Job>, DriverError> {
        let job = self.job(id)?;
        if job.record.get().is_none() {
            return Err(DriverError::Failed(format!("job {id} has not finished")));
        }
        Ok(job)
    }
}

#[async_trait]
impl BuildDriver for ShellBuildDriver {
    async fn submit(
        &self,
        config: &BuildConfiguration,
        session: &RepositorySession,
    ) -> Result<JobId, DriverError> {
        let id = JobId::generate();
        let dir = self.work_dir.join(id.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(config.build_script.as_deref().unwrap_or(&self.command))
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("BUILDRUN_PROJECT", &config.project_name)
            .env("BUILDRUN_SCM_URL", &config.scm.url)
            .env(
                "BUILDRUN_SCM_REVISION",
                config.scm.revision.as_deref().unwrap_or_default(),
            )
            .env("BUILDRUN_BUILD_REPO", session.build_repo_id())
            .env("BUILDRUN_REPOSITORY_URL", session.tracking_url())
            .env("BUILDRUN_DEPLOY_URL", deploy_url(session.tracking_url()))
            .env("BUILDRUN_ENVIRONMENT", &config.environment.id);
        for (key, value) in &config.environment.attributes {
            cmd.env(format!("BUILDRUN_ENV_{}", key.to_ascii_uppercase()), value);
        }

        let child = cmd
            .spawn()
            .map_err(|e| DriverError::Submit(format!("failed to spawn build command: {e}")))?;
        let process = tokio::spawn(child.wait_with_output());

        info!(
            job = %id,
            project = %config.project_name,
            work_dir = %dir.display(),
            "Build process started"
        );

        let job = Job {
            project: config.project_name.clone(),
            dir,
            abort: process.abort_handle(),
            process: tokio::sync::Mutex::new(Some(process)),
            record: OnceLock::new(),
        };
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(job));
        Ok(id)
    }

    async fn await_completion(&self, id: &JobId) -> Result<JobOutcome, DriverError> {
        let job = self.job(id)?;
        let mut process = job.process.lock().await;
        if let Some(record) = job.record.get() {
            return Ok(record.outcome);
        }
        let Some(handle) = process.take() else {
            return Err(DriverError::Failed(format!("job {id} was cancelled")));
        };

        let output = match handle.await {
            Ok(output) => output?,
            Err(e) if e.is_cancelled() => {
                return Err(DriverError::Failed(format!("job {id} was cancelled")));
            }
            Err(e) => return Err(DriverError::Failed(e.to_string())),
        };

        let outcome = if output.status.success() {
            JobOutcome::Success
        } else {
            JobOutcome::Failure
        };
        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        debug!(
            job = %id,
            project = %job.project,
            status = %output.status,
            log_bytes = log.len(),
            "Build process exited"
        );
        let record = job.record.get_or_init(|| JobRecord { outcome, log });
        Ok(record.outcome)
    }

    async fn fetch_log(&self, id: &JobId) -> Result<String, DriverError> {
        let job = self.finished(id)?;
        Ok(job
            .record
            .get()
            .map(|record| record.log.clone())
            .unwrap_or_default())
    }

    async fn fetch_artifacts(&self, id: &JobId) -> Result<Vec<ArtifactRef>, DriverError> {
        let job = self.finished(id)?;
        Ok(job
            .record
            .get()
            .map(|record| parse_uploaded_artifacts(&record.log))
            .unwrap_or_default())
    }

    async fn cancel(&self, id: &JobId) -> Result<(), DriverError> {
        let job = self.forget(id)?;
        if job.record.get().is_none() {
            warn!(job = %id, project = %job.project, "Killing build process");
            job.abort.abort();
        }
        if let Err(e) = remove_job_dir(&job.dir).await {
            warn!(job = %id, work_dir = %job.dir.display(), error = %e, "Failed to remove job directory");
        }
        Ok(())
    }

    async fn release(&self, id: &JobId) -> Result<(), DriverError> {
        let job = self.forget(id)?;
        remove_job_dir(&job.dir).await?;
        debug!(job = %id, project = %job.project, "Build job released");
        Ok(())
    }
}

async fn remove_job_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use buildrun_core::{EnvironmentRef, ScmInfo};

    const LOG: &str = "\
[INFO] --- maven-deploy-plugin:2.8.2:deploy (default-deploy) @ foo ---
Uploading to build: http://repo/api/folo/track/b1/hosted/b1/org/example/foo/1.0/foo-1.0.jar
Uploaded to build: http://repo/api/folo/track/b1/hosted/b1/org/example/foo/1.0/foo-1.0.jar (2.1 kB at 10 kB/s)
Uploaded to build: http://repo/api/folo/track/b1/hosted/b1/org/example/foo/1.0/foo-1.0.jar.sha1 (40 B at 1 kB/s)
Uploaded to build: http://repo/api/folo/track/b1/hosted/b1/org/example/foo/1.0/foo-1.0.pom (1.2 kB at 6 kB/s)
Uploaded to build: http://repo/api/folo/track/b1/hosted/b1/org/example/foo/maven-metadata.xml (300 B at 3 kB/s)
Uploaded: http://repo/api/hosted/b1/org/example/bar/2.0/bar-2.0.jar (5 KB at 20.0 KB/sec)
[INFO] BUILD SUCCESS
";

    fn session() -> RepositorySession {
        RepositorySession::new(
            "build+foo+1",
            None,
            "http://repo/api/folo/track/build+foo+1/group/build+foo+1",
        )
    }

    fn config(script: &str) -> BuildConfiguration {
        BuildConfiguration::new(
            "foo",
            ScmInfo::new("https://git.example.com/foo.git"),
            EnvironmentRef::new("local"),
        )
        .with_build_script(script)
    }

    fn work_dir() -> PathBuf {
        std::env::temp_dir().join(format!("buildrun-shell-{}", JobId::generate()))
    }

    #[test]
    fn test_deploy_url_from_tracking_url() {
        assert_eq!(
            deploy_url("http://repo/api/folo/track/b1/group/b1"),
            "http://repo/api/folo/track/b1/hosted/b1"
        );
        assert_eq!(deploy_url("http://repo/api/other"), "http://repo/api/other");
    }

    #[test]
    fn test_parse_uploaded_artifacts() {
        let artifacts = parse_uploaded_artifacts(LOG);
        let names: Vec<_> = artifacts.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["foo-1.0.jar", "foo-1.0.pom", "bar-2.0.jar"]);

        assert_eq!(artifacts[0].identifier, "org.example:foo:1.0:foo-1.0.jar");
        assert_eq!(artifacts[2].identifier, "org.example:bar:2.0:bar-2.0.jar");
        assert!(artifacts[0].deploy_url.ends_with("/hosted/b1/org/example/foo/1.0/foo-1.0.jar"));
    }

    #[test]
    fn test_parsed_artifacts_name_build_repository() {
        let artifacts = parse_uploaded_artifacts(LOG);
        assert_eq!(
            buildrun_repository::coordinator::find_build_repo_id(&artifacts).as_deref(),
            Some("b1")
        );
    }

    #[tokio::test]
    async fn test_successful_process() {
        let dir = work_dir();
        let driver = ShellBuildDriver::new("true", &dir);
        let script = "echo \"building $BUILDRUN_PROJECT\"; \
                      echo \"Uploaded to build: $BUILDRUN_DEPLOY_URL/org/example/foo/1.0/foo-1.0.jar\"";

        let job = driver.submit(&config(script), &session()).await.unwrap();
        assert_eq!(driver.await_completion(&job).await.unwrap(), JobOutcome::Success);

        let log = driver.fetch_log(&job).await.unwrap();
        assert!(log.contains("building foo"));
        let artifacts = driver.fetch_artifacts(&job).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(
            buildrun_repository::coordinator::find_build_repo_id(&artifacts).as_deref(),
            Some("build+foo+1")
        );

        assert!(dir.join(job.as_str()).is_dir());
        driver.release(&job).await.unwrap();
        assert!(!dir.join(job.as_str()).exists());
        assert!(matches!(
            driver.fetch_artifacts(&job).await.unwrap_err(),
            DriverError::UnknownJob(_)
        ));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_process() {
        let dir = work_dir();
        let driver = ShellBuildDriver::new("true", &dir);

        let job = driver
            .submit(&config("echo broken >&2; exit 3"), &session())
            .await
            .unwrap();
        assert_eq!(driver.await_completion(&job).await.unwrap(), JobOutcome::Failure);
        assert!(driver.fetch_log(&job).await.unwrap().contains("broken"));

        driver.release(&job).await.unwrap();
        assert!(!dir.join(job.as_str()).exists());
        assert!(driver.jobs.lock().unwrap().is_empty());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let dir = work_dir();
        let driver = Arc::new(ShellBuildDriver::new("sleep 30", &dir));
        let job = driver
            .submit(
                &BuildConfiguration::new(
                    "foo",
                    ScmInfo::new("https://git.example.com/foo.git"),
                    EnvironmentRef::new("local"),
                ),
                &session(),
            )
            .await
            .unwrap();

        let waiter = {
            let driver = driver.clone();
            let job = job.clone();
            tokio::spawn(async move { driver.await_completion(&job).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.cancel(&job).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("cancel should end the wait")
            .unwrap();
        assert!(result.is_err());
        assert!(driver.fetch_log(&job).await.is_err());
        assert!(driver.jobs.lock().unwrap().is_empty());
        assert!(!dir.join(job.as_str()).exists());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let driver = ShellBuildDriver::new("true", work_dir());
        let err = driver.await_completion(&JobId::new("missing")).await.unwrap_err();
        assert!(matches!(err, DriverError::UnknownJob(_)));

        let err = driver.release(&JobId::new("missing")).await.unwrap_err();
        assert!(matches!(err, DriverError::UnknownJob(_)));
    }
}
