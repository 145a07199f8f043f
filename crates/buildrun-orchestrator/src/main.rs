//! BuildRun Orchestrator
//!
//! Provisions repositories, runs the builds named on the command line through
//! the pipeline, and exits once they have all completed.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use buildrun_core::{BuildConfiguration, BuildResult, EnvironmentRef, ProductVersion, ScmInfo, TaskStatus};
use buildrun_orchestrator::{
    BuildOrchestrator, CallbackError, Config, JsonLinesDatastore, Pipeline, ShellBuildDriver,
};
use buildrun_repository::{HttpStoreClient, InMemoryStore, RepositoryCoordinator, RepositoryStoreService};

/// A build given on the command line: `PROJECT=SCM_URL[#REVISION]`.
#[derive(Debug, Clone)]
struct BuildArg {
    project: String,
    scm_url: String,
    revision: Option<String>,
}

impl FromStr for BuildArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (project, scm) = s
            .split_once('=')
            .ok_or_else(|| format!("expected PROJECT=SCM_URL[#REVISION], got '{s}'"))?;
        let (scm_url, revision) = match scm.split_once('#') {
            Some((url, rev)) => (url, Some(rev.to_string())),
            None => (scm, None),
        };
        Ok(Self {
            project: project.to_string(),
            scm_url: scm_url.to_string(),
            revision,
        })
    }
}

fn parse_product(s: &str) -> Result<ProductVersion, String> {
    let (name, version) = s
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VERSION, got '{s}'"))?;
    Ok(ProductVersion::new(name, version))
}

/// BuildRun build orchestrator.
///
/// Options left out fall back to [`Config::default`].
#[derive(Parser, Debug)]
#[command(name = "buildrun-orchestrator", about = "Run builds through per-build artifact repositories")]
struct Args {
    /// Repository manager base URL
    #[arg(long)]
    store_url: Option<String>,

    /// Seconds to wait for each repository manager request
    #[arg(long)]
    store_timeout_secs: Option<u64>,

    /// Keep repositories in memory instead of talking to a repository manager
    #[arg(long)]
    in_memory_store: bool,

    /// Builds allowed to run at once
    #[arg(long)]
    max_concurrent_builds: Option<usize>,

    /// File receiving completed build results as JSON lines
    #[arg(long)]
    datastore: Option<PathBuf>,

    /// Shell command run for each build
    #[arg(long)]
    build_command: Option<String>,

    /// Directory for per-build working directories
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Build environment id handed to the build command
    #[arg(long, default_value = "default")]
    environment: String,

    /// Product version (NAME:VERSION) the builds contribute to
    #[arg(long, value_parser = parse_product)]
    product: Option<ProductVersion>,

    /// Builds to run, as PROJECT=SCM_URL[#REVISION]
    builds: Vec<BuildArg>,
}

impl Args {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            store_url: self.store_url.clone().unwrap_or(defaults.store_url),
            store_timeout: self
                .store_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.store_timeout),
            max_concurrent_builds: self
                .max_concurrent_builds
                .unwrap_or(defaults.max_concurrent_builds),
            datastore_path: self.datastore.clone().unwrap_or(defaults.datastore_path),
            build_command: self.build_command.clone().unwrap_or(defaults.build_command),
            work_dir: self.work_dir.clone().unwrap_or(defaults.work_dir),
        }
    }
}

fn report(result: &BuildResult) {
    if result.is_success() {
        info!(
            task_id = %result.task_id,
            project = %result.project_name,
            build_repo = ?result.build_repo_id,
            artifacts = result.artifacts.len(),
            "Build succeeded"
        );
    } else {
        warn!(
            task_id = %result.task_id,
            project = %result.project_name,
            outcome = ?result.outcome,
            error = ?result.error,
            "Build did not succeed"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("buildrun=info".parse()?))
        .init();

    let config = args.config();
    info!(
        store_url = %config.store_url,
        in_memory = args.in_memory_store,
        max_concurrent_builds = config.max_concurrent_builds,
        builds = args.builds.len(),
        "BuildRun orchestrator starting"
    );

    let store: Arc<dyn RepositoryStoreService> = if args.in_memory_store {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(HttpStoreClient::new(&config.store_url, config.store_timeout)?)
    };
    let coordinator = Arc::new(RepositoryCoordinator::new(store));

    // Nothing can build without the shared repositories.
    if let Err(e) = coordinator.ensure_global_repositories().await {
        error!(error = %e, "Failed to provision global repositories");
        return Err(e.into());
    }

    let pipeline = Pipeline::standard(
        coordinator,
        Arc::new(ShellBuildDriver::new(
            config.build_command.clone(),
            config.work_dir.clone(),
        )),
        Arc::new(JsonLinesDatastore::new(config.datastore_path.clone())),
    );
    let orchestrator = BuildOrchestrator::new(pipeline, config.max_concurrent_builds);
    orchestrator.start();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<BuildResult>();
    let mut submitted = 0usize;
    for build in &args.builds {
        let build_config = BuildConfiguration::new(
            build.project.clone(),
            ScmInfo {
                url: build.scm_url.clone(),
                revision: build.revision.clone(),
            },
            EnvironmentRef::new(args.environment.clone()),
        );

        let project = build.project.clone();
        let tx = done_tx.clone();
        let submission = orchestrator.submit(
            build_config,
            args.product.clone(),
            Arc::new(move |status: TaskStatus| {
                debug!(project = %project, operation = %status.operation, "Build progress");
                Ok(())
            }),
            Box::new(move |result| {
                tx.send(result)
                    .map_err(|e| CallbackError::Failed(format!("result receiver gone: {e}")))
            }),
        );
        match submission {
            Ok(task_id) => {
                submitted += 1;
                info!(task_id = %task_id, project = %build.project, "Build queued");
            }
            Err(e) => error!(project = %build.project, error = %e, "Build rejected"),
        }
    }
    drop(done_tx);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut failed = 0usize;
    let mut received = 0usize;
    if args.builds.is_empty() {
        info!("No builds given, running until interrupted");
    }
    loop {
        if !args.builds.is_empty() && received == submitted {
            break;
        }

        tokio::select! {
            result = done_rx.recv(), if received < submitted => match result {
                Some(result) => {
                    received += 1;
                    if !result.is_success() {
                        failed += 1;
                    }
                    report(&result);
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                warn!("Interrupted, cancelling outstanding builds");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    while let Ok(result) = done_rx.try_recv() {
        received += 1;
        if !result.is_success() {
            failed += 1;
        }
        report(&result);
    }

    info!(submitted, completed = received, failed, "BuildRun orchestrator stopped");
    if failed > 0 || submitted < args.builds.len() {
        return Err(format!(
            "{} of {} builds did not succeed",
            failed + (args.builds.len() - submitted),
            args.builds.len()
        )
        .into());
    }
    Ok(())
}
