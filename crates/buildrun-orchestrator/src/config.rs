//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Repository manager base URL. `/api` is appended when missing.
    pub store_url: String,

    /// Per-request timeout for repository manager calls.
    pub store_timeout: Duration,

    /// Builds allowed to run at once; further submissions wait in the queue.
    pub max_concurrent_builds: usize,

    /// JSON lines file receiving every completed build result.
    pub datastore_path: PathBuf,

    /// Shell command run for each build by the local build driver.
    pub build_command: String,

    /// Directory holding per-build checkouts.
    pub work_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: "http://localhost:8080".to_string(),
            store_timeout: Duration::from_secs(30),
            max_concurrent_builds: 8,
            datastore_path: PathBuf::from("buildrun-results.jsonl"),
            build_command: "mvn -B clean deploy".to_string(),
            work_dir: PathBuf::from("work"),
        }
    }
}
