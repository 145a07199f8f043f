//! BuildRun Orchestrator Library
//!
//! Queues build tasks and drives each one through the five-stage build
//! pipeline, provisioning repositories through `buildrun-repository`.

pub mod config;
pub mod datastore;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod shell_driver;
pub mod task;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use datastore::{Datastore, InMemoryDatastore, JsonLinesDatastore};
pub use driver::{BuildDriver, JobOutcome};
pub use error::{BuildError, CallbackError, DatastoreError, DriverError, QueueError};
pub use orchestrator::BuildOrchestrator;
pub use pipeline::{Pipeline, Stage, StageOutcome};
pub use queue::BuildQueue;
pub use shell_driver::ShellBuildDriver;
pub use task::{BuildTask, CompletionCallback, StatusCallback};
