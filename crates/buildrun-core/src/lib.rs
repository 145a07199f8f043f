//! BuildRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Datastores
//! - Runtime specifics
//!
//! Everything here describes a build as the pipeline sees it: what was
//! submitted, where its artifacts live, and how far it has progressed.

pub mod error;
pub mod ids;
pub mod model;
pub mod result;
pub mod session;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{JobId, TaskId};
pub use model::{BuildConfiguration, EnvironmentRef, ProductVersion, ScmInfo};
pub use result::{ArtifactRef, BuildOutcome, BuildResult};
pub use session::RepositorySession;
pub use status::{Operation, TaskStatus};
