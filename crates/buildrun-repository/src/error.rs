//! Error types for repository provisioning.

use thiserror::Error;

/// Errors raised by a [`RepositoryStoreService`](crate::RepositoryStoreService).
#[derive(Debug, Error)]
pub enum StoreClientError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The repository manager answered with an unexpected status.
    #[error("unexpected status {status} from {path}")]
    Status { status: u16, path: String },

    /// Store does not exist.
    #[error("store not found: {0}")]
    NotFound(String),

    /// Store already exists (create lost a race with another client).
    #[error("store already exists: {0}")]
    AlreadyExists(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed `type:name` store key.
    #[error("invalid store key: {0}")]
    InvalidStoreKey(String),
}

/// Failure to provision, look up, or promote build repositories.
#[derive(Debug, Error)]
pub enum RepositoryProvisioningError {
    #[error("failed to setup shared-releases or shared-imports repository: {0}")]
    GlobalRepositories(#[source] StoreClientError),

    #[error("failed to setup product-local hosted repository or group {repo_id}: {source}")]
    ProductRepositories {
        repo_id: String,
        #[source]
        source: StoreClientError,
    },

    #[error("failed to setup build-local hosted repository or group {repo_id}: {source}")]
    BuildRepositories {
        repo_id: String,
        #[source]
        source: StoreClientError,
    },

    #[error("failed to resolve tracking url for {repo_id}: {source}")]
    TrackingUrl {
        repo_id: String,
        #[source]
        source: StoreClientError,
    },

    #[error("failed to promote {build_repo_id} into {target}: {source}")]
    Promotion {
        build_repo_id: String,
        target: String,
        #[source]
        source: StoreClientError,
    },

    #[error("failed to look up promotion target {target}: {source}")]
    PromotionTarget {
        target: String,
        #[source]
        source: StoreClientError,
    },

    #[error("promotion target group {0} does not exist")]
    MissingPromotionTarget(String),
}
