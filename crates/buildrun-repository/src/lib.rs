//! Repository provisioning for BuildRun.
//!
//! Talks to an external artifact-repository manager to give every build its
//! own hosted repository and resolution group, and to promote a successful
//! build's repository into the product or shared layer afterwards.

pub mod client;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod promotion;
pub mod store;

pub use client::HttpStoreClient;
pub use coordinator::{
    sanitize, RepositoryCoordinator, PUBLIC_GROUP_ID, SHARED_IMPORTS_ID, SHARED_RELEASES_ID,
};
pub use error::{RepositoryProvisioningError, StoreClientError};
pub use memory::InMemoryStore;
pub use promotion::{PromotionHandle, PromotionOutcome};
pub use store::{Group, HostedRepository, RepositoryStoreService, StoreDescriptor, StoreKey, StoreType};
