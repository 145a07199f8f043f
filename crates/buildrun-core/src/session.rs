//! Repository session handed from provisioning to the rest of the pipeline.

use serde::{Deserialize, Serialize};

/// Repositories provisioned for one build.
///
/// Created once by the ConfigureRepository stage and never mutated; later
/// stages only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySession {
    build_repo_id: String,
    product_repo_id: Option<String>,
    tracking_url: String,
}

impl RepositorySession {
    pub fn new(
        build_repo_id: impl Into<String>,
        product_repo_id: Option<String>,
        tracking_url: impl Into<String>,
    ) -> Self {
        Self {
            build_repo_id: build_repo_id.into(),
            product_repo_id,
            tracking_url: tracking_url.into(),
        }
    }

    /// Id shared by the build's hosted repository and its group.
    pub fn build_repo_id(&self) -> &str {
        &self.build_repo_id
    }

    /// Product group id, when the build belongs to a product version.
    pub fn product_repo_id(&self) -> Option<&str> {
        self.product_repo_id.as_deref()
    }

    /// URL the build resolves and deploys through; all traffic is recorded.
    pub fn tracking_url(&self) -> &str {
        &self.tracking_url
    }
}
