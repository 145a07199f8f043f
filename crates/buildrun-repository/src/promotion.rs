//! Promotion of a build repository into a longer-lived group.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{RepositoryProvisioningError, StoreClientError};
use crate::store::{RepositoryStoreService, StoreDescriptor, StoreKey};

/// What running a [`PromotionHandle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// The build repository was added to the target group.
    Promoted {
        build_repo_id: String,
        target_group_id: String,
    },
    /// The target group already listed the build repository.
    AlreadyPromoted { build_repo_id: String },
    /// No build repository was known, so nothing moved.
    NothingToPromote,
}

/// A prepared promotion, returned by
/// [`RepositoryCoordinator::promote`](crate::RepositoryCoordinator::promote).
///
/// Running it makes the build's hosted repository a constituent of the target
/// group, after which its artifacts resolve for every build using that group.
pub struct PromotionHandle {
    store: Arc<dyn RepositoryStoreService>,
    build_repo_id: Option<String>,
    target_group_id: String,
}

impl fmt::Debug for PromotionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromotionHandle")
            .field("build_repo_id", &self.build_repo_id)
            .field("target_group_id", &self.target_group_id)
            .finish_non_exhaustive()
    }
}

impl PromotionHandle {
    pub(crate) fn new(
        store: Arc<dyn RepositoryStoreService>,
        build_repo_id: Option<String>,
        target_group_id: String,
    ) -> Self {
        Self {
            store,
            build_repo_id,
            target_group_id,
        }
    }

    /// Build repository read from the artifacts, if any artifact named one.
    pub fn build_repo_id(&self) -> Option<&str> {
        self.build_repo_id.as_deref()
    }

    pub fn target_group_id(&self) -> &str {
        &self.target_group_id
    }

    /// Perform the promotion.
    pub async fn execute(self) -> Result<PromotionOutcome, RepositoryProvisioningError> {
        let Some(build_repo_id) = self.build_repo_id else {
            warn!(target = %self.target_group_id, "Promotion skipped: no build repository");
            return Ok(PromotionOutcome::NothingToPromote);
        };

        let promotion_error = |source: StoreClientError| RepositoryProvisioningError::Promotion {
            build_repo_id: build_repo_id.clone(),
            target: self.target_group_id.clone(),
            source,
        };

        let mut group = self
            .store
            .load_group(&self.target_group_id)
            .await
            .map_err(promotion_error)?;

        let key = StoreKey::hosted(build_repo_id.clone());
        if group.contains(&key) {
            return Ok(PromotionOutcome::AlreadyPromoted { build_repo_id });
        }

        group.add_constituent(key);
        self.store
            .update(
                &StoreDescriptor::from(group),
                &format!(
                    "Promoting build repository {} into {}",
                    build_repo_id, self.target_group_id
                ),
            )
            .await
            .map_err(promotion_error)?;

        info!(
            build_repo = %build_repo_id,
            target = %self.target_group_id,
            "Promoted build repository"
        );
        Ok(PromotionOutcome::Promoted {
            build_repo_id,
            target_group_id: self.target_group_id,
        })
    }
}
