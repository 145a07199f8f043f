//! Per-build and per-product repository provisioning.
//!
//! Every build resolves through its own group on the repository manager:
//!
//! ```text
//! group build+<project>+<millis>
//!   1. hosted build+<project>+<millis>      artifacts uploaded by this build
//!   2. group  product+<name>+<version>      (only when the build has a product version)
//!   3. group  shared-releases               artifacts from released product versions
//!   4. hosted shared-imports                anything imported for an earlier build
//!   5. group  public                        proxies to the outside world
//! ```

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use buildrun_core::{ArtifactRef, BuildConfiguration, BuildResult, ProductVersion, RepositorySession};

use crate::error::{RepositoryProvisioningError, StoreClientError};
use crate::promotion::PromotionHandle;
use crate::store::{Group, HostedRepository, RepositoryStoreService, StoreDescriptor, StoreKey, StoreType};

/// Group of remote proxies; owned by the repository manager, never created here.
pub const PUBLIC_GROUP_ID: &str = "public";

/// Global group of artifacts from released product versions.
pub const SHARED_RELEASES_ID: &str = "shared-releases";

/// Global hosted repository of imported third-party artifacts.
pub const SHARED_IMPORTS_ID: &str = "shared-imports";

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("Invalid regex pattern"));

static PIPE_OR_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[|:]+").expect("Invalid regex pattern"));

/// Make a name usable as a repository id segment.
///
/// Every run of non-word characters becomes a single `-`, then any remaining
/// `|`/`:` runs are collapsed the same way. Only meant to keep ids readable:
/// different names can sanitize to the same id.
pub fn sanitize(name: &str) -> String {
    let dashed = NON_WORD.replace_all(name, "-");
    PIPE_OR_COLON.replace_all(&dashed, "-").into_owned()
}

/// Id of the product group (and product hosted repository) for a product version.
pub fn product_repo_id(product: &ProductVersion) -> String {
    format!(
        "product+{}+{}",
        sanitize(&product.product_name),
        sanitize(&product.version)
    )
}

/// Id of a build's hosted repository and group.
///
/// Two builds of the same project submitted in the same millisecond get the
/// same id and therefore share repositories.
pub fn build_repo_id(project_name: &str, submitted_at: DateTime<Utc>) -> String {
    format!(
        "build+{}+{}",
        sanitize(project_name),
        submitted_at.timestamp_millis()
    )
}

/// Hosted store id embedded in the first deploy URL that has one.
///
/// Deploy URLs look like `.../hosted/<repo-id>/org/example/...`. Later
/// artifacts are not consulted once a match is found.
pub fn find_build_repo_id(artifacts: &[ArtifactRef]) -> Option<String> {
    let marker = StoreType::Hosted.endpoint_name();
    artifacts.iter().find_map(|artifact| {
        let parts: Vec<&str> = artifact.deploy_url.split('/').collect();
        let idx = parts.iter().position(|part| *part == marker)?;
        parts
            .get(idx + 1)
            .filter(|id| !id.is_empty())
            .map(|id| id.to_string())
    })
}

/// Provisions and promotes build repositories on the repository manager.
///
/// Holds no state besides the store client, so one instance is shared by all
/// build workers. Consistency under concurrent use is left to the manager.
pub struct RepositoryCoordinator {
    store: Arc<dyn RepositoryStoreService>,
}

impl RepositoryCoordinator {
    pub fn new(store: Arc<dyn RepositoryStoreService>) -> Self {
        Self { store }
    }

    /// Create the shared-releases group and shared-imports repository if missing.
    ///
    /// The two are created independently; if the second fails the first stays.
    /// Callers should treat an error as fatal.
    pub async fn ensure_global_repositories(&self) -> Result<(), RepositoryProvisioningError> {
        self.create_if_absent(
            Group::new(SHARED_RELEASES_ID).into(),
            "Creating global shared-releases repository group.",
        )
        .await
        .map_err(RepositoryProvisioningError::GlobalRepositories)?;

        self.create_if_absent(
            HostedRepository::new(SHARED_IMPORTS_ID)
                .with_snapshots(false)
                .with_releases(true)
                .into(),
            "Creating global repository for hosting external imports used in builds.",
        )
        .await
        .map_err(RepositoryProvisioningError::GlobalRepositories)?;

        info!(
            shared_releases = SHARED_RELEASES_ID,
            shared_imports = SHARED_IMPORTS_ID,
            "Global repositories ready"
        );
        Ok(())
    }

    /// Provision the repositories a build resolves and deploys through.
    ///
    /// Calling this again with the same project name and submission time
    /// finds everything in place and creates nothing.
    pub async fn create_build_repository(
        &self,
        config: &BuildConfiguration,
        product: Option<&ProductVersion>,
        submitted_at: DateTime<Utc>,
    ) -> Result<RepositorySession, RepositoryProvisioningError> {
        let product_repo_id = match product {
            Some(pv) => {
                let repo_id = product_repo_id(pv);
                self.setup_product_repos(&repo_id, pv)
                    .await
                    .map_err(|source| RepositoryProvisioningError::ProductRepositories {
                        repo_id: repo_id.clone(),
                        source,
                    })?;
                Some(repo_id)
            }
            None => None,
        };

        let repo_id = build_repo_id(&config.project_name, submitted_at);
        self.setup_build_repos(&repo_id, product_repo_id.as_deref(), config)
            .await
            .map_err(|source| RepositoryProvisioningError::BuildRepositories {
                repo_id: repo_id.clone(),
                source,
            })?;

        let url = self.store.tracking_url(&repo_id).map_err(|source| {
            RepositoryProvisioningError::TrackingUrl {
                repo_id: repo_id.clone(),
                source,
            }
        })?;

        info!(
            build_repo = %repo_id,
            product_repo = ?product_repo_id,
            tracking_url = %url,
            "Build repository ready"
        );
        Ok(RepositorySession::new(repo_id, product_repo_id, url))
    }

    /// Prepare promotion of a finished build's repository.
    ///
    /// The build repository is read back from the artifacts' deploy URLs. When
    /// no artifact names one, the handle carries no repository and promotes
    /// nothing. The target is the product group when a product version is
    /// known, otherwise the shared-releases group.
    pub async fn promote(
        &self,
        result: &BuildResult,
        product: Option<&ProductVersion>,
    ) -> Result<PromotionHandle, RepositoryProvisioningError> {
        let build_repo = find_build_repo_id(&result.artifacts);
        if build_repo.is_none() {
            warn!(
                task_id = %result.task_id,
                artifacts = result.artifacts.len(),
                "No artifact deploy URL names a hosted repository"
            );
        }

        let target = product
            .map(product_repo_id)
            .unwrap_or_else(|| SHARED_RELEASES_ID.to_string());

        let target_exists = self
            .store
            .exists(StoreType::Group, &target)
            .await
            .map_err(|source| RepositoryProvisioningError::PromotionTarget {
                target: target.clone(),
                source,
            })?;
        if !target_exists {
            return Err(RepositoryProvisioningError::MissingPromotionTarget(target));
        }

        Ok(PromotionHandle::new(self.store.clone(), build_repo, target))
    }

    /// Product group holding only the product hosted repository.
    async fn setup_product_repos(
        &self,
        repo_id: &str,
        product: &ProductVersion,
    ) -> Result<(), StoreClientError> {
        if self.store.exists(StoreType::Group, repo_id).await? {
            return Ok(());
        }

        self.create_if_absent(
            HostedRepository::new(repo_id)
                .with_snapshots(false)
                .with_releases(true)
                .into(),
            &format!(
                "Creating hosted repository: {} for builds of: {}:{}",
                repo_id, product.product_name, product.version
            ),
        )
        .await?;

        let mut group = Group::new(repo_id);
        group.add_constituent(StoreKey::hosted(repo_id));
        self.create_if_absent(
            group.into(),
            &format!(
                "Creating group: {} for grouping repos of builds related to: {}:{}",
                repo_id, product.product_name, product.version
            ),
        )
        .await?;
        Ok(())
    }

    /// Build hosted repository plus the build group resolving through it.
    async fn setup_build_repos(
        &self,
        repo_id: &str,
        product_repo_id: Option<&str>,
        config: &BuildConfiguration,
    ) -> Result<(), StoreClientError> {
        if self.store.exists(StoreType::Group, repo_id).await? {
            debug!(build_repo = %repo_id, "Build group already exists");
            return Ok(());
        }

        self.create_if_absent(
            HostedRepository::new(repo_id)
                .with_snapshots(true)
                .with_releases(true)
                .into(),
            &format!(
                "Creating hosted repository for build: {} of: {}",
                repo_id, config.project_name
            ),
        )
        .await?;

        let mut group = Group::new(repo_id);
        group.add_constituent(StoreKey::hosted(repo_id));
        if let Some(product_repo_id) = product_repo_id {
            group.add_constituent(StoreKey::group(product_repo_id));
        }
        group.add_constituent(StoreKey::group(SHARED_RELEASES_ID));
        group.add_constituent(StoreKey::hosted(SHARED_IMPORTS_ID));
        group.add_constituent(StoreKey::group(PUBLIC_GROUP_ID));

        self.create_if_absent(
            group.into(),
            &format!(
                "Creating repository group for resolving artifacts in build: {} of: {}",
                repo_id, config.project_name
            ),
        )
        .await?;
        Ok(())
    }

    /// Exists-check then create. Returns whether this call created the store.
    ///
    /// Losing a create race to another client counts as already present.
    async fn create_if_absent(
        &self,
        store: StoreDescriptor,
        changelog: &str,
    ) -> Result<bool, StoreClientError> {
        let key = store.key();
        if self.store.exists(key.store_type, &key.name).await? {
            return Ok(false);
        }

        match self.store.create(&store, changelog).await {
            Ok(()) => {
                info!(store = %key, "Created store");
                Ok(true)
            }
            Err(StoreClientError::AlreadyExists(_)) => {
                debug!(store = %key, "Store appeared between exists-check and create");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
