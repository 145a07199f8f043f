//! Build configuration and product version types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::CoreError;

/// Source control coordinates for a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmInfo {
    /// Repository URL (git, svn, ...).
    pub url: String,

    /// Branch, tag, or commit to build.
    pub revision: Option<String>,
}

impl ScmInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: None,
        }
    }

    /// Builder method to pin a revision.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

/// Reference to the environment a build runs in (JDK, build tool, OS image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRef {
    /// Environment identifier as known to the build driver.
    pub id: String,

    /// Free-form attributes such as `jdk=17` or `maven=3.9`.
    pub attributes: HashMap<String, String>,
}

impl EnvironmentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder method to add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// What to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Name of the project being built. Drives the build repository id.
    pub project_name: String,

    /// Where the sources come from.
    pub scm: ScmInfo,

    /// Environment the build driver should use.
    pub environment: EnvironmentRef,

    /// Build script or goals handed to the driver (e.g. `mvn clean deploy`).
    pub build_script: Option<String>,
}

impl BuildConfiguration {
    /// Create a new BuildConfiguration.
    pub fn new(project_name: impl Into<String>, scm: ScmInfo, environment: EnvironmentRef) -> Self {
        Self {
            project_name: project_name.into(),
            scm,
            environment,
            build_script: None,
        }
    }

    /// Builder method to set the build script.
    pub fn with_build_script(mut self, script: impl Into<String>) -> Self {
        self.build_script = Some(script.into());
        self
    }

    /// Reject configurations the pipeline cannot act on.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.project_name.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "project name must not be blank".to_string(),
            ));
        }
        if self.scm.url.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(format!(
                "project '{}' has no SCM url",
                self.project_name
            )));
        }
        Ok(())
    }
}

/// A version of a product that builds contribute artifacts to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductVersion {
    /// Product name.
    pub product_name: String,

    /// Version string, e.g. `1.0`.
    pub version: String,
}

impl ProductVersion {
    pub fn new(product_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            product_name: product_name.into(),
            version: version.into(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.product_name.trim().is_empty() || self.version.trim().is_empty() {
            return Err(CoreError::InvalidConfiguration(format!(
                "product version '{}:{}' needs both a name and a version",
                self.product_name, self.version
            )));
        }
        Ok(())
    }
}
