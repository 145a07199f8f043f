//! Store model and the repository-manager contract.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreClientError;

/// Kind of store on the repository manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Writable repository.
    Hosted,
    /// Read-through aggregation of other stores.
    Group,
    /// Proxy of an external repository.
    Remote,
}

impl StoreType {
    /// Path segment used in REST and content URLs (`/hosted/<id>/...`).
    pub fn endpoint_name(&self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Group => "group",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint_name())
    }
}

impl FromStr for StoreType {
    type Err = StoreClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hosted" => Ok(Self::Hosted),
            "group" => Ok(Self::Group),
            "remote" => Ok(Self::Remote),
            other => Err(StoreClientError::InvalidStoreKey(other.to_string())),
        }
    }
}

/// Reference to a store, rendered as `type:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub store_type: StoreType,
    pub name: String,
}

impl StoreKey {
    pub fn new(store_type: StoreType, name: impl Into<String>) -> Self {
        Self {
            store_type,
            name: name.into(),
        }
    }

    pub fn hosted(name: impl Into<String>) -> Self {
        Self::new(StoreType::Hosted, name)
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(StoreType::Group, name)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.store_type, self.name)
    }
}

impl FromStr for StoreKey {
    type Err = StoreClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (store_type, name) = s
            .split_once(':')
            .ok_or_else(|| StoreClientError::InvalidStoreKey(s.to_string()))?;
        if name.is_empty() {
            return Err(StoreClientError::InvalidStoreKey(s.to_string()));
        }
        Ok(Self::new(store_type.parse()?, name))
    }
}

/// A writable repository scoped to one build or one shared purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedRepository {
    pub name: String,
    pub allow_snapshots: bool,
    pub allow_releases: bool,
}

impl HostedRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_snapshots: false,
            allow_releases: true,
        }
    }

    pub fn with_snapshots(mut self, allow: bool) -> Self {
        self.allow_snapshots = allow;
        self
    }

    pub fn with_releases(mut self, allow: bool) -> Self {
        self.allow_releases = allow;
        self
    }
}

/// Stores consulted in priority order when resolving artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub constituents: Vec<StoreKey>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constituents: Vec::new(),
        }
    }

    /// Append a constituent at the lowest priority.
    pub fn add_constituent(&mut self, key: StoreKey) {
        self.constituents.push(key);
    }

    pub fn contains(&self, key: &StoreKey) -> bool {
        self.constituents.contains(key)
    }
}

/// Anything that can be created on the repository manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreDescriptor {
    Hosted(HostedRepository),
    Group(Group),
}

impl StoreDescriptor {
    pub fn key(&self) -> StoreKey {
        match self {
            Self::Hosted(repo) => StoreKey::hosted(repo.name.clone()),
            Self::Group(group) => StoreKey::group(group.name.clone()),
        }
    }

    /// JSON body understood by the repository manager's admin API.
    pub fn to_json(&self, changelog: &str) -> serde_json::Value {
        let key = self.key();
        match self {
            Self::Hosted(repo) => serde_json::json!({
                "key": key.to_string(),
                "name": repo.name,
                "type": StoreType::Hosted,
                "allow_snapshots": repo.allow_snapshots,
                "allow_releases": repo.allow_releases,
                "metadata": { "changelog": changelog },
            }),
            Self::Group(group) => serde_json::json!({
                "key": key.to_string(),
                "name": group.name,
                "type": StoreType::Group,
                "constituents": group
                    .constituents
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>(),
                "metadata": { "changelog": changelog },
            }),
        }
    }
}

impl From<HostedRepository> for StoreDescriptor {
    fn from(repo: HostedRepository) -> Self {
        Self::Hosted(repo)
    }
}

impl From<Group> for StoreDescriptor {
    fn from(group: Group) -> Self {
        Self::Group(group)
    }
}

/// Operations the coordinator needs from the repository manager.
///
/// Implementations must be safe to call from many build workers at once.
/// They hold no view of store existence of their own; every call goes to
/// the manager.
#[async_trait]
pub trait RepositoryStoreService: Send + Sync {
    /// Whether a store of the given type and name exists.
    async fn exists(&self, store_type: StoreType, name: &str) -> Result<bool, StoreClientError>;

    /// Create a store, recording `changelog` as the reason.
    async fn create(&self, store: &StoreDescriptor, changelog: &str)
        -> Result<(), StoreClientError>;

    /// Load a group definition.
    async fn load_group(&self, name: &str) -> Result<Group, StoreClientError>;

    /// Replace an existing store definition.
    async fn update(&self, store: &StoreDescriptor, changelog: &str)
        -> Result<(), StoreClientError>;

    /// Content URL for `group_id` that records every download and upload
    /// under a tracking record of the same name.
    fn tracking_url(&self, group_id: &str) -> Result<String, StoreClientError>;
}
