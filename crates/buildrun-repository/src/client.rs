//! HTTP client for the repository manager's REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreClientError;
use crate::store::{Group, RepositoryStoreService, StoreDescriptor, StoreKey, StoreType};

/// Group definition as returned by `GET /admin/group/<name>`.
#[derive(Debug, Deserialize)]
struct GroupBody {
    name: String,
    #[serde(default)]
    constituents: Vec<String>,
}

/// [`RepositoryStoreService`] backed by the repository manager's admin and
/// tracking REST endpoints.
pub struct HttpStoreClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpStoreClient {
    /// Create a new client whose requests give up after `timeout`.
    ///
    /// The base URL is normalized to end in `/api` without a trailing slash,
    /// so both `http://host:8080` and `http://host:8080/api/` work.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreClientError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner,
            base_url: normalize_base_url(base_url),
        })
    }

    /// Normalized API root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn admin_url(&self, store_type: StoreType, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{}/admin/{}/{}", self.base_url, store_type, name),
            None => format!("{}/admin/{}", self.base_url, store_type),
        }
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let mut url = base_url.trim_end_matches('/').to_string();
    if !url.ends_with("/api") {
        url.push_str("/api");
    }
    url
}

fn unexpected(status: StatusCode, path: &str) -> StoreClientError {
    StoreClientError::Status {
        status: status.as_u16(),
        path: path.to_string(),
    }
}

#[async_trait]
impl RepositoryStoreService for HttpStoreClient {
    async fn exists(&self, store_type: StoreType, name: &str) -> Result<bool, StoreClientError> {
        let url = self.admin_url(store_type, Some(name));
        debug!(url = %url, "HEAD store");

        let response = self.inner.head(&url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(unexpected(status, &url)),
        }
    }

    async fn create(
        &self,
        store: &StoreDescriptor,
        changelog: &str,
    ) -> Result<(), StoreClientError> {
        let key = store.key();
        let url = self.admin_url(key.store_type, None);
        debug!(url = %url, store = %key, "POST store");

        let response = self
            .inner
            .post(&url)
            .json(&store.to_json(changelog))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(StoreClientError::AlreadyExists(key.to_string())),
            status => Err(unexpected(status, &url)),
        }
    }

    async fn load_group(&self, name: &str) -> Result<Group, StoreClientError> {
        let url = self.admin_url(StoreType::Group, Some(name));
        debug!(url = %url, "GET group");

        let response = self.inner.get(&url).send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StoreClientError::NotFound(StoreKey::group(name).to_string()))
            }
            status => return Err(unexpected(status, &url)),
        }

        let body: GroupBody = response
            .json()
            .await
            .map_err(|e| StoreClientError::Serialization(e.to_string()))?;

        let constituents = body
            .constituents
            .iter()
            .map(|key| key.parse())
            .collect::<Result<Vec<StoreKey>, _>>()?;

        Ok(Group {
            name: body.name,
            constituents,
        })
    }

    async fn update(
        &self,
        store: &StoreDescriptor,
        changelog: &str,
    ) -> Result<(), StoreClientError> {
        let key = store.key();
        let url = self.admin_url(key.store_type, Some(&key.name));
        debug!(url = %url, "PUT store");

        let response = self
            .inner
            .put(&url)
            .json(&store.to_json(changelog))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StoreClientError::NotFound(key.to_string())),
            status => Err(unexpected(status, &url)),
        }
    }

    fn tracking_url(&self, group_id: &str) -> Result<String, StoreClientError> {
        // One group per build, so the tracking record is named after the group.
        Ok(format!(
            "{}/folo/track/{}/{}/{}",
            self.base_url,
            group_id,
            StoreType::Group,
            group_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalization() {
        assert_eq!(normalize_base_url("http://repo:8080"), "http://repo:8080/api");
        assert_eq!(normalize_base_url("http://repo:8080/"), "http://repo:8080/api");
        assert_eq!(normalize_base_url("http://repo:8080/api/"), "http://repo:8080/api");
    }

    #[test]
    fn test_admin_and_tracking_urls() {
        let client = HttpStoreClient::new("http://repo:8080", Duration::from_secs(30)).unwrap();
        assert_eq!(
            client.admin_url(StoreType::Hosted, Some("build+foo+1")),
            "http://repo:8080/api/admin/hosted/build+foo+1"
        );
        assert_eq!(
            client.admin_url(StoreType::Group, None),
            "http://repo:8080/api/admin/group"
        );
        assert_eq!(
            client.tracking_url("build+foo+1").unwrap(),
            "http://repo:8080/api/folo/track/build+foo+1/group/build+foo+1"
        );
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        // Accepts connections but never writes a response.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client =
            HttpStoreClient::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            client.exists(StoreType::Group, "shared-releases"),
        )
        .await
        .expect("request should time out on its own")
        .unwrap_err();

        match err {
            StoreClientError::Http(e) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {other:?}"),
        }
        server.abort();
    }
}
