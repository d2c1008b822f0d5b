//! Dev server transport
//!
//! Thin HTTP client for the dev-server REST API. No retries and no
//! caching; resilience lives in the sync engine.
//!
//! ## Endpoints
//!
//! - `GET  {base}/dev/projects`
//! - `GET  {base}/dev/projects/{project}?expand=overrides&expand=availableVariations`
//! - `PUT  {base}/dev/projects/{project}/overrides/{flag}` (body: raw JSON value)
//! - `DELETE {base}/dev/projects/{project}/overrides/{flag}`

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::ClientError;
use crate::models::{OverrideResponse, ProjectSnapshot};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations the sync engine needs from a dev server
///
/// `RemoteStateClient` is the HTTP implementation.
#[async_trait]
pub trait DevServerApi: Send + Sync {
    /// Set the connection target
    fn configure(&self, base_url: &str, project_key: Option<&str>);

    /// Select (or clear) the project used by project-scoped calls
    fn set_project_key(&self, project_key: Option<&str>);

    fn project_key(&self) -> Option<String>;

    /// Fetch flags, variations and overrides in one round trip
    async fn fetch_project_snapshot(&self) -> Result<ProjectSnapshot, ClientError>;

    async fn set_override(
        &self,
        flag_key: &str,
        value: &Value,
    ) -> Result<OverrideResponse, ClientError>;

    async fn clear_override(&self, flag_key: &str) -> Result<(), ClientError>;

    async fn list_projects(&self) -> Result<Vec<String>, ClientError>;
}

#[derive(Debug, Clone)]
struct Target {
    base_url: String,
    project_key: Option<String>,
}

/// HTTP client for the dev-server REST API
#[derive(Debug)]
pub struct RemoteStateClient {
    http: reqwest::Client,
    target: RwLock<Target>,
}

impl RemoteStateClient {
    /// Create a client with the default request timeout
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flag-toolbar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Setup)?;

        Ok(Self {
            http,
            target: RwLock::new(Target {
                base_url: normalize_base_url(base_url),
                project_key: None,
            }),
        })
    }

    /// Builder-style project selection
    pub fn with_project_key(self, project_key: impl Into<String>) -> Self {
        self.set_project_key(Some(&project_key.into()));
        self
    }

    pub fn base_url(&self) -> String {
        self.target().base_url
    }

    fn target(&self) -> Target {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_project(&self) -> Result<String, ClientError> {
        self.project_key().ok_or(ClientError::NoProjectSelected)
    }

    /// Build `{base}/seg/seg/...`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let base = self.base_url();
        let mut url = Url::parse(&base).map_err(|e| ClientError::InvalidBaseUrl {
            url: base.clone(),
            reason: e.to_string(),
        })?;

        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl {
                url: base.clone(),
                reason: "URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    /// Send a request and return the body of a 2xx response
    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<String, ClientError> {
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Connection {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("Dev server error ({}) for {}", status, url);
            return Err(ClientError::request(status.as_u16(), url.to_string(), body));
        }

        response.text().await.map_err(|source| ClientError::Connection {
            url: url.to_string(),
            source,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let text = self.send(method, url.clone(), body).await?;
        serde_json::from_str(&text).map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl DevServerApi for RemoteStateClient {
    fn configure(&self, base_url: &str, project_key: Option<&str>) {
        let mut target = self.target.write().unwrap_or_else(PoisonError::into_inner);
        target.base_url = normalize_base_url(base_url);
        target.project_key = project_key.map(str::to_string);
    }

    fn set_project_key(&self, project_key: Option<&str>) {
        let mut target = self.target.write().unwrap_or_else(PoisonError::into_inner);
        target.project_key = project_key.map(str::to_string);
    }

    fn project_key(&self) -> Option<String> {
        self.target().project_key
    }

    async fn fetch_project_snapshot(&self) -> Result<ProjectSnapshot, ClientError> {
        let project = self.require_project()?;
        let mut url = self.endpoint(&["dev", "projects", &project])?;
        url.query_pairs_mut()
            .append_pair("expand", "overrides")
            .append_pair("expand", "availableVariations");

        self.send_json(Method::GET, url, None).await
    }

    async fn set_override(
        &self,
        flag_key: &str,
        value: &Value,
    ) -> Result<OverrideResponse, ClientError> {
        let project = self.require_project()?;
        let url = self.endpoint(&["dev", "projects", &project, "overrides", flag_key])?;
        self.send_json(Method::PUT, url, Some(value)).await
    }

    async fn clear_override(&self, flag_key: &str) -> Result<(), ClientError> {
        let project = self.require_project()?;
        let url = self.endpoint(&["dev", "projects", &project, "overrides", flag_key])?;
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<String>, ClientError> {
        let url = self.endpoint(&["dev", "projects"])?;
        self.send_json(Method::GET, url, None).await
    }
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
