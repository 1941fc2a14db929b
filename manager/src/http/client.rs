//! HTTP client implementation

use std::fmt;
use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::ManagerError;

/// Header carrying the tenant every storage call is scoped to
pub const TENANT_HEADER: &str = "ApplicationTenantID";

/// HTTP client options
#[derive(Clone)]
pub struct HttpClientOptions {
    /// Base URL of the remote service
    pub base_url: String,

    /// Bearer token sent with every request
    pub api_key: Option<String>,

    /// Tenant the requests are made for
    pub tenant_id: String,

    /// Request timeout
    pub timeout: Duration,
}

impl fmt::Debug for HttpClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClientOptions")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("tenant_id", &self.tenant_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9022/v1".to_string(),
            api_key: None,
            tenant_id: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for a tenant-scoped backend service
pub struct HttpClient {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    tenant_id: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(options: &HttpClientOptions) -> Result<Self, ManagerError> {
        let base = format!("{}/", options.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base).map_err(|e| {
            ManagerError::ConfigError(format!("Invalid base URL {}: {}", options.base_url, e))
        })?;

        let client = Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: options.api_key.clone().map(SecretString::from),
            tenant_id: options.tenant_id.clone(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Build a URL from path segments, each one percent-encoded
    pub fn url(&self, segments: &[&str]) -> Result<Url, ManagerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ManagerError::ConfigError(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and decode its JSON body
    ///
    /// 404 maps to `NotFound`, 409 and 412 to `Conflict`, any other failure
    /// status to `ExternalDependency`.
    pub async fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<T, ManagerError> {
        let response = self.execute(method, url, body).await?;
        let body = response.json().await?;
        Ok(body)
    }

    /// Send a request whose response body is not needed
    pub async fn send_empty<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<(), ManagerError> {
        self.execute(method, url, body).await?;
        Ok(())
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ManagerError> {
        debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(TENANT_HEADER, &self.tenant_id);
        if let Some(api_key) = &self.api_key {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", api_key.expose_secret()),
            );
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(ManagerError::NotFound(url.path().to_string())),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(ManagerError::Conflict(format!("{}: {}", url.path(), body)))
            }
            _ => {
                error!("HTTP {} {} failed: {} - {}", method, url, status, body);
                Err(ManagerError::ExternalDependency(format!("{}: {}", status, body)))
            }
        }
    }
}
