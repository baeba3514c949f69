// Data store client.
//
// A narrow Elasticsearch surface: identity, index templates, refresh and
// search. Transport failures are kept apart from HTTP status failures
// because the readiness prober treats them differently.

use async_trait::async_trait;
use lit_common::types::Credentials;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No HTTP exchange happened (refused, reset, timed out)
    #[error("data store unreachable: {0}")]
    Unreachable(String),

    #[error("data store returned {status} for {operation}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response to {operation}: {message}")]
    Decode { operation: String, message: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unreachable(_) => true,
            StoreError::Status { status, .. } => *status == StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            StoreError::Decode { .. } => false,
        }
    }
}

/// Response of the identity endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub tagline: Option<String>,
    #[serde(default)]
    pub version: Option<StoreVersion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreVersion {
    #[serde(default)]
    pub number: Option<String>,
}

impl StoreInfo {
    /// A node that identifies itself with a non-empty name
    pub fn identifies_itself(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Where the store is reached, for diagnostics
    fn endpoint(&self) -> &str;

    async fn info(&self) -> Result<StoreInfo, StoreError>;

    async fn put_template(&self, name: &str, body: &Value) -> Result<(), StoreError>;

    async fn refresh(&self, index_pattern: &str) -> Result<(), StoreError>;

    /// Raw search response
    async fn search(&self, index_pattern: &str, query: &Value) -> Result<Value, StoreError>;
}

/// `DataStore` over the Elasticsearch REST API
pub struct HttpDataStore {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpDataStore {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, StoreError> {
        Self::with_timeout(base_url, credentials, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: &str,
        credentials: Credentials,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Unreachable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>, operation: &str) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "Data store request");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        if !status.is_success() {
            return Err(StoreError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Decode {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl DataStore for HttpDataStore {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        let body = self.send(Method::GET, "/", None, "info").await?;
        serde_json::from_value(body).map_err(|e| StoreError::Decode {
            operation: "info".to_string(),
            message: e.to_string(),
        })
    }

    async fn put_template(&self, name: &str, body: &Value) -> Result<(), StoreError> {
        self.send(Method::PUT, &format!("/_template/{}", name), Some(body), "put template")
            .await
            .map(|_| ())
    }

    async fn refresh(&self, index_pattern: &str) -> Result<(), StoreError> {
        self.send(Method::POST, &format!("/{}/_refresh", index_pattern), None, "refresh")
            .await
            .map(|_| ())
    }

    async fn search(&self, index_pattern: &str, query: &Value) -> Result<Value, StoreError> {
        self.send(Method::POST, &format!("/{}/_search", index_pattern), Some(query), "search")
            .await
    }
}
