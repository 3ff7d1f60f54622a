//! HTTP transport for the upstream fleet API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::session::SessionToken;

/// Raw calls against the upstream API.
///
/// Implementations return the decoded JSON body; interpreting the result
/// envelope is left to the session manager and fetcher so that fakes only
/// need to script response bodies.
#[async_trait]
pub trait TelemetryApi: Send + Sync {
    /// Authenticate and return the login response body
    async fn login(&self, account: &str, password: &str) -> Result<Value>;

    /// Fetch the status record for one device
    async fn device_status(&self, session: &SessionToken, device_id: &str) -> Result<Value>;

    /// Fetch the vehicle record for one device
    async fn device_metadata(&self, session: &SessionToken, device_id: &str) -> Result<Value>;
}

/// `TelemetryApi` backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTelemetryApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTelemetryApi {
    /// Create a client with a bounded per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, action: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/StandardApiAction_{}.action", self.base_url, action);
        debug!(action, "upstream request");

        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "{action} returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::MalformedResponse(format!("{action}: {e}")))
    }
}

#[async_trait]
impl TelemetryApi for HttpTelemetryApi {
    async fn login(&self, account: &str, password: &str) -> Result<Value> {
        self.get_json("login", &[("account", account), ("password", password)])
            .await
    }

    async fn device_status(&self, session: &SessionToken, device_id: &str) -> Result<Value> {
        self.get_json(
            "getDeviceStatus",
            &[
                ("jsession", session.as_str()),
                ("devIdno", device_id),
                ("toMap", "1"),
                ("language", "en"),
            ],
        )
        .await
    }

    async fn device_metadata(&self, session: &SessionToken, device_id: &str) -> Result<Value> {
        self.get_json(
            "getDeviceByVehicle",
            &[("jsession", session.as_str()), ("devIdno", device_id)],
        )
        .await
    }
}
