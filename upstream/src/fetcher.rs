//! Per-device status and metadata retrieval.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::TelemetryApi;
use crate::error::{FetchError, Result};
use crate::session::{SessionManager, SessionToken};
use crate::wire::{self, DeviceMetadata, StatusSnapshot};

#[derive(Debug, Clone, Copy)]
enum Call {
    Status,
    Metadata,
}

impl Call {
    fn name(self) -> &'static str {
        match self {
            Call::Status => wire::OP_STATUS,
            Call::Metadata => wire::OP_METADATA,
        }
    }
}

/// Fetches device data using the shared session.
#[derive(Clone)]
pub struct TelemetryFetcher {
    api: Arc<dyn TelemetryApi>,
    sessions: Arc<SessionManager>,
}

impl TelemetryFetcher {
    pub fn new(api: Arc<dyn TelemetryApi>, sessions: Arc<SessionManager>) -> Self {
        Self { api, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Fetch and parse the current status of one device.
    ///
    /// A snapshot without a fix is still returned; callers decide whether to
    /// apply it.
    pub async fn fetch_status(&self, device_id: &str) -> Result<StatusSnapshot> {
        self.call(Call::Status, device_id, |body| wire::parse_status(device_id, body))
            .await
    }

    /// Fetch the vehicle record of one device.
    pub async fn fetch_metadata(&self, device_id: &str) -> Result<DeviceMetadata> {
        self.call(Call::Metadata, device_id, wire::parse_metadata)
            .await
    }

    async fn call<T, F>(&self, call: Call, device_id: &str, parse: F) -> Result<T>
    where
        F: Fn(&Value) -> Result<T>,
    {
        let session = self.session().await?;
        match self.request(call, &session, device_id, &parse).await {
            Err(e) if e.is_session_expired() => {
                debug!(device_id, operation = call.name(), "session expired, retrying with a new one");
                self.sessions.invalidate(&session);
                let session = self.session().await?;
                self.request(call, &session, device_id, &parse).await
            }
            outcome => outcome,
        }
    }

    async fn request<T, F>(
        &self,
        call: Call,
        session: &SessionToken,
        device_id: &str,
        parse: &F,
    ) -> Result<T>
    where
        F: Fn(&Value) -> Result<T>,
    {
        let body = match call {
            Call::Status => self.api.device_status(session, device_id).await?,
            Call::Metadata => self.api.device_metadata(session, device_id).await?,
        };
        parse(&body)
    }

    async fn session(&self) -> Result<SessionToken> {
        self.sessions.current_or_acquire().await.map_err(|e| {
            warn!(error = %e, "no upstream session for fetch");
            FetchError::NoSession {
                source: Box::new(e),
            }
        })
    }
}
