//! Enriched device snapshots for push subscribers and queries.

use std::sync::Arc;

use fleet_upstream::TelemetryFetcher;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use state_store::{DeviceId, DeviceState, LiveStateStore};
use tracing::{debug, warn};

/// Device state together with its metadata and best label
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEntry {
    pub state: DeviceState,
    pub resolved_label: String,
    pub metadata: Option<Value>,
    pub device_id: DeviceId,
}

/// Builds enriched entries from the store and fresh metadata lookups
#[derive(Clone)]
pub struct SnapshotBuilder {
    store: Arc<LiveStateStore>,
    fetcher: TelemetryFetcher,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<LiveStateStore>, fetcher: TelemetryFetcher) -> Self {
        Self { store, fetcher }
    }

    /// Enrich one device, `None` when the id is not configured.
    ///
    /// A failed metadata lookup falls back to the last stored record.
    pub async fn entry(&self, device_id: &str) -> Option<EnrichedEntry> {
        let state = self.store.get(device_id)?;

        let (metadata_label, metadata) = match self.fetcher.fetch_metadata(device_id).await {
            Ok(fresh) => {
                self.store
                    .record_metadata(device_id, fresh.label.as_deref(), fresh.record.clone());
                (fresh.label, Some(fresh.record))
            }
            Err(e) => {
                warn!(device_id, error = %e, "metadata lookup failed, using last known record");
                (None, state.raw_metadata.clone())
            }
        };

        let resolved_label = state
            .telemetry_label
            .clone()
            .or(metadata_label)
            .unwrap_or_else(|| state.display_label.clone());

        Some(EnrichedEntry {
            device_id: state.device_id.clone(),
            resolved_label,
            metadata,
            state,
        })
    }

    /// Enrich every device, in configured order.
    pub async fn entries(&self) -> Vec<EnrichedEntry> {
        let lookups = self.store.device_ids().iter().map(|id| self.entry(id.as_str()));
        let entries: Vec<EnrichedEntry> = join_all(lookups).await.into_iter().flatten().collect();
        debug!(entries = entries.len(), "snapshot built");
        entries
    }

    /// Serialize entries into the push payload.
    pub fn render(entries: &[EnrichedEntry]) -> serde_json::Result<Arc<str>> {
        serde_json::to_string(entries).map(Arc::from)
    }
}
