//! Periodic snapshot broadcast to push subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::registry::SubscriberRegistry;
use crate::snapshot::SnapshotBuilder;

/// Outcome of one broadcast cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Entries in the snapshot; zero when the cycle was skipped
    pub entries: usize,
    pub delivered: usize,
    pub pruned: usize,
}

/// Renders the fleet snapshot and pushes it to every subscriber
#[derive(Clone)]
pub struct Broadcaster {
    builder: SnapshotBuilder,
    registry: SubscriberRegistry,
    interval: Duration,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(
        builder: SnapshotBuilder,
        registry: SubscriberRegistry,
        interval: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            builder,
            registry,
            interval,
            send_timeout,
        }
    }

    /// Build one snapshot and deliver it.
    ///
    /// With no subscribers nothing is fetched or rendered.
    pub async fn broadcast_once(&self) -> BroadcastReport {
        if self.registry.is_empty() {
            return BroadcastReport::default();
        }

        let entries = self.builder.entries().await;
        let payload = match SnapshotBuilder::render(&entries) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize snapshot");
                return BroadcastReport::default();
            }
        };

        let delivery = self.registry.deliver(payload, self.send_timeout).await;
        BroadcastReport {
            entries: entries.len(),
            delivered: delivery.delivered,
            pruned: delivery.pruned.len(),
        }
    }

    /// Serialized snapshot for a single newly connected subscriber
    pub async fn initial_payload(&self) -> Option<Arc<str>> {
        let entries = self.builder.entries().await;
        match SnapshotBuilder::render(&entries) {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!(error = %e, "failed to serialize initial snapshot");
                None
            }
        }
    }

    /// Broadcast until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "broadcast loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let this = self.clone();
            match tokio::spawn(async move { this.broadcast_once().await }).await {
                Ok(report) if report.entries > 0 => debug!(
                    subscribers = report.delivered,
                    pruned = report.pruned,
                    "snapshot broadcast"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "broadcast cycle aborted"),
            }
        }

        info!("broadcast loop stopped");
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }
}
