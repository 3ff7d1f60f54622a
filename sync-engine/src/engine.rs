//! The engine facade: wiring, background loops and the query surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_upstream::{
    AccountCredentials, HttpTelemetryApi, SessionManager, TelemetryApi, TelemetryFetcher,
};
use parking_lot::Mutex;
use state_store::{DeviceId, DeviceState, LiveStateStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::automap::{self, AutoMapSink, AutoMapWorker};
use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::health::{HealthInputs, HealthReport};
use crate::polling::{CycleReport, Poller, PollingStats};
use crate::registry::SubscriberRegistry;
use crate::snapshot::{EnrichedEntry, SnapshotBuilder};

/// Live-state sync engine
///
/// Owns the store, the upstream session and the subscriber registry. Build it
/// once, wrap it in an `Arc`, call [`FleetEngine::start`] to launch the
/// polling and broadcast loops, and share it with the serving layer for
/// queries.
pub struct FleetEngine {
    config: EngineConfig,
    store: Arc<LiveStateStore>,
    sessions: Arc<SessionManager>,
    registry: SubscriberRegistry,
    snapshots: SnapshotBuilder,
    poller: Poller,
    broadcaster: Broadcaster,
    automap_worker: Mutex<Option<AutoMapWorker>>,
    started_at: DateTime<Utc>,
}

impl FleetEngine {
    /// Build an engine on top of an arbitrary upstream transport.
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn TelemetryApi>,
        sink: Arc<dyn AutoMapSink>,
    ) -> Result<Self> {
        config.validate()?;

        let started_at = Utc::now();
        let store = Arc::new(LiveStateStore::new(
            config.device_ids.iter().cloned(),
            config.default_position,
            started_at,
        )?);

        let sessions = Arc::new(SessionManager::new(
            api.clone(),
            AccountCredentials::new(config.account.clone(), config.password.clone()),
        ));
        let fetcher = TelemetryFetcher::new(api, sessions.clone());
        let registry = SubscriberRegistry::new();
        let snapshots = SnapshotBuilder::new(store.clone(), fetcher.clone());
        let (dispatcher, worker) = automap::channel(sink);

        let poller = Poller::new(store.clone(), fetcher, dispatcher, config.poll_interval);
        let broadcaster = Broadcaster::new(
            snapshots.clone(),
            registry.clone(),
            config.broadcast_interval,
            config.send_timeout,
        );

        Ok(Self {
            config,
            store,
            sessions,
            registry,
            snapshots,
            poller,
            broadcaster,
            automap_worker: Mutex::new(Some(worker)),
            started_at,
        })
    }

    /// Build an engine talking HTTP to the configured upstream.
    pub fn from_config(config: EngineConfig, sink: Arc<dyn AutoMapSink>) -> Result<Self> {
        config.validate()?;
        let api = HttpTelemetryApi::new(config.base_url.clone(), config.request_timeout)?;
        Self::new(config, Arc::new(api), sink)
    }

    /// Launch the polling loop, the broadcast loop and the auto-map worker.
    ///
    /// Fails if the engine was already started.
    pub fn start(&self) -> Result<EngineHandle> {
        let worker = self
            .automap_worker
            .lock()
            .take()
            .ok_or(EngineError::AlreadyStarted)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let automap = worker.spawn();
        let polling = tokio::spawn(self.poller.clone().run(shutdown_rx.clone()));
        let broadcast = tokio::spawn(self.broadcaster.clone().run(shutdown_rx));

        info!(
            devices = self.store.len(),
            poll_interval = ?self.config.poll_interval,
            broadcast_interval = ?self.config.broadcast_interval,
            "fleet engine started"
        );

        Ok(EngineHandle {
            shutdown_tx,
            polling,
            broadcast,
            automap,
        })
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    pub fn get_device_state(&self, device_id: &str) -> Option<DeviceState> {
        self.store.get(device_id)
    }

    pub fn get_all_device_states(&self) -> Vec<DeviceState> {
        self.store.get_all()
    }

    /// Device state enriched with freshly fetched metadata
    pub async fn get_enriched_snapshot(&self, device_id: &str) -> Option<EnrichedEntry> {
        self.snapshots.entry(device_id).await
    }

    pub async fn get_enriched_snapshot_all(&self) -> Vec<EnrichedEntry> {
        self.snapshots.entries().await
    }

    /// Resolve a device by id or by one of its labels
    pub fn find_device(&self, query: &str) -> Option<DeviceId> {
        self.store.find(query)
    }

    pub fn device_ids(&self) -> &[DeviceId] {
        self.store.device_ids()
    }

    pub fn is_session_active(&self) -> bool {
        self.sessions.is_active()
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::evaluate(HealthInputs {
            now: Utc::now(),
            started_at: self.started_at,
            session_active: self.sessions.is_active(),
            freshness: self.store.freshness(),
            device_ids: self.store.device_ids().to_vec(),
            subscribers: self.registry.len(),
            environment: self.config.environment.clone(),
            fresh_within: self.config.fresh_within,
            stale_after: self.config.stale_after,
        })
    }

    // ------------------------------------------------------------------
    // Push path
    // ------------------------------------------------------------------

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Serialized snapshot for a subscriber that just connected
    pub async fn initial_payload(&self) -> Option<Arc<str>> {
        self.broadcaster.initial_payload().await
    }

    /// Run a single polling pass outside the loop
    pub async fn poll_once(&self) -> CycleReport {
        self.poller.poll_once().await
    }

    /// Run a single broadcast outside the loop
    pub async fn broadcast_once(&self) -> BroadcastReport {
        self.broadcaster.broadcast_once().await
    }

    pub fn polling_stats(&self) -> PollingStats {
        self.poller.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for FleetEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetEngine")
            .field("devices", &self.store.len())
            .field("session_active", &self.sessions.is_active())
            .field("subscribers", &self.registry.len())
            .finish()
    }
}

/// Handle on the engine's background tasks
pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    polling: JoinHandle<()>,
    broadcast: JoinHandle<()>,
    automap: JoinHandle<()>,
}

impl EngineHandle {
    /// Stop both loops and wait for them to exit.
    ///
    /// Auto-map requests still queued are dropped.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.polling.await {
            warn!(error = %e, "polling task ended abnormally");
        }
        if let Err(e) = self.broadcast.await {
            warn!(error = %e, "broadcast task ended abnormally");
        }
        self.automap.abort();

        info!("fleet engine stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.polling.is_finished() && !self.broadcast.is_finished()
    }
}
