//! Polling loop refreshing device state from upstream
//!
//! One pass visits every configured device in order, fetches its status and
//! applies fixes to the store. Passes are separated by a fixed pause. A failure
//! for one device is logged and skipped; nothing short of shutdown ends the
//! loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_upstream::TelemetryFetcher;
use state_store::{DeviceId, LiveStateStore, StatusPatch};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::automap::{AutoMapDispatcher, AutoMapRequest};

/// Outcome of one pass over all devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices whose state was refreshed
    pub updated: Vec<DeviceId>,
    /// Devices that answered without a usable position
    pub no_fix: Vec<DeviceId>,
    /// Devices whose fetch failed, with the failure kind
    pub failed: Vec<(DeviceId, &'static str)>,
}

/// Cumulative counters across passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollingStats {
    pub cycles: u64,
    pub updates: u64,
    pub rejected_fixes: u64,
    pub failures: u64,
    /// Passes that ended abnormally (panicked)
    pub aborted_cycles: u64,
}

impl fmt::Display for PollingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Polling Stats:")?;
        writeln!(f, "  Cycles: {}", self.cycles)?;
        writeln!(f, "  Updates: {}", self.updates)?;
        writeln!(f, "  Rejected fixes: {}", self.rejected_fixes)?;
        writeln!(f, "  Failures: {}", self.failures)?;
        write!(f, "  Aborted cycles: {}", self.aborted_cycles)
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    updates: AtomicU64,
    rejected_fixes: AtomicU64,
    failures: AtomicU64,
    aborted_cycles: AtomicU64,
}

/// Drives the fetcher over every device and writes results to the store
#[derive(Clone)]
pub struct Poller {
    store: Arc<LiveStateStore>,
    fetcher: TelemetryFetcher,
    automap: AutoMapDispatcher,
    interval: Duration,
    counters: Arc<Counters>,
}

impl Poller {
    pub fn new(
        store: Arc<LiveStateStore>,
        fetcher: TelemetryFetcher,
        automap: AutoMapDispatcher,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            automap,
            interval,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Perform exactly one pass over every configured device.
    pub async fn poll_once(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for device_id in self.store.device_ids() {
            match self.fetcher.fetch_status(device_id.as_str()).await {
                Ok(snapshot) if snapshot.has_fix() => {
                    let patch = StatusPatch {
                        online: snapshot.online,
                        latitude: snapshot.latitude,
                        longitude: snapshot.longitude,
                        speed_kmh: snapshot.speed_kmh,
                        label: snapshot.label.clone(),
                        observed_at: Utc::now(),
                    };
                    self.store.update(device_id.as_str(), &patch);
                    debug!(
                        device_id = %device_id,
                        latitude = snapshot.latitude,
                        longitude = snapshot.longitude,
                        label = ?snapshot.label,
                        "device state refreshed"
                    );

                    if let Some(label) = snapshot.label {
                        self.automap
                            .dispatch(AutoMapRequest::new(device_id.as_str(), label));
                    }
                    report.updated.push(device_id.clone());
                }
                Ok(snapshot) => {
                    warn!(
                        device_id = %device_id,
                        latitude = snapshot.latitude,
                        longitude = snapshot.longitude,
                        "status without a position fix, keeping last known state"
                    );
                    report.no_fix.push(device_id.clone());
                }
                Err(e) => {
                    warn!(device_id = %device_id, kind = e.kind(), error = %e, "status fetch failed");
                    report.failed.push((device_id.clone(), e.kind()));
                }
            }
        }

        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        self.counters
            .updates
            .fetch_add(report.updated.len() as u64, Ordering::Relaxed);
        self.counters
            .rejected_fixes
            .fetch_add(report.no_fix.len() as u64, Ordering::Relaxed);
        self.counters
            .failures
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);

        report
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Each pass runs in its own task; a panic inside a pass is logged and
    /// the loop carries on after the usual pause. A pass still running at
    /// shutdown is aborted before this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, devices = self.store.len(), "polling loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let poller = self.clone();
            let mut cycle = tokio::spawn(async move { poller.poll_once().await });

            tokio::select! {
                outcome = &mut cycle => match outcome {
                    Ok(report) => debug!(
                        updated = report.updated.len(),
                        no_fix = report.no_fix.len(),
                        failed = report.failed.len(),
                        "polling cycle complete"
                    ),
                    Err(e) => {
                        self.counters.aborted_cycles.fetch_add(1, Ordering::Relaxed);
                        error!(error = %e, "polling cycle aborted");
                    }
                },
                _ = shutdown.changed() => {
                    // The in-flight pass must not outlive the loop
                    cycle.abort();
                    let _ = cycle.await;
                    debug!("polling cycle cancelled by shutdown");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("polling loop stopped");
    }

    pub fn stats(&self) -> PollingStats {
        PollingStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            rejected_fixes: self.counters.rejected_fixes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            aborted_cycles: self.counters.aborted_cycles.load(Ordering::Relaxed),
        }
    }
}
