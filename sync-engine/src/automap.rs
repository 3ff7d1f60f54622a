//! Background mapping of devices to external display records.
//!
//! Each status fix carrying a label produces an [`AutoMapRequest`]. Requests
//! go through an unbounded queue to a worker that hands them to an
//! [`AutoMapSink`]. The polling loop never waits on the sink and never learns
//! whether it succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upsert of one device's display record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoMapRequest {
    pub device_id: String,
    pub label: String,
    /// Key of the external record, derived from the label
    pub external_id: String,
}

impl AutoMapRequest {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            device_id: device_id.into(),
            external_id: derive_external_id(&label),
            label,
        }
    }
}

/// First run of ASCII digits in `label`, or the whole label when it has none.
///
/// `"Bus26"` maps to `"26"`, `"BusNo.6A"` to `"6"`.
pub fn derive_external_id(label: &str) -> String {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        label.to_string()
    } else {
        digits
    }
}

/// Destination of auto-map requests
#[async_trait]
pub trait AutoMapSink: Send + Sync {
    async fn upsert(&self, request: &AutoMapRequest) -> Result<(), String>;
}

/// Sink that only logs the upsert it would perform
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl AutoMapSink for LoggingSink {
    async fn upsert(&self, request: &AutoMapRequest) -> Result<(), String> {
        info!(
            device_id = %request.device_id,
            label = %request.label,
            external_id = %request.external_id,
            "auto-map upsert"
        );
        Ok(())
    }
}

/// Sending half handed to the polling loop
#[derive(Debug, Clone)]
pub struct AutoMapDispatcher {
    tx: mpsc::UnboundedSender<AutoMapRequest>,
}

impl AutoMapDispatcher {
    /// Queue a request without waiting. Dropped silently once the worker is gone.
    pub fn dispatch(&self, request: AutoMapRequest) {
        if self.tx.send(request).is_err() {
            debug!("auto-map worker stopped, request dropped");
        }
    }
}

/// Receiving half, drained by [`AutoMapWorker::spawn`]
pub struct AutoMapWorker {
    rx: mpsc::UnboundedReceiver<AutoMapRequest>,
    sink: Arc<dyn AutoMapSink>,
}

impl AutoMapWorker {
    /// Start draining the queue. The task ends when every dispatcher is dropped.
    ///
    /// Each request runs in its own task so a slow or panicking sink call
    /// cannot hold up the ones behind it.
    pub fn spawn(self) -> JoinHandle<()> {
        let AutoMapWorker { mut rx, sink } = self;
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let sink = sink.clone();
                tokio::spawn(async move {
                    if let Err(e) = sink.upsert(&request).await {
                        warn!(device_id = %request.device_id, error = %e, "auto-map upsert failed");
                    }
                });
            }
            debug!("auto-map worker stopped");
        })
    }
}

/// Create a connected dispatcher and worker.
pub fn channel(sink: Arc<dyn AutoMapSink>) -> (AutoMapDispatcher, AutoMapWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AutoMapDispatcher { tx }, AutoMapWorker { rx, sink })
}
