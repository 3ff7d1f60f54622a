//! Push/query server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use fleet_sync::FleetEngine;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::routes::routes;

/// Running warp server exposing the engine
pub struct PushServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl PushServer {
    /// Bind `addr` and start serving in a background task.
    ///
    /// Port `0` picks a free port; see [`PushServer::local_addr`].
    pub async fn start(engine: Arc<FleetEngine>, addr: SocketAddr) -> Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let (local_addr, server) = warp::serve(routes(engine))
            .try_bind_with_graceful_shutdown(addr, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| ServerError::Bind {
                addr,
                message: e.to_string(),
            })?;

        let server_handle = tokio::spawn(server);
        info!(%local_addr, "push server listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the server task to finish.
    ///
    /// Open WebSocket connections are not waited for.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "push server task ended abnormally");
                return Err(ServerError::Task(e.to_string()));
            }
        }

        info!("push server stopped");
        Ok(())
    }
}
