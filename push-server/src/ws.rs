//! WebSocket push subscribers.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_sync::{FleetEngine, SendError, Subscriber};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use warp::ws::{Message, WebSocket};

/// Outgoing half of an accepted WebSocket
pub struct WsSubscriber {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    peer: Option<SocketAddr>,
    removed: Notify,
}

impl WsSubscriber {
    pub fn new(sink: SplitSink<WebSocket, Message>, peer: Option<SocketAddr>) -> Self {
        Self {
            sink: Mutex::new(sink),
            peer,
            removed: Notify::new(),
        }
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn send(&self, payload: Arc<str>) -> Result<(), SendError> {
        self.sink
            .lock()
            .await
            .send(Message::text(payload.to_string()))
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    fn describe(&self) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => "unknown peer".to_string(),
        }
    }

    fn on_removed(&self) {
        // notify_one keeps a permit if the connection task is not waiting yet
        self.removed.notify_one();
    }
}

/// Drive one accepted connection until it closes.
///
/// The client first receives a full snapshot, then is registered for
/// periodic broadcasts. Inbound frames only signal liveness; any close frame
/// or read error ends the connection and removes the subscriber. A subscriber
/// pruned by the registry after a failed push is closed from this side.
pub async fn serve_subscriber(socket: WebSocket, engine: Arc<FleetEngine>, peer: Option<SocketAddr>) {
    let (sink, mut inbound) = socket.split();
    let subscriber = Arc::new(WsSubscriber::new(sink, peer));

    if let Some(payload) = engine.initial_payload().await {
        let timeout = engine.config().send_timeout;
        let sent = tokio::time::timeout(timeout, subscriber.send(payload)).await;
        if !matches!(sent, Ok(Ok(()))) {
            debug!(peer = %subscriber.describe(), "initial snapshot not delivered, dropping connection");
            return;
        }
    }

    let id = engine.registry().register(subscriber.clone());

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(message)) if message.is_close() => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(subscriber_id = %id, error = %e, "websocket read failed");
                    break;
                }
                None => break,
            },
            _ = subscriber.removed.notified() => {
                debug!(subscriber_id = %id, "subscriber pruned, closing connection");
                break;
            }
        }
    }

    engine.registry().remove(id);
    subscriber.close().await;
}
