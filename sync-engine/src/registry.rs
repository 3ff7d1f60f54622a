//! Registry of connected push subscribers.
//!
//! The registry owns one handle per live connection. Broadcasting works on a
//! copy of the current handles so connections may come and go while a
//! delivery is in flight; failed subscribers are removed once all sends have
//! settled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Why a push to one subscriber failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("send timed out")]
    TimedOut,
}

/// A push connection able to receive serialized snapshots.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Deliver one message
    async fn send(&self, payload: Arc<str>) -> Result<(), SendError>;

    /// Short description for logs, such as the peer address
    fn describe(&self) -> String {
        "subscriber".to_string()
    }

    /// Called once the registry has dropped this subscriber, whether by an
    /// explicit removal or by pruning after a failed push. Connection owners
    /// use it to tear down the transport.
    fn on_removed(&self) {}
}

/// Identifier assigned to a subscriber on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one delivery round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub pruned: Vec<SubscriberId>,
}

/// Set of currently connected subscribers
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<DashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber, returning the id it is known by
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId::new();
        info!(subscriber_id = %id, peer = %subscriber.describe(), "subscriber connected");
        self.subscribers.insert(id, subscriber);
        id
    }

    /// Remove a subscriber, returning whether it was registered
    pub fn remove(&self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, subscriber)) => {
                info!(subscriber_id = %id, remaining = self.subscribers.len(), "subscriber removed");
                subscriber.on_removed();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Copy of the current handles
    pub fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber>)> {
        self.subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Send `payload` to every subscriber concurrently.
    ///
    /// Each send is bounded by `timeout`. Subscribers whose send failed or
    /// timed out are removed after every send has completed.
    pub async fn deliver(&self, payload: Arc<str>, timeout: Duration) -> DeliveryReport {
        let targets = self.snapshot();
        if targets.is_empty() {
            return DeliveryReport::default();
        }

        let sends = targets.into_iter().map(|(id, subscriber)| {
            let payload = payload.clone();
            async move {
                let outcome = match tokio::time::timeout(timeout, subscriber.send(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(SendError::TimedOut),
                };
                (id, outcome)
            }
        });

        let mut report = DeliveryReport::default();
        for (id, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(subscriber_id = %id, error = %e, "push failed");
                    report.pruned.push(id);
                }
            }
        }

        for id in &report.pruned {
            self.remove(*id);
        }

        report
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
