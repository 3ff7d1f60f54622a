//! Live-state synchronization for a vehicle fleet
//!
//! The engine keeps a near-real-time view of a fixed set of devices and pushes
//! it to connected viewers:
//!
//! - a polling loop refreshes every device from the upstream API on a fixed
//!   cadence and writes fixes into the shared [`state_store::LiveStateStore`]
//! - a broadcast loop renders an enriched snapshot on its own cadence and
//!   pushes the same payload to every registered [`Subscriber`]
//!
//! The two loops never wait on each other; the store's per-device locks are
//! the only point where they meet.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleet_sync::{EngineConfig, FleetEngine, LoggingSink};
//!
//! # async fn example() -> fleet_sync::Result<()> {
//! let config = EngineConfig::new()
//!     .with_devices(["012345678901", "012345678902"])
//!     .with_credentials("account", "password");
//!
//! let engine = Arc::new(FleetEngine::from_config(config, Arc::new(LoggingSink))?);
//! let handle = engine.start()?;
//!
//! for state in engine.get_all_device_states() {
//!     println!("{} online={}", state.display_label, state.online);
//! }
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod automap;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod polling;
pub mod registry;
pub mod snapshot;

pub use automap::{derive_external_id, AutoMapRequest, AutoMapSink, LoggingSink};
pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::{parse_device_list, parse_origin_list, ConfigError, EngineConfig};
pub use engine::{EngineHandle, FleetEngine};
pub use error::{EngineError, Result};
pub use health::{HealthReport, HealthStatus};
pub use polling::{CycleReport, Poller, PollingStats};
pub use registry::{DeliveryReport, SendError, Subscriber, SubscriberId, SubscriberRegistry};
pub use snapshot::{EnrichedEntry, SnapshotBuilder};

// Re-exported so dependents need not name the lower crates for common types
pub use state_store::{DeviceId, DeviceState, Position};
