//! Upstream fleet telemetry access
//!
//! This crate talks to the fleet provider's HTTP API. It owns the shared
//! session token and turns raw responses into typed device snapshots.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fleet_upstream::{AccountCredentials, HttpTelemetryApi, SessionManager, TelemetryFetcher};
//!
//! # async fn example() -> fleet_upstream::Result<()> {
//! let api = Arc::new(HttpTelemetryApi::new("http://fleet.lagaam.in", Duration::from_secs(10))?);
//! let sessions = Arc::new(SessionManager::new(
//!     api.clone(),
//!     AccountCredentials::new("account", "password"),
//! ));
//! let fetcher = TelemetryFetcher::new(api, sessions);
//!
//! let snapshot = fetcher.fetch_status("012345678901").await?;
//! if snapshot.has_fix() {
//!     println!("{} at {}, {}", snapshot.device_id, snapshot.latitude, snapshot.longitude);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod fetcher;
pub mod session;
pub mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use client::{HttpTelemetryApi, TelemetryApi};
pub use error::{result_code_message, FetchError, Result};
pub use fetcher::TelemetryFetcher;
pub use session::{AccountCredentials, SessionManager, SessionToken};
pub use wire::{DeviceMetadata, StatusSnapshot};
