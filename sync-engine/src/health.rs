//! Health report for the engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use state_store::{DeviceId, Freshness};

/// Overall engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetApiHealth {
    pub connected: bool,
    pub session_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub device_ids: Vec<DeviceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsDataHealth {
    /// Seconds since the newest refresh of any device
    pub last_update_seconds_ago: Option<f64>,
    /// Seconds since the least recently refreshed device was refreshed
    pub oldest_data_age: Option<f64>,
    pub is_fresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketHealth {
    pub active_connections: usize,
}

/// Snapshot of engine health, served by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub fleet_api: FleetApiHealth,
    pub devices: DeviceHealth,
    pub gps_data: GpsDataHealth,
    pub websocket: WebsocketHealth,
    pub environment: String,
}

/// Inputs gathered from the running engine
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub now: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub session_active: bool,
    pub freshness: Freshness,
    pub device_ids: Vec<DeviceId>,
    pub subscribers: usize,
    pub environment: String,
    pub fresh_within: Duration,
    pub stale_after: Duration,
}

fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

impl HealthReport {
    /// Healthy only with a session, at least one online device and data
    /// younger than `stale_after`.
    pub fn evaluate(inputs: HealthInputs) -> Self {
        let newest_age = inputs.freshness.newest.map(|at| seconds_between(inputs.now, at));
        let oldest_age = inputs.freshness.oldest.map(|at| seconds_between(inputs.now, at));

        let within = |age: Option<f64>, limit: Duration| {
            age.map_or(false, |age| age < limit.as_secs_f64())
        };

        let healthy = inputs.session_active
            && inputs.freshness.online > 0
            && within(newest_age, inputs.stale_after);

        HealthReport {
            status: if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            timestamp: inputs.now,
            uptime_seconds: seconds_between(inputs.now, inputs.started_at),
            fleet_api: FleetApiHealth {
                connected: inputs.session_active,
                session_valid: inputs.session_active,
            },
            devices: DeviceHealth {
                total: inputs.freshness.total,
                online: inputs.freshness.online,
                offline: inputs.freshness.offline(),
                device_ids: inputs.device_ids,
            },
            gps_data: GpsDataHealth {
                last_update_seconds_ago: newest_age,
                oldest_data_age: oldest_age,
                is_fresh: within(newest_age, inputs.fresh_within),
            },
            websocket: WebsocketHealth {
                active_connections: inputs.subscribers,
            },
            environment: inputs.environment,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
