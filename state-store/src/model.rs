//! Device identity and state types

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a configured device (the upstream `devIdno`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl Default for Position {
    /// Where devices are placed before their first fix
    fn default() -> Self {
        Self::new(28.6139, 77.2090)
    }
}

/// Last known state of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub device_id: DeviceId,
    pub online: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub last_update: DateTime<Utc>,
    pub display_label: String,
    /// Label carried by the latest status fix
    pub telemetry_label: Option<String>,
    /// Latest metadata record; exposed through enriched snapshots only
    #[serde(skip_serializing)]
    pub raw_metadata: Option<Value>,
}

impl DeviceState {
    /// Startup state of the device configured at `position_index` (zero based).
    pub fn initial(
        device_id: DeviceId,
        position_index: usize,
        position: Position,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            online: false,
            latitude: position.latitude,
            longitude: position.longitude,
            speed_kmh: 0.0,
            last_update: now,
            display_label: format!("BUS-{}", position_index + 1),
            telemetry_label: None,
            raw_metadata: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }

    /// Apply a status refresh in place.
    ///
    /// A patch without a label keeps the previous labels.
    pub fn apply(&mut self, patch: &StatusPatch) {
        self.online = patch.online;
        self.latitude = patch.latitude;
        self.longitude = patch.longitude;
        self.speed_kmh = patch.speed_kmh;
        self.last_update = patch.observed_at;
        if let Some(label) = &patch.label {
            self.telemetry_label = Some(label.clone());
            self.display_label = label.clone();
        }
    }

    /// Whether `query` names this device by id or by one of its labels.
    ///
    /// Telemetry labels are also matched with a `BusNo.` prefix removed.
    pub fn matches(&self, query: &str) -> bool {
        if self.device_id.as_str() == query || self.display_label == query {
            return true;
        }
        match &self.telemetry_label {
            Some(label) => label == query || label.strip_prefix("BusNo.") == Some(query),
            None => false,
        }
    }

    /// Seconds since the last successful refresh.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_update).num_milliseconds() as f64 / 1000.0
    }
}

/// A successful status refresh for one device
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPatch {
    pub online: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub label: Option<String>,
    pub observed_at: DateTime<Utc>,
}
