//! Live state storage
//!
//! The set of devices is fixed when the store is built, so the map itself is
//! never mutated afterwards. Each entry carries its own lock: a writer
//! refreshing one device never blocks readers of another.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Result, StoreError};
use crate::model::{DeviceId, DeviceState, Position, StatusPatch};

// ============================================================================
// Freshness - aggregate view used by health reporting
// ============================================================================

/// Online count and data age across all devices
#[derive(Debug, Clone, PartialEq)]
pub struct Freshness {
    pub total: usize,
    pub online: usize,
    /// Most recent `last_update` of any device
    pub newest: Option<DateTime<Utc>>,
    /// Least recent `last_update` of any device
    pub oldest: Option<DateTime<Utc>>,
}

impl Freshness {
    pub fn offline(&self) -> usize {
        self.total - self.online
    }
}

// ============================================================================
// LiveStateStore
// ============================================================================

/// Last known state of every configured device
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use state_store::{LiveStateStore, Position, StatusPatch};
///
/// let store = LiveStateStore::new(["D1", "D2"], Position::default(), Utc::now()).unwrap();
///
/// store.update("D1", &StatusPatch {
///     online: true,
///     latitude: 12.9,
///     longitude: 77.5,
///     speed_kmh: 30.0,
///     label: Some("BusA".to_string()),
///     observed_at: Utc::now(),
/// });
///
/// assert_eq!(store.get("D1").unwrap().display_label, "BusA");
/// assert_eq!(store.get("D2").unwrap().display_label, "BUS-2");
/// assert!(store.get("D3").is_none());
/// ```
pub struct LiveStateStore {
    /// Device ids in configured order
    order: Vec<DeviceId>,
    entries: HashMap<DeviceId, RwLock<DeviceState>>,
}

impl LiveStateStore {
    /// Build the store with one default entry per device.
    ///
    /// Fails if `device_ids` is empty, contains a blank id or a duplicate.
    pub fn new<I, S>(device_ids: I, default_position: Position, now: DateTime<Utc>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<DeviceId>,
    {
        let mut order = Vec::new();
        let mut entries = HashMap::new();

        for (index, id) in device_ids.into_iter().enumerate() {
            let id: DeviceId = id.into();
            if id.as_str().trim().is_empty() {
                return Err(StoreError::BlankDevice);
            }
            if entries.contains_key(&id) {
                return Err(StoreError::DuplicateDevice(id.0));
            }
            let state = DeviceState::initial(id.clone(), index, default_position, now);
            entries.insert(id.clone(), RwLock::new(state));
            order.push(id);
        }

        if order.is_empty() {
            return Err(StoreError::NoDevices);
        }

        debug!(devices = order.len(), "live state store initialised");
        Ok(Self { order, entries })
    }

    /// Copy of one device's state, `None` for an unknown id
    pub fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.entries.get(device_id).map(|entry| entry.read().clone())
    }

    /// Copies of every device's state in configured order
    ///
    /// Each entry is read atomically; the list as a whole is not a
    /// point-in-time snapshot across devices.
    pub fn get_all(&self) -> Vec<DeviceState> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.read().clone())
            .collect()
    }

    /// Apply a status refresh, returning `false` for an unknown id.
    pub fn update(&self, device_id: &str, patch: &StatusPatch) -> bool {
        match self.entries.get(device_id) {
            Some(entry) => {
                entry.write().apply(patch);
                trace!(device_id, "device state updated");
                true
            }
            None => false,
        }
    }

    /// Store the latest metadata record for a device.
    ///
    /// The metadata label becomes the display label only while no telemetry
    /// label is known.
    pub fn record_metadata(&self, device_id: &str, label: Option<&str>, record: Value) -> bool {
        match self.entries.get(device_id) {
            Some(entry) => {
                let mut state = entry.write();
                if let (None, Some(label)) = (&state.telemetry_label, label) {
                    state.display_label = label.to_string();
                }
                state.raw_metadata = Some(record);
                true
            }
            None => false,
        }
    }

    /// First device, in configured order, that `query` names by id or label
    pub fn find(&self, query: &str) -> Option<DeviceId> {
        if self.entries.contains_key(query) {
            return Some(DeviceId::from(query));
        }
        self.order
            .iter()
            .find(|id| {
                self.entries
                    .get(*id)
                    .map(|entry| entry.read().matches(query))
                    .unwrap_or(false)
            })
            .cloned()
    }

    pub fn device_ids(&self) -> &[DeviceId] {
        &self.order
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn freshness(&self) -> Freshness {
        let mut freshness = Freshness {
            total: self.order.len(),
            online: 0,
            newest: None,
            oldest: None,
        };

        for entry in self.entries.values() {
            let state = entry.read();
            if state.online {
                freshness.online += 1;
            }
            let at = state.last_update;
            freshness.newest = Some(freshness.newest.map_or(at, |n| n.max(at)));
            freshness.oldest = Some(freshness.oldest.map_or(at, |o| o.min(at)));
        }

        freshness
    }
}

impl std::fmt::Debug for LiveStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStateStore")
            .field("devices", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn patch(latitude: f64, longitude: f64, label: Option<&str>) -> StatusPatch {
        StatusPatch {
            online: true,
            latitude,
            longitude,
            speed_kmh: 30.0,
            label: label.map(str::to_string),
            observed_at: start() + chrono::Duration::seconds(10),
        }
    }

    fn store(ids: &[&str]) -> LiveStateStore {
        LiveStateStore::new(ids.iter().copied(), Position::default(), start()).unwrap()
    }

    #[test]
    fn test_construction_errors() {
        let empty: [&str; 0] = [];
        assert_eq!(
            LiveStateStore::new(empty, Position::default(), start()).unwrap_err(),
            StoreError::NoDevices
        );
        assert_eq!(
            LiveStateStore::new(["D1", "D2", "D1"], Position::default(), start()).unwrap_err(),
            StoreError::DuplicateDevice("D1".to_string())
        );
        assert_eq!(
            LiveStateStore::new(["D1", " "], Position::default(), start()).unwrap_err(),
            StoreError::BlankDevice
        );
    }

    #[test]
    fn test_get_all_preserves_configured_order() {
        let store = store(&["Z9", "A1", "M5"]);
        let ids: Vec<String> = store
            .get_all()
            .into_iter()
            .map(|s| s.device_id.0)
            .collect();
        assert_eq!(ids, vec!["Z9", "A1", "M5"]);
        assert_eq!(store.get("M5").unwrap().display_label, "BUS-3");
    }

    #[test]
    fn test_update_touches_only_target() {
        let store = store(&["D1", "D2"]);
        let before = store.get("D2").unwrap();

        assert!(store.update("D1", &patch(12.9, 77.5, Some("BusA"))));

        let d1 = store.get("D1").unwrap();
        assert_eq!(d1.latitude, 12.9);
        assert_eq!(d1.display_label, "BusA");
        assert_eq!(store.get("D2").unwrap(), before);
    }

    #[test]
    fn test_unknown_device() {
        let store = store(&["D1"]);
        assert!(store.get("D404").is_none());
        assert!(!store.update("D404", &patch(1.0, 1.0, None)));
        assert!(!store.record_metadata("D404", Some("x"), json!({})));
        assert!(!store.contains("D404"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_record_metadata_label_precedence() {
        let store = store(&["D1", "D2"]);

        store.record_metadata("D1", Some("BusNo.6"), json!({"vid": "BusNo.6"}));
        let d1 = store.get("D1").unwrap();
        assert_eq!(d1.display_label, "BusNo.6");
        assert_eq!(d1.raw_metadata, Some(json!({"vid": "BusNo.6"})));

        store.update("D2", &patch(12.9, 77.5, Some("Bus26")));
        store.record_metadata("D2", Some("BusNo.6"), json!({"vid": "BusNo.6"}));
        assert_eq!(store.get("D2").unwrap().display_label, "Bus26");
    }

    #[test]
    fn test_find() {
        let store = store(&["D1", "D2"]);
        store.update("D2", &patch(12.9, 77.5, Some("BusNo.26")));

        assert_eq!(store.find("D1"), Some(DeviceId::from("D1")));
        assert_eq!(store.find("BusNo.26"), Some(DeviceId::from("D2")));
        assert_eq!(store.find("26"), Some(DeviceId::from("D2")));
        assert_eq!(store.find("BUS-1"), Some(DeviceId::from("D1")));
        assert_eq!(store.find("nothing"), None);
    }

    #[test]
    fn test_freshness() {
        let store = store(&["D1", "D2", "D3"]);
        let initial = store.freshness();
        assert_eq!(initial.total, 3);
        assert_eq!(initial.online, 0);
        assert_eq!(initial.offline(), 3);
        assert_eq!(initial.newest, Some(start()));
        assert_eq!(initial.oldest, Some(start()));

        store.update("D3", &patch(12.9, 77.5, None));
        let after = store.freshness();
        assert_eq!(after.online, 1);
        assert_eq!(after.newest, Some(start() + chrono::Duration::seconds(10)));
        assert_eq!(after.oldest, Some(start()));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(store(&["D1", "D2"]));
        store.update("D1", &patch(0.5, 0.5, None));
        let mut handles = Vec::new();

        for i in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for n in 0..500 {
                    let value = (i * 1000 + n) as f64 + 1.0;
                    store.update("D1", &patch(value, value, None));
                }
            }));
        }
        for _ in 0..4 {
            let store = store.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..500 {
                    // A reader never sees latitude and longitude from different writes
                    let state = store.get("D1").unwrap();
                    assert_eq!(state.latitude.to_bits(), state.longitude.to_bits());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get("D2").unwrap().latitude, 28.6139);
    }

    proptest! {
        #[test]
        fn prop_every_configured_id_has_one_entry(
            ids in proptest::collection::hash_set("[A-Z][0-9]{1,4}", 1..20),
            updates in proptest::collection::vec((0usize..40, -90.0f64..90.0, -180.0f64..180.0), 0..50),
        ) {
            let ids: Vec<String> = ids.into_iter().collect();
            let store = LiveStateStore::new(ids.clone(), Position::default(), start()).unwrap();

            for (index, latitude, longitude) in updates {
                let target = ids.get(index).cloned().unwrap_or_else(|| "unknown".to_string());
                store.update(&target, &patch(latitude, longitude, None));
            }

            let all = store.get_all();
            prop_assert_eq!(all.len(), ids.len());
            for (state, id) in all.iter().zip(ids.iter()) {
                prop_assert_eq!(state.device_id.as_str(), id.as_str());
            }
        }
    }
}
