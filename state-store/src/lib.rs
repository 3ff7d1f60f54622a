//! Last-known state of a fixed fleet of devices
//!
//! [`LiveStateStore`] holds one [`DeviceState`] per configured device for the
//! whole process lifetime. Entries are created with defaults when the store is
//! built and refreshed in place afterwards; they are never removed.
//!
//! Every read returns a copy taken under the entry's lock, so a reader never
//! observes a partially applied refresh. Reads spanning several devices are
//! consistent per device only.

mod error;
mod model;
mod store;

pub use error::{Result, StoreError};
pub use model::{DeviceId, DeviceState, Position, StatusPatch};
pub use store::{Freshness, LiveStateStore};
