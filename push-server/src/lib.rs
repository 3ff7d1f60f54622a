//! Push and query server for the fleet sync engine
//!
//! Serves the engine over warp:
//!
//! | Route | |
//! |-------|-|
//! | `GET /ws/live` | WebSocket push subscriber |
//! | `GET /api/health` | health report |
//! | `GET /api/live` | all device states |
//! | `GET /api/gps/{id}` | one device state |
//! | `GET /api/liveplate?device_id=..` | enriched entry, looked up by id or label |
//! | `GET /api/liveplate_all` | enriched entries for every device |

mod error;
pub mod routes;
mod server;
pub mod ws;

pub use error::{Result, ServerError};
pub use routes::routes;
pub use server::PushServer;
