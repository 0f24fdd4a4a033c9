//! WearLink telemetry synchronization engine
//!
//! Keeps one wearable's ring-buffered telemetry mirrored into a host-side
//! store: a per-device worker task schedules keepalive, activity, sleep and
//! summary requests, drains the device's 144-slot day ring in order, and
//! merges sleep overlays onto stored samples at read time. The wire protocol
//! lives in `wearlink-proto`; real transports plug in behind the `Transport`
//! seam.

pub mod config;
pub mod engine;
pub mod error;
pub mod ringbuf;
pub mod samples;
pub mod scheduler;
pub mod sim;
pub mod storage;
pub mod transaction;
pub mod transport;

pub use config::{CadenceConfig, SyncConfig};
pub use engine::{SyncEngine, SyncEvent, SyncHandle};
pub use error::{Result, SyncError};
pub use samples::{apply_overlays, KindMap, NormalizedKind, Overlay, Sample};
pub use storage::{MemoryStore, TelemetryStore};
pub use transaction::{Action, Transaction, TransactionQueue};
pub use transport::{Characteristic, ConnectionState, DeviceState, Transport, TransportEvent};
