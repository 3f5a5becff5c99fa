//! Core engine for Convoy group-coordination alerts.
//!
//! Pure logic only: geo math, lag detection over member snapshots, the
//! low-battery monitor, and the per-session alert lifecycle manager. All
//! I/O (the realtime store, local notifications, timers) lives in the
//! session layer.

pub mod battery;
pub mod geo;
pub mod lag;
pub mod lifecycle;
pub mod models;
pub mod policy;

pub use battery::BatteryMonitor;
pub use geo::haversine_distance;
pub use lag::LagDetector;
pub use lifecycle::{AlertAction, AlertManager, AlertStatus};
pub use models::{online_count, AckRecord, Alert, AlertKey, AlertKind, LatLng, Position};
pub use policy::{AlertPolicy, DistanceUnit, LagPreset, ResolutionPolicy};
