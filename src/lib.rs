//! Async monitoring engine for NTRIP correction streams.
//!
//! ntripmon connects to NTRIP casters, keeps one session alive per
//! configured station, and turns the raw RTCM 3 byte streams into live
//! health telemetry: connection state, data rates, message inventories,
//! satellite counts, and alerts on degradation.
//!
//! # Features
//!
//! - **Sessions**: One supervised connection per station, with an explicit
//!   lifecycle state machine and bounded automatic reconnection
//! - **RTCM framing**: CRC-validated frame extraction that tolerates
//!   garbage, corruption, and arbitrary chunking
//! - **Statistics**: Sliding-window data rates, per-type message counts,
//!   unique satellites per constellation
//! - **Alerts**: Transition-edge alerts with startup grace, per-kind
//!   cooldown, and sustained-condition windows
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ntripmon::{Monitor, MonitorConfig, StationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let monitor = Monitor::new(MonitorConfig::default());
//!     monitor
//!         .add_station(StationConfig {
//!             name: "HELS00FIN".into(),
//!             host: "caster.example.net".into(),
//!             port: 2101,
//!             mount: "HELS00FIN_RTCM3".into(),
//!             user: "demo".into(),
//!             password: "demo".into(),
//!             lat: Some(60.17),
//!             lon: Some(24.94),
//!             alt: None,
//!         })
//!         .await?;
//!
//!     let mut snapshots = monitor.snapshots();
//!     loop {
//!         snapshots.changed().await?;
//!         for (id, snap) in snapshots.borrow().iter() {
//!             println!("{id}: {:?} {:.0} B/s", snap.phase, snap.bytes_per_sec);
//!         }
//!     }
//! }
//! ```

// Core types and error handling
mod config;
mod error;

// Stream plumbing
pub mod rtcm;
pub mod session;
pub mod sourcetable;

// Monitoring architecture
pub mod alerts;
pub mod monitor;
pub mod policy;
pub mod stats;
pub mod supervisor;

// Core exports
pub use config::{StationConfig, StationId};
pub use error::{MonitorError, Result};

// Facade exports
pub use alerts::{AlertConfig, AlertEvent, AlertKind, AlertSink, LogAlertSink};
pub use monitor::{Monitor, MonitorConfig, SnapshotMap};
pub use policy::{ReconnectPolicy, RetryDecision};
pub use session::{FailureKind, SessionPhase, SessionState, SessionTimings};
pub use stats::{StationSnapshot, StatsConfig};
pub use supervisor::Supervisor;

// Sourcetable exports
pub use sourcetable::{MountpointRecord, fetch_sourcetable, parse_sourcetable};
