//! Station configuration types.
//!
//! A [`StationConfig`] describes one caster/mountpoint pair to monitor. The
//! engine only reads these; persistence (e.g. a `casters.json` file) belongs
//! to the embedding application, which notifies the supervisor about
//! add/update/remove.

use serde::{Deserialize, Serialize};

/// Unique identifier for a configured station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        StationId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        StationId(s.to_string())
    }
}

/// Configuration for one NTRIP station connection.
///
/// Immutable for the lifetime of a session; editing a station restarts its
/// session under the new configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Display name, also used as the station identifier.
    pub name: String,
    /// Caster hostname or IP address.
    pub host: String,
    /// Caster port, conventionally 2101.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mountpoint to request.
    pub mount: String,
    /// Basic-auth username.
    #[serde(default)]
    pub user: String,
    /// Basic-auth password.
    #[serde(default)]
    pub password: String,
    /// Antenna latitude in decimal degrees, if known.
    #[serde(default)]
    pub lat: Option<f64>,
    /// Antenna longitude in decimal degrees, if known.
    #[serde(default)]
    pub lon: Option<f64>,
    /// Antenna altitude in metres, if known.
    #[serde(default)]
    pub alt: Option<f64>,
}

fn default_port() -> u16 {
    2101
}

impl StationConfig {
    /// Station identifier derived from the configured name.
    pub fn id(&self) -> StationId {
        StationId(self.name.clone())
    }
}
