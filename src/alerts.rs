//! Alert evaluation and delivery.
//!
//! The evaluator is a pure state machine over station snapshots: each pump
//! tick it compares the latest [`StationSnapshot`] against its per-station
//! memory and emits [`AlertEvent`]s for condition transitions. Delivery is
//! behind the [`AlertSink`] trait so callers can route events anywhere;
//! every event also goes out on the monitor's broadcast channel.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StationId;
use crate::stats::StationSnapshot;

/// Alert condition categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// Station went from connected to not connected.
    ConnectionLost,
    /// Station came (back) up.
    ConnectionRestored,
    /// Data rate stayed below the threshold for the whole low-rate window.
    LowDataRate,
    /// Unique satellite count dropped below the minimum after having been
    /// at or above it.
    LowSatellites,
}

impl AlertKind {
    pub fn name(&self) -> &'static str {
        match self {
            AlertKind::ConnectionLost => "connection lost",
            AlertKind::ConnectionRestored => "connection restored",
            AlertKind::LowDataRate => "low data rate",
            AlertKind::LowSatellites => "low satellite count",
        }
    }
}

/// One raised alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub station: StationId,
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: Instant,
}

/// Alerting knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertConfig {
    /// No alerts for a station until this long after monitoring starts;
    /// initial connection churn is expected, not noteworthy.
    pub startup_grace: Duration,
    /// Minimum spacing between two alerts of the same kind for the same
    /// station.
    pub cooldown: Duration,
    /// Rate threshold for [`AlertKind::LowDataRate`], in bytes per second.
    pub low_rate_threshold: f64,
    /// The rate must stay below the threshold for this long before the
    /// alert fires; brief dips are ignored.
    pub low_rate_window: Duration,
    /// Minimum unique satellites for [`AlertKind::LowSatellites`].
    pub min_satellites: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            startup_grace: Duration::from_secs(15),
            cooldown: Duration::from_secs(300),
            low_rate_threshold: 100.0,
            low_rate_window: Duration::from_secs(30),
            min_satellites: 4,
        }
    }
}

/// Per-kind suppression memory.
#[derive(Debug, Default, Clone, Copy)]
struct KindState {
    /// Condition is currently active (alert fired, not yet cleared).
    raised: bool,
    last_raised: Option<Instant>,
}

/// Per-station evaluator memory.
#[derive(Debug)]
struct StationAlertState {
    first_seen: Instant,
    /// Connectivity at the previous tick. `None` until the first
    /// observation: the very first status is a baseline, not a transition.
    prev_connected: Option<bool>,
    /// Start of the current below-threshold stretch.
    low_rate_since: Option<Instant>,
    /// The satellite alert only arms once the count has reached the
    /// minimum; a station still acquiring satellites is not degraded.
    sat_baseline_seen: bool,
    kinds: HashMap<AlertKind, KindState>,
}

impl StationAlertState {
    fn new(now: Instant) -> Self {
        StationAlertState {
            first_seen: now,
            prev_connected: None,
            low_rate_since: None,
            sat_baseline_seen: false,
            kinds: HashMap::new(),
        }
    }
}

/// Stateful alert evaluator, one instance for the whole monitor.
#[derive(Debug)]
pub struct AlertEvaluator {
    config: AlertConfig,
    stations: HashMap<StationId, StationAlertState>,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        AlertEvaluator { config, stations: HashMap::new() }
    }

    /// Evaluate one station snapshot, returning any newly raised alerts.
    pub fn evaluate(
        &mut self,
        id: &StationId,
        snapshot: &StationSnapshot,
        now: Instant,
    ) -> Vec<AlertEvent> {
        let config = self.config;
        let state = self
            .stations
            .entry(id.clone())
            .or_insert_with(|| StationAlertState::new(now));

        let mut events = Vec::new();
        let in_grace = now.duration_since(state.first_seen) < config.startup_grace;
        let connected = snapshot.is_connected();

        // Connectivity transitions.
        match (state.prev_connected, connected) {
            (Some(true), false) => {
                let detail = snapshot
                    .failure
                    .map(|f| format!(" ({f:?})"))
                    .unwrap_or_default();
                raise(
                    state,
                    &config,
                    AlertKind::ConnectionLost,
                    format!("Connection lost{detail}"),
                    id,
                    now,
                    in_grace,
                    &mut events,
                );
                clear(state, AlertKind::ConnectionRestored);
            }
            (Some(false), true) => {
                raise(
                    state,
                    &config,
                    AlertKind::ConnectionRestored,
                    "Connection restored".to_string(),
                    id,
                    now,
                    in_grace,
                    &mut events,
                );
                clear(state, AlertKind::ConnectionLost);
            }
            _ => {}
        }
        state.prev_connected = Some(connected);

        // Low data rate: must persist for the whole window while connected.
        if connected && snapshot.bytes_per_sec < config.low_rate_threshold {
            let since = *state.low_rate_since.get_or_insert(now);
            if now.duration_since(since) >= config.low_rate_window {
                raise(
                    state,
                    &config,
                    AlertKind::LowDataRate,
                    format!(
                        "Data rate {:.0} B/s below {:.0} B/s for {:?}",
                        snapshot.bytes_per_sec, config.low_rate_threshold, config.low_rate_window
                    ),
                    id,
                    now,
                    in_grace,
                    &mut events,
                );
            }
        } else {
            state.low_rate_since = None;
            clear(state, AlertKind::LowDataRate);
        }

        // Low satellite count, armed only after a healthy baseline.
        let sat_count = snapshot.satellite_count();
        if connected {
            if sat_count >= config.min_satellites {
                state.sat_baseline_seen = true;
                clear(state, AlertKind::LowSatellites);
            } else if state.sat_baseline_seen {
                raise(
                    state,
                    &config,
                    AlertKind::LowSatellites,
                    format!("Tracking {sat_count} satellites, minimum is {}", config.min_satellites),
                    id,
                    now,
                    in_grace,
                    &mut events,
                );
            }
        } else {
            // A reconnect starts satellite acquisition over.
            state.sat_baseline_seen = false;
            clear(state, AlertKind::LowSatellites);
        }

        events
    }

    /// Drop a station's alert memory.
    pub fn remove(&mut self, id: &StationId) {
        self.stations.remove(id);
    }
}

/// Raise `kind` unless it is already active, inside the startup grace, or
/// within the cooldown since it last fired.
#[allow(clippy::too_many_arguments)]
fn raise(
    state: &mut StationAlertState,
    config: &AlertConfig,
    kind: AlertKind,
    message: String,
    id: &StationId,
    now: Instant,
    in_grace: bool,
    events: &mut Vec<AlertEvent>,
) {
    let kind_state = state.kinds.entry(kind).or_default();
    if kind_state.raised {
        return;
    }
    kind_state.raised = true;
    if in_grace {
        return;
    }
    if let Some(last) = kind_state.last_raised {
        if now.duration_since(last) < config.cooldown {
            return;
        }
    }
    kind_state.last_raised = Some(now);
    events.push(AlertEvent { station: id.clone(), kind, message, raised_at: now });
}

fn clear(state: &mut StationAlertState, kind: AlertKind) {
    if let Some(kind_state) = state.kinds.get_mut(&kind) {
        kind_state.raised = false;
    }
}

/// Destination for raised alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &AlertEvent);
}

/// Default sink: structured log records, warnings for degradations.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, event: &AlertEvent) {
        match event.kind {
            AlertKind::ConnectionRestored => {
                info!(station = %event.station, alert = event.kind.name(), "{}", event.message);
            }
            _ => {
                warn!(station = %event.station, alert = event.kind.name(), "{}", event.message);
            }
        }
    }
}
