//! Per-station statistics aggregation.
//!
//! The aggregator consumes session state snapshots and decoded messages and
//! produces [`StationSnapshot`]s: throughput over a sliding window, message
//! type counts, unique satellites per constellation, and accumulated uptime.
//! It holds no locks of its own; the pump task owns it and feeds it
//! sequentially.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::StationId;
use crate::rtcm::decoder::{Constellation, DecodedMessage};
use crate::session::{FailureKind, SessionPhase, SessionState};

/// Statistics knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsConfig {
    /// Sliding window over which the data rate is computed.
    pub rate_window: Duration,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig { rate_window: Duration::from_secs(10) }
    }
}

/// Tracks a consumer's position in a session's monotonic byte counter.
///
/// Each consumer owns its own baseline, so two observers polling the same
/// session at different cadences each see every byte exactly once. The
/// counter restarts from zero on every fresh connection; the epoch detects
/// that and rebases instead of reporting a huge negative (or zero) delta.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateBaseline {
    epoch: u64,
    last_total: u64,
}

impl RateBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes since the previous call, rebased across reconnects.
    pub fn delta(&mut self, epoch: u64, total: u64) -> u64 {
        if epoch != self.epoch {
            self.epoch = epoch;
            self.last_total = 0;
        }
        let delta = total.saturating_sub(self.last_total);
        self.last_total = total;
        delta
    }
}

/// Sliding-window byte rate.
#[derive(Debug)]
struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
    fn new(window: Duration) -> Self {
        RateWindow { window, samples: VecDeque::new() }
    }

    fn push(&mut self, now: Instant, bytes: u64) {
        self.samples.push_back((now, bytes));
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average bytes per second over the window. The span is clamped below
    /// at one second so a single burst right after connect does not report
    /// an absurd rate.
    fn bytes_per_sec(&mut self, now: Instant) -> f64 {
        self.evict(now);
        let Some(&(oldest, _)) = self.samples.front() else { return 0.0 };
        let total: u64 = self.samples.iter().map(|&(_, b)| b).sum();
        let span = now.duration_since(oldest).as_secs_f64().max(1.0);
        total as f64 / span
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Counters for one RTCM message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStats {
    pub count: u64,
    pub last_seen: Instant,
}

/// Everything tracked for one station. Counters cover the current
/// connection only; a new connection epoch resets them.
#[derive(Debug)]
struct StationStatistics {
    epoch: u64,
    baseline: RateBaseline,
    window: RateWindow,
    messages: BTreeMap<u16, MessageStats>,
    satellites: BTreeMap<Constellation, BTreeSet<u8>>,
    frames: u64,
    /// Uptime accumulated over completed `Connected` stretches.
    uptime_accum: Duration,
    /// Start of the current `Connected` stretch, if in one. `IdleWarning`
    /// closes the stretch: a silent connection does not accrue uptime.
    uptime_since: Option<Instant>,
    last_state: Option<SessionState>,
}

impl StationStatistics {
    fn new(config: &StatsConfig) -> Self {
        StationStatistics {
            epoch: 0,
            baseline: RateBaseline::new(),
            window: RateWindow::new(config.rate_window),
            messages: BTreeMap::new(),
            satellites: BTreeMap::new(),
            frames: 0,
            uptime_accum: Duration::ZERO,
            uptime_since: None,
            last_state: None,
        }
    }

    fn reset_for_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.window.clear();
        self.messages.clear();
        self.satellites.clear();
        self.frames = 0;
        self.uptime_accum = Duration::ZERO;
        self.uptime_since = None;
    }

    fn observe(&mut self, state: &SessionState, total_bytes: u64, now: Instant) {
        if state.connection_epoch != self.epoch {
            self.reset_for_epoch(state.connection_epoch);
        }

        let delta = self.baseline.delta(state.connection_epoch, total_bytes);
        if delta > 0 {
            self.window.push(now, delta);
        }

        match state.phase {
            SessionPhase::Connected => {
                if self.uptime_since.is_none() {
                    self.uptime_since = Some(now);
                }
            }
            _ => {
                if let Some(since) = self.uptime_since.take() {
                    self.uptime_accum += now.duration_since(since);
                }
            }
        }

        self.last_state = Some(state.clone());
    }

    fn record(&mut self, message: &DecodedMessage, now: Instant) {
        self.frames += 1;
        self.messages
            .entry(message.msg_type)
            .and_modify(|m| {
                m.count += 1;
                m.last_seen = now;
            })
            .or_insert(MessageStats { count: 1, last_seen: now });

        if let Some(sats) = &message.satellites {
            self.satellites.entry(sats.constellation).or_default().extend(&sats.prns);
        }
    }

    fn uptime(&self, now: Instant) -> Duration {
        match self.uptime_since {
            Some(since) => self.uptime_accum + now.duration_since(since),
            None => self.uptime_accum,
        }
    }

    fn snapshot(&mut self, now: Instant) -> StationSnapshot {
        let state = self.last_state.clone();
        StationSnapshot {
            phase: state.as_ref().map_or(SessionPhase::Disconnected, |s| s.phase),
            failure: state.as_ref().and_then(|s| s.failure),
            reconnect_attempts: state.as_ref().map_or(0, |s| s.reconnect_attempts),
            total_bytes: state.as_ref().map_or(0, |s| s.total_bytes),
            bytes_per_sec: self.window.bytes_per_sec(now),
            uptime: self.uptime(now),
            frames: self.frames,
            messages: self.messages.clone(),
            satellites: self.satellites.clone(),
        }
    }
}

/// Point-in-time view of one station's statistics.
#[derive(Debug, Clone)]
pub struct StationSnapshot {
    pub phase: SessionPhase,
    pub failure: Option<FailureKind>,
    pub reconnect_attempts: u32,
    /// Bytes received on the current connection.
    pub total_bytes: u64,
    /// Average rate over the sliding window.
    pub bytes_per_sec: f64,
    /// Time spent in `Connected` on the current connection; frozen while
    /// idle.
    pub uptime: Duration,
    /// Complete frames extracted on the current connection.
    pub frames: u64,
    pub messages: BTreeMap<u16, MessageStats>,
    /// Unique satellites seen per constellation.
    pub satellites: BTreeMap<Constellation, BTreeSet<u8>>,
}

impl StationSnapshot {
    pub fn is_connected(&self) -> bool {
        matches!(self.phase, SessionPhase::Connected | SessionPhase::IdleWarning)
    }

    /// Total unique satellites across all constellations.
    pub fn satellite_count(&self) -> usize {
        self.satellites.values().map(BTreeSet::len).sum()
    }
}

/// Owns statistics for every tracked station.
#[derive(Debug)]
pub struct StatsAggregator {
    config: StatsConfig,
    stations: HashMap<StationId, StationStatistics>,
}

impl StatsAggregator {
    pub fn new(config: StatsConfig) -> Self {
        StatsAggregator { config, stations: HashMap::new() }
    }

    /// Fold in a session state observation and the current byte total.
    pub fn observe(&mut self, id: &StationId, state: &SessionState, total_bytes: u64, now: Instant) {
        self.entry(id).observe(state, total_bytes, now);
    }

    /// Fold in one decoded message.
    pub fn record_message(&mut self, id: &StationId, message: &DecodedMessage, now: Instant) {
        self.entry(id).record(message, now);
    }

    pub fn snapshot(&mut self, id: &StationId, now: Instant) -> Option<StationSnapshot> {
        self.stations.get_mut(id).map(|s| s.snapshot(now))
    }

    pub fn snapshots(&mut self, now: Instant) -> HashMap<StationId, StationSnapshot> {
        self.stations.iter_mut().map(|(id, s)| (id.clone(), s.snapshot(now))).collect()
    }

    pub fn remove(&mut self, id: &StationId) {
        self.stations.remove(id);
    }

    fn entry(&mut self, id: &StationId) -> &mut StationStatistics {
        self.stations.entry(id.clone()).or_insert_with(|| StationStatistics::new(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcm::decoder::SatelliteInfo;

    fn state(phase: SessionPhase, epoch: u64, total: u64) -> SessionState {
        let mut s = SessionState::new(Instant::now());
        s.phase = phase;
        s.connection_epoch = epoch;
        s.total_bytes = total;
        s
    }

    fn msg(msg_type: u16) -> DecodedMessage {
        DecodedMessage { msg_type, satellites: None }
    }

    fn msm(msg_type: u16, constellation: Constellation, prns: &[u8]) -> DecodedMessage {
        DecodedMessage {
            msg_type,
            satellites: Some(SatelliteInfo {
                constellation,
                prns: prns.iter().copied().collect(),
            }),
        }
    }

    #[test]
    fn independent_baselines_each_see_every_byte() {
        // Two consumers polling at different cadences both account for the
        // full byte stream, regardless of interleaving.
        let mut fast = RateBaseline::new();
        let mut slow = RateBaseline::new();

        let totals = [100u64, 250, 400, 900];
        let mut fast_sum = 0;
        for &t in &totals {
            fast_sum += fast.delta(1, t);
        }
        let slow_sum = slow.delta(1, totals[1]) + slow.delta(1, totals[3]);

        assert_eq!(fast_sum, 900);
        assert_eq!(slow_sum, 900);
    }

    #[test]
    fn baseline_rebases_on_new_epoch() {
        let mut baseline = RateBaseline::new();
        assert_eq!(baseline.delta(1, 500), 500);
        // Counter restarted from zero on reconnect; a stale baseline must
        // not swallow the new connection's bytes.
        assert_eq!(baseline.delta(2, 50), 50);
        assert_eq!(baseline.delta(2, 80), 30);
    }

    #[test]
    fn window_rate_over_span() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(10));
        for i in 0..5u64 {
            window.push(start + Duration::from_secs(i), 1000);
        }
        let rate = window.bytes_per_sec(start + Duration::from_secs(4));
        assert!((rate - 1250.0).abs() < 1e-6, "rate {rate}");
    }

    #[test]
    fn window_evicts_old_samples() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(10));
        window.push(start, 1_000_000);
        window.push(start + Duration::from_secs(20), 500);
        // The burst from 20s ago is gone; only the recent sample counts.
        let rate = window.bytes_per_sec(start + Duration::from_secs(20));
        assert!((rate - 500.0).abs() < 1e-6, "rate {rate}");
    }

    #[test]
    fn empty_window_reports_zero() {
        let mut window = RateWindow::new(Duration::from_secs(10));
        assert_eq!(window.bytes_per_sec(Instant::now()), 0.0);
    }

    #[test]
    fn uptime_frozen_while_idle() {
        let id = StationId::from("s1");
        let mut agg = StatsAggregator::new(StatsConfig::default());
        let t0 = Instant::now();

        agg.observe(&id, &state(SessionPhase::Connected, 1, 0), 0, t0);
        agg.observe(
            &id,
            &state(SessionPhase::IdleWarning, 1, 100),
            100,
            t0 + Duration::from_secs(30),
        );
        // Twenty silent seconds later, uptime has not moved.
        let snap = agg.snapshot(&id, t0 + Duration::from_secs(50)).unwrap();
        assert_eq!(snap.uptime, Duration::from_secs(30));

        // Data resumes; uptime accrues again.
        agg.observe(
            &id,
            &state(SessionPhase::Connected, 1, 200),
            200,
            t0 + Duration::from_secs(50),
        );
        let snap = agg.snapshot(&id, t0 + Duration::from_secs(60)).unwrap();
        assert_eq!(snap.uptime, Duration::from_secs(40));
    }

    #[test]
    fn counters_reset_on_new_connection_epoch() {
        let id = StationId::from("s1");
        let mut agg = StatsAggregator::new(StatsConfig::default());
        let t0 = Instant::now();

        agg.observe(&id, &state(SessionPhase::Connected, 1, 500), 500, t0);
        agg.record_message(&id, &msg(1005), t0);
        agg.record_message(&id, &msm(1074, Constellation::Gps, &[1, 2, 3]), t0);

        let snap = agg.snapshot(&id, t0).unwrap();
        assert_eq!(snap.frames, 2);
        assert_eq!(snap.satellite_count(), 3);

        // Reconnect: everything starts over under the new epoch.
        agg.observe(&id, &state(SessionPhase::Connected, 2, 10), 10, t0 + Duration::from_secs(1));
        let snap = agg.snapshot(&id, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(snap.frames, 0);
        assert!(snap.messages.is_empty());
        assert!(snap.satellites.is_empty());
        assert_eq!(snap.uptime, Duration::ZERO);
    }

    #[test]
    fn satellites_deduplicated_across_messages() {
        let id = StationId::from("s1");
        let mut agg = StatsAggregator::new(StatsConfig::default());
        let now = Instant::now();

        agg.record_message(&id, &msm(1074, Constellation::Gps, &[1, 2]), now);
        agg.record_message(&id, &msm(1074, Constellation::Gps, &[2, 3]), now);
        agg.record_message(&id, &msm(1084, Constellation::Glonass, &[2]), now);

        let snap = agg.snapshot(&id, now).unwrap();
        assert_eq!(snap.satellites[&Constellation::Gps], BTreeSet::from([1, 2, 3]));
        assert_eq!(snap.satellites[&Constellation::Glonass], BTreeSet::from([2]));
        assert_eq!(snap.satellite_count(), 4);
        assert_eq!(snap.messages[&1074].count, 2);
    }

    #[test]
    fn snapshot_reflects_last_observed_state() {
        let id = StationId::from("s1");
        let mut agg = StatsAggregator::new(StatsConfig::default());
        let now = Instant::now();

        let mut s = state(SessionPhase::Terminated, 1, 0);
        s.failure = Some(FailureKind::IdleTimeout);
        s.reconnect_attempts = 2;
        agg.observe(&id, &s, 0, now);

        let snap = agg.snapshot(&id, now).unwrap();
        assert_eq!(snap.phase, SessionPhase::Terminated);
        assert_eq!(snap.failure, Some(FailureKind::IdleTimeout));
        assert_eq!(snap.reconnect_attempts, 2);
        assert!(!snap.is_connected());
    }
}
