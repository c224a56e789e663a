//! Top-level monitor facade.
//!
//! Wires the pieces together: the [`Supervisor`] runs one session per
//! station, and a single pump task drains every session's frame buffer on a
//! fixed interval, feeding the extractor, decoder, statistics aggregator,
//! and alert evaluator in sequence. Consumers observe the result through a
//! watch channel of snapshots and a broadcast channel of alert events; they
//! never touch session internals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{Stream, StreamExt};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::alerts::{AlertConfig, AlertEvaluator, AlertEvent, AlertSink, LogAlertSink};
use crate::config::{StationConfig, StationId};
use crate::error::Result;
use crate::policy::ReconnectPolicy;
use crate::rtcm::decoder::{FrameDecoder, MsmDecoder};
use crate::rtcm::extractor::FrameExtractor;
use crate::session::{SessionHandle, SessionTimings};
use crate::stats::{StationSnapshot, StatsAggregator, StatsConfig};
use crate::supervisor::Supervisor;

/// Buffered alert events per subscriber before lagging drops old ones.
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Bounded wait for the pump task at shutdown.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// All monitor knobs in one place.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub timings: SessionTimings,
    pub policy: ReconnectPolicy,
    pub stats: StatsConfig,
    pub alerts: AlertConfig,
    /// How often the pump drains buffers and re-evaluates alerts.
    pub pump_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            timings: SessionTimings::default(),
            policy: ReconnectPolicy::default(),
            stats: StatsConfig::default(),
            alerts: AlertConfig::default(),
            pump_interval: Duration::from_secs(1),
        }
    }
}

/// Latest snapshot of every tracked station, republished each pump tick.
pub type SnapshotMap = HashMap<StationId, StationSnapshot>;

/// Owns the supervisor and the pump task.
pub struct Monitor {
    supervisor: Arc<Supervisor>,
    alert_tx: broadcast::Sender<AlertEvent>,
    snapshots_rx: watch::Receiver<SnapshotMap>,
    pump_cancel: CancellationToken,
    pump_task: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Monitor with the default MSM decoder and log-only alert sink.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_parts(config, Arc::new(MsmDecoder), Arc::new(LogAlertSink))
    }

    /// Monitor with caller-supplied decoder and alert sink.
    pub fn with_parts(
        config: MonitorConfig,
        decoder: Arc<dyn FrameDecoder>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let supervisor = Arc::new(Supervisor::new(config.policy, config.timings));
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let (snapshots_tx, snapshots_rx) = watch::channel(SnapshotMap::new());
        let pump_cancel = CancellationToken::new();

        let pump = Pump {
            supervisor: Arc::clone(&supervisor),
            decoder,
            sink,
            stats: StatsAggregator::new(config.stats),
            alerts: AlertEvaluator::new(config.alerts),
            extractors: HashMap::new(),
            alert_tx: alert_tx.clone(),
            snapshots_tx,
            interval: config.pump_interval,
        };
        let pump_task = tokio::spawn(pump.run(pump_cancel.clone()));

        Monitor {
            supervisor,
            alert_tx,
            snapshots_rx,
            pump_cancel,
            pump_task: Mutex::new(Some(pump_task)),
        }
    }

    /// Register a station and start its session.
    pub async fn add_station(&self, config: StationConfig) -> Result<()> {
        let id = config.id();
        self.supervisor.add_station(config).await;
        self.supervisor.start(&id).await
    }

    /// Replace a station's configuration, restarting its session if running.
    pub async fn update_station(&self, config: StationConfig) -> Result<()> {
        self.supervisor.update_station(config).await
    }

    /// Stop and forget a station. Its statistics and alert memory go with it.
    pub async fn remove_station(&self, id: &StationId) -> Result<()> {
        self.supervisor.remove_station(id).await
    }

    pub async fn start(&self, id: &StationId) -> Result<()> {
        self.supervisor.start(id).await
    }

    pub async fn stop(&self, id: &StationId) -> Result<()> {
        self.supervisor.stop(id).await
    }

    /// Restart every station that is not currently connected.
    pub async fn reconnect_all(&self) -> Result<()> {
        self.supervisor.reconnect_all().await
    }

    pub async fn station_ids(&self) -> Vec<StationId> {
        self.supervisor.station_ids().await
    }

    pub async fn station_config(&self, id: &StationId) -> Option<StationConfig> {
        self.supervisor.station_config(id).await
    }

    /// Watch channel carrying the latest snapshot map.
    pub fn snapshots(&self) -> watch::Receiver<SnapshotMap> {
        self.snapshots_rx.clone()
    }

    /// Latest snapshot for one station, if it has been observed yet.
    pub fn snapshot(&self, id: &StationId) -> Option<StationSnapshot> {
        self.snapshots_rx.borrow().get(id).cloned()
    }

    /// Stream of alert events. Each subscriber gets every event from the
    /// point of subscription; a lagging subscriber silently loses the
    /// oldest events rather than erroring.
    pub fn alert_events(&self) -> impl Stream<Item = AlertEvent> + Send + Unpin + use<> {
        BroadcastStream::new(self.alert_tx.subscribe())
            .filter_map(|event| futures::future::ready(event.ok()))
    }

    /// Stop the pump and every session, waiting (bounded) for the tasks.
    pub async fn shutdown(&self) -> Result<()> {
        self.pump_cancel.cancel();
        if let Some(task) = self.pump_task.lock().await.take() {
            if tokio::time::timeout(PUMP_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Pump task did not exit within {:?}", PUMP_JOIN_TIMEOUT);
            }
        }
        self.supervisor.shutdown().await
    }
}

/// The consumer side of every session: drains buffers, decodes, aggregates,
/// alerts. Single task, sequential, no locks held across awaits.
struct Pump {
    supervisor: Arc<Supervisor>,
    decoder: Arc<dyn FrameDecoder>,
    sink: Arc<dyn AlertSink>,
    stats: StatsAggregator,
    alerts: AlertEvaluator,
    extractors: HashMap<StationId, FrameExtractor>,
    alert_tx: broadcast::Sender<AlertEvent>,
    snapshots_tx: watch::Sender<SnapshotMap>,
    interval: Duration,
}

impl Pump {
    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Pump stopped");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        let sessions = self.supervisor.sessions().await;

        for (id, handle) in &sessions {
            self.drain_station(id, handle, now).await;
        }

        self.forget_removed().await;

        let snapshots: SnapshotMap = self.stats.snapshots(now);
        self.snapshots_tx.send_replace(snapshots);
    }

    async fn drain_station(&mut self, id: &StationId, handle: &SessionHandle, now: Instant) {
        let state = handle.state();
        let total_bytes = handle.total_bytes();
        self.stats.observe(id, &state, total_bytes, now);

        let extractor = self.extractors.entry(id.clone()).or_default();
        let frames = handle.with_buffer(|buf| extractor.extract(buf));

        for frame in &frames {
            match self.decoder.decode(frame) {
                Ok(message) => self.stats.record_message(id, &message, now),
                Err(err) => {
                    trace!(station = %id, error = %err, "Frame failed to decode");
                }
            }
        }

        if let Some(snapshot) = self.stats.snapshot(id, now) {
            for event in self.alerts.evaluate(id, &snapshot, now) {
                self.sink.deliver(&event).await;
                // Err means no subscribers, which is fine.
                let _ = self.alert_tx.send(event);
            }
        }
    }

    /// Drop per-station pump state for stations no longer configured.
    async fn forget_removed(&mut self) {
        let configured: std::collections::HashSet<StationId> =
            self.supervisor.station_ids().await.into_iter().collect();
        let stale: Vec<StationId> = self
            .extractors
            .keys()
            .filter(|id| !configured.contains(id))
            .cloned()
            .collect();
        for id in stale {
            debug!(station = %id, "Dropping pump state for removed station");
            self.extractors.remove(&id);
            self.stats.remove(&id);
            self.alerts.remove(&id);
        }
    }
}
