//! Session supervisor: owns the station map and the retry loop.
//!
//! All start/stop/reconnect commands flow through here. Each station gets
//! at most one running session task; the task runs connection attempts and
//! applies the [`ReconnectPolicy`] between them. The station map lock is
//! held only for structural changes, never across a blocking read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{StationConfig, StationId};
use crate::error::{MonitorError, Result};
use crate::policy::{ReconnectPolicy, RetryDecision};
use crate::session::{
    ConnectionOutcome, SessionHandle, SessionState, SessionTimings, StreamShared, run_connection,
};

/// Bounded wait for a session task to exit on stop/shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    shared: Arc<StreamShared>,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct StationEntry {
    config: StationConfig,
    running: Option<Running>,
}

/// Owns every stream session, one per configured station.
pub struct Supervisor {
    stations: Mutex<HashMap<StationId, StationEntry>>,
    timings: SessionTimings,
    policy: ReconnectPolicy,
    root_cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(policy: ReconnectPolicy, timings: SessionTimings) -> Self {
        Supervisor {
            stations: Mutex::new(HashMap::new()),
            timings,
            policy,
            root_cancel: CancellationToken::new(),
        }
    }

    /// Register a station without starting it.
    pub async fn add_station(&self, config: StationConfig) {
        let id = config.id();
        let mut stations = self.stations.lock().await;
        debug!(station = %id, "Station added");
        stations.insert(id, StationEntry { config, running: None });
    }

    /// Replace a station's configuration. A running session is stopped and
    /// restarted under the new configuration.
    pub async fn update_station(&self, config: StationConfig) -> Result<()> {
        let id = config.id();
        let was_running = self.stop_internal(&id).await?;
        {
            let mut stations = self.stations.lock().await;
            let entry = stations
                .get_mut(&id)
                .ok_or_else(|| MonitorError::StationNotFound { id: id.0.clone() })?;
            entry.config = config;
        }
        if was_running {
            self.start(&id).await?;
        }
        Ok(())
    }

    /// Stop and remove a station entirely.
    pub async fn remove_station(&self, id: &StationId) -> Result<()> {
        self.stop_internal(id).await?;
        let mut stations = self.stations.lock().await;
        stations.remove(id);
        debug!(station = %id, "Station removed");
        Ok(())
    }

    /// Start a station's session. A no-op if one is already running:
    /// exactly one session exists per station id at any time.
    pub async fn start(&self, id: &StationId) -> Result<()> {
        let mut stations = self.stations.lock().await;
        let entry = stations
            .get_mut(id)
            .ok_or_else(|| MonitorError::StationNotFound { id: id.0.clone() })?;

        if let Some(running) = &entry.running {
            if !running.task.is_finished() {
                debug!(station = %id, "Start ignored, session already running");
                return Ok(());
            }
        }

        let cancel = self.root_cancel.child_token();
        let shared = Arc::new(StreamShared::default());
        let (state_tx, state_rx) = watch::channel(SessionState::new(Instant::now()));

        let task = tokio::spawn(station_task(
            entry.config.clone(),
            self.timings,
            self.policy,
            Arc::clone(&shared),
            state_tx,
            cancel.clone(),
        ));

        info!(station = %id, "Session started");
        entry.running = Some(Running { shared, state_rx, cancel, task });
        Ok(())
    }

    /// User-initiated stop. Cancels the session (including any pending
    /// retry timer) and waits, bounded, for the task to exit. Auto-retry
    /// stays disabled until the next explicit start.
    pub async fn stop(&self, id: &StationId) -> Result<()> {
        self.stop_internal(id).await?;
        Ok(())
    }

    async fn stop_internal(&self, id: &StationId) -> Result<bool> {
        let running = {
            let mut stations = self.stations.lock().await;
            let entry = stations
                .get_mut(id)
                .ok_or_else(|| MonitorError::StationNotFound { id: id.0.clone() })?;
            entry.running.take()
        };

        let Some(running) = running else { return Ok(false) };
        running.cancel.cancel();
        if tokio::time::timeout(JOIN_TIMEOUT, running.task).await.is_err() {
            warn!(station = %id, "Session task did not exit within {:?}", JOIN_TIMEOUT);
        } else {
            info!(station = %id, "Session stopped");
        }
        Ok(true)
    }

    /// Re-start every station that is not currently connected.
    pub async fn reconnect_all(&self) -> Result<()> {
        let candidates: Vec<StationId> = {
            let stations = self.stations.lock().await;
            stations
                .iter()
                .filter(|(_, entry)| match &entry.running {
                    Some(running) => {
                        running.task.is_finished() || !running.state_rx.borrow().is_connected()
                    }
                    None => true,
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in candidates {
            // A finished task must be torn down before a fresh start.
            self.stop_internal(&id).await?;
            self.start(&id).await?;
        }
        Ok(())
    }

    /// Stop every session and wait (bounded) for all reader tasks to exit,
    /// so no orphaned sessions survive process teardown.
    pub async fn shutdown(&self) -> Result<()> {
        self.root_cancel.cancel();

        let tasks: Vec<(StationId, JoinHandle<()>)> = {
            let mut stations = self.stations.lock().await;
            stations
                .iter_mut()
                .filter_map(|(id, entry)| entry.running.take().map(|r| (id.clone(), r.task)))
                .collect()
        };

        let mut pending = 0usize;
        for (id, task) in tasks {
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!(station = %id, "Session still running at shutdown deadline");
                pending += 1;
            }
        }

        if pending > 0 {
            return Err(MonitorError::ShutdownTimeout { pending });
        }
        info!("Supervisor shut down");
        Ok(())
    }

    /// Handle for one station's running session, if any.
    pub async fn session(&self, id: &StationId) -> Option<SessionHandle> {
        let stations = self.stations.lock().await;
        stations.get(id).and_then(|entry| {
            entry.running.as_ref().map(|r| SessionHandle {
                shared: Arc::clone(&r.shared),
                state_rx: r.state_rx.clone(),
            })
        })
    }

    /// Handles for every station with a running session.
    pub async fn sessions(&self) -> Vec<(StationId, SessionHandle)> {
        let stations = self.stations.lock().await;
        stations
            .iter()
            .filter_map(|(id, entry)| {
                entry.running.as_ref().map(|r| {
                    (
                        id.clone(),
                        SessionHandle {
                            shared: Arc::clone(&r.shared),
                            state_rx: r.state_rx.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    /// All configured station ids.
    pub async fn station_ids(&self) -> Vec<StationId> {
        self.stations.lock().await.keys().cloned().collect()
    }

    /// Configuration for one station.
    pub async fn station_config(&self, id: &StationId) -> Option<StationConfig> {
        self.stations.lock().await.get(id).map(|e| e.config.clone())
    }
}

/// Per-station loop: run connection attempts and apply the reconnect
/// policy between failures until cancelled or the policy gives up.
async fn station_task(
    config: StationConfig,
    timings: SessionTimings,
    policy: ReconnectPolicy,
    shared: Arc<StreamShared>,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
) {
    let id = config.id();
    let mut attempts: u32 = 0;

    loop {
        let outcome = run_connection(&config, &timings, &shared, &state_tx, &cancel).await;

        match outcome {
            ConnectionOutcome::Stopped => {
                debug!(station = %id, "Session cancelled");
                break;
            }
            ConnectionOutcome::Failed { kind, data_flowed } => {
                if data_flowed {
                    // Data actually flowed on that connection, so the retry
                    // budget starts over. A bare handshake does not count.
                    attempts = 0;
                }
                match policy.decide(kind, attempts) {
                    RetryDecision::GiveUp => {
                        info!(station = %id, failure = ?kind, attempts, "Giving up");
                        break;
                    }
                    RetryDecision::RetryAfter(delay) => {
                        attempts += 1;
                        state_tx.send_modify(|s| s.reconnect_attempts = attempts);
                        info!(
                            station = %id,
                            attempt = attempts,
                            max = policy.max_retries,
                            "Reconnecting in {:?}",
                            delay
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!(station = %id, "Retry cancelled");
                                break;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
}
