//! One stream session per station: connect, handshake, read loop.
//!
//! A session moves through an explicit state machine
//! (`Disconnected → Connecting → Connected ⇄ IdleWarning → Terminated`)
//! published through a watch channel, so observers never see an
//! inconsistent combination of flags and every fatal termination updates
//! the state before anyone is notified.
//!
//! The reader task is the only writer to its own frame buffer and state.
//! It appends raw bytes under a short-held lock and publishes the byte
//! count; frame extraction and statistics happen on the consumer side
//! against that buffer. Stopping a session cancels a blocked read through
//! the cancellation token rather than waiting out a read timeout.

pub mod handshake;

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::StationConfig;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session running.
    Disconnected,
    /// TCP connect + handshake in progress.
    Connecting,
    /// Handshake accepted, data flowing (or expected).
    Connected,
    /// Still connected but no bytes for the warning period; uptime frozen.
    IdleWarning,
    /// Session over; `failure` says why (or `None` for a user stop).
    Terminated,
}

/// Classification of a session termination. Decides retry eligibility,
/// but the decision itself lives in [`ReconnectPolicy`](crate::policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport-level failure: refused, reset, DNS, timeout mid-read.
    NetworkError,
    /// Handshake succeeded but no bytes arrived within the idle timeout.
    /// Surfaced as "connected but silent", distinct from "disconnected".
    IdleTimeout,
    /// Remote closed the stream cleanly after previously delivering data.
    MountpointClosed,
    /// Handshake rejected (bad credentials or any non-success response).
    AuthFailure,
}

impl FailureKind {
    /// Only transport faults are worth retrying; the other kinds describe
    /// conditions a reconnect cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::NetworkError)
    }
}

/// Snapshot of one session's state, published via watch channel.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Bytes received on the current connection; reset on each fresh attempt.
    pub total_bytes: u64,
    /// Time of the last successfully read chunk.
    pub last_data: Option<Instant>,
    /// Set on entering `Connected`, cleared on leaving it.
    pub connected_since: Option<Instant>,
    /// Automatic retries since data last flowed. Reset to zero only on the
    /// first post-connect byte arrival, never on a bare TCP handshake.
    pub reconnect_attempts: u32,
    /// Classification of the most recent termination.
    pub failure: Option<FailureKind>,
    /// Bumped on every fresh connection attempt so downstream consumers
    /// (rate baselines, statistics) can detect reconnects.
    pub connection_epoch: u64,
    /// When the supervisor started this session (not reset by reconnects).
    pub started_at: Instant,
}

impl SessionState {
    pub fn new(started_at: Instant) -> Self {
        SessionState {
            phase: SessionPhase::Disconnected,
            total_bytes: 0,
            last_data: None,
            connected_since: None,
            reconnect_attempts: 0,
            failure: None,
            connection_epoch: 0,
            started_at,
        }
    }

    /// Connected in the broad sense: an open socket exists.
    pub fn is_connected(&self) -> bool {
        matches!(self.phase, SessionPhase::Connected | SessionPhase::IdleWarning)
    }

    /// Uptime of the current connection, frozen while idle.
    ///
    /// In `IdleWarning` the clock holds at the last data arrival; a
    /// connection that went silent before delivering anything reports zero.
    pub fn uptime(&self, now: Instant) -> Option<Duration> {
        let since = self.connected_since?;
        let end = match self.phase {
            SessionPhase::IdleWarning => self.last_data.unwrap_or(since),
            _ => now,
        };
        Some(end.saturating_duration_since(since))
    }
}

/// Timing knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// TCP connect + handshake deadline.
    pub connect_timeout: Duration,
    /// Quiet period before entering `IdleWarning`.
    pub idle_warning: Duration,
    /// Quiet period before terminating with `IdleTimeout`.
    pub idle_timeout: Duration,
    /// Read buffer chunk size.
    pub read_chunk: usize,
}

impl Default for SessionTimings {
    fn default() -> Self {
        SessionTimings {
            connect_timeout: Duration::from_secs(10),
            idle_warning: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
            read_chunk: 4096,
        }
    }
}

/// Shared handoff between the reader task and consumers.
///
/// The reader appends bytes under a short-held lock and bumps the atomic
/// counter; it never blocks on consumer-side processing. Consumers run the
/// frame extractor against the locked buffer, leaving partial frames in
/// place.
#[derive(Debug, Default)]
pub struct StreamShared {
    buffer: Mutex<BytesMut>,
    total_bytes: AtomicU64,
}

impl StreamShared {
    /// Total bytes received on the current connection.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Run `f` against the frame buffer under its lock.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut BytesMut) -> R) -> R {
        let mut guard = self.buffer.lock().expect("frame buffer lock poisoned");
        f(&mut guard)
    }

    fn push(&self, chunk: &[u8]) {
        {
            let mut guard = self.buffer.lock().expect("frame buffer lock poisoned");
            guard.extend_from_slice(chunk);
        }
        self.total_bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.buffer.lock().expect("frame buffer lock poisoned").clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }
}

/// Read-only view of a running session handed to consumers.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(crate) shared: std::sync::Arc<StreamShared>,
    pub(crate) state_rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch receiver for state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Current byte total for the connection epoch in [`Self::state`].
    pub fn total_bytes(&self) -> u64 {
        self.shared.total_bytes()
    }

    /// Consumer-side access to the frame buffer.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut BytesMut) -> R) -> R {
        self.shared.with_buffer(f)
    }
}

/// How one connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionOutcome {
    /// Cancelled by user stop or shutdown.
    Stopped,
    /// Terminated with a failure classification. `data_flowed` reports
    /// whether any post-handshake bytes arrived, which resets the retry
    /// budget upstream.
    Failed { kind: FailureKind, data_flowed: bool },
}

/// Run a single connection attempt: connect, handshake, read until
/// termination. Publishes every state transition before returning.
pub(crate) async fn run_connection(
    cfg: &StationConfig,
    timings: &SessionTimings,
    shared: &StreamShared,
    state: &watch::Sender<SessionState>,
    cancel: &CancellationToken,
) -> ConnectionOutcome {
    // Fresh attempt: byte counters and buffer restart from zero.
    shared.reset();
    state.send_modify(|s| {
        s.phase = SessionPhase::Connecting;
        s.total_bytes = 0;
        s.last_data = None;
        s.connected_since = None;
        s.failure = None;
        s.connection_epoch += 1;
    });

    let fail = |kind: FailureKind, data_flowed: bool| {
        state.send_modify(|s| {
            s.phase = SessionPhase::Terminated;
            s.connected_since = None;
            s.failure = Some(kind);
        });
        ConnectionOutcome::Failed { kind, data_flowed }
    };

    debug!(station = %cfg.name, host = %cfg.host, port = cfg.port, mount = %cfg.mount, "Connecting");

    let connect = tokio::time::timeout(
        timings.connect_timeout,
        TcpStream::connect((cfg.host.as_str(), cfg.port)),
    );
    let mut stream = tokio::select! {
        _ = cancel.cancelled() => return stopped(state),
        result = connect => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                warn!(station = %cfg.name, error = %err, "Connect failed");
                return fail(FailureKind::NetworkError, false);
            }
            Err(_) => {
                warn!(station = %cfg.name, timeout = ?timings.connect_timeout, "Connect timed out");
                return fail(FailureKind::NetworkError, false);
            }
        },
    };

    let request = handshake::build_request(cfg);
    let handshake_result = tokio::time::timeout(timings.connect_timeout, async {
        stream.write_all(request.as_bytes()).await?;
        read_response_header(&mut stream).await
    });
    let (header, stream_rest) = tokio::select! {
        _ = cancel.cancelled() => return stopped(state),
        result = handshake_result => match result {
            Ok(Ok(parts)) => parts,
            Ok(Err(err)) => {
                warn!(station = %cfg.name, error = %err, "Handshake I/O failed");
                return fail(FailureKind::NetworkError, false);
            }
            Err(_) => {
                warn!(station = %cfg.name, "Handshake timed out");
                return fail(FailureKind::NetworkError, false);
            }
        },
    };

    if header.is_empty() {
        // Closed before any response: a transport fault, not a rejection.
        warn!(station = %cfg.name, "Connection closed before a handshake response");
        return fail(FailureKind::NetworkError, false);
    }
    if !handshake::response_accepted(&header) {
        warn!(station = %cfg.name, status = %handshake::status_line(&header), "Caster rejected request");
        return fail(FailureKind::AuthFailure, false);
    }

    info!(station = %cfg.name, mount = %cfg.mount, "Connected");
    state.send_modify(|s| {
        s.phase = SessionPhase::Connected;
        s.connected_since = Some(Instant::now());
    });

    let mut data_flowed = false;
    // The first recv may carry stream bytes beyond the response header.
    if !stream_rest.is_empty() {
        shared.push(&stream_rest);
        data_flowed = true;
        state.send_modify(|s| {
            s.total_bytes = shared.total_bytes();
            s.last_data = Some(Instant::now());
            s.reconnect_attempts = 0;
        });
    }

    let mut idle_since = tokio::time::Instant::now();
    let mut idle_warned = false;
    let mut chunk = vec![0u8; timings.read_chunk];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return stopped(state),

            _ = tokio::time::sleep_until(idle_since + timings.idle_warning), if !idle_warned => {
                debug!(station = %cfg.name, "No data for {:?}, idle warning", timings.idle_warning);
                idle_warned = true;
                state.send_modify(|s| s.phase = SessionPhase::IdleWarning);
            }

            _ = tokio::time::sleep_until(idle_since + timings.idle_timeout) => {
                warn!(station = %cfg.name, "Idle timeout: connected but silent for {:?}", timings.idle_timeout);
                return fail(FailureKind::IdleTimeout, data_flowed);
            }

            result = stream.read(&mut chunk) => match result {
                Ok(0) => {
                    let kind = if data_flowed {
                        info!(station = %cfg.name, "Mountpoint closed the stream");
                        FailureKind::MountpointClosed
                    } else {
                        warn!(station = %cfg.name, "Connection closed before any data");
                        FailureKind::NetworkError
                    };
                    return fail(kind, data_flowed);
                }
                Ok(n) => {
                    trace!(station = %cfg.name, bytes = n, "Read chunk");
                    shared.push(&chunk[..n]);
                    let first_data = !data_flowed;
                    data_flowed = true;
                    idle_since = tokio::time::Instant::now();
                    let was_idle = idle_warned;
                    idle_warned = false;
                    state.send_modify(|s| {
                        if was_idle || s.phase == SessionPhase::IdleWarning {
                            s.phase = SessionPhase::Connected;
                        }
                        s.total_bytes = shared.total_bytes();
                        s.last_data = Some(Instant::now());
                        if first_data {
                            // Data actually flowed; the retry budget starts over.
                            s.reconnect_attempts = 0;
                        }
                    });
                }
                Err(err) => {
                    warn!(station = %cfg.name, error = %err, "Read failed");
                    return fail(FailureKind::NetworkError, data_flowed);
                }
            },
        }
    }
}

fn stopped(state: &watch::Sender<SessionState>) -> ConnectionOutcome {
    state.send_modify(|s| {
        s.phase = SessionPhase::Terminated;
        s.connected_since = None;
        s.failure = None;
    });
    ConnectionOutcome::Stopped
}

/// Read until the end-of-header marker, returning the header and any stream
/// bytes that arrived in the same reads.
async fn read_response_header(stream: &mut TcpStream) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];
    loop {
        if let Some(end) = handshake::header_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        if buf.len() >= handshake::MAX_RESPONSE_HEADER {
            // Oversized or malformed header; let the caller classify it.
            return Ok((buf, Vec::new()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((buf, Vec::new()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
