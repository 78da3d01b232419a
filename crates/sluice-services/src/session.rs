//! Session plumbing shared by the sender and receiver drivers.
//!
//! A session is one task. It owns its window outright and is woken by two
//! things only: a datagram arriving on its inbound queue, or its timer.
//! Everything here is the glue around that loop: settings, the error and
//! event types, and [`Link`], which pairs the transport with the session's
//! phase and counters.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;

use sluice_core::config::TransferConfig;
use sluice_core::wire::{
    self, Frame, DEFAULT_WINDOW, HANDSHAKE_BACKOFF_MS, HANDSHAKE_RETRIES, PAYLOAD_CAPACITY,
    TICK_INTERVAL_MS, TRANSFER_RETRIES,
};
use sluice_core::WireError;

use crate::file_store::StoreError;
use crate::stats::TransferStats;
use crate::transport::Transport;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Negotiating,
    Transferring,
    Complete,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Negotiating => "negotiating",
            Phase::Transferring => "transferring",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Timing and window parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub window_size: usize,
    /// Bytes of file data per DataSegment. Both peers must agree on it, and
    /// it may not exceed the frame's payload capacity.
    pub segment_size: usize,
    pub tick_interval: Duration,
    pub handshake_retries: u32,
    pub handshake_backoff: Duration,
    pub transfer_retries: u32,
    pub linger: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW,
            segment_size: PAYLOAD_CAPACITY,
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            handshake_retries: HANDSHAKE_RETRIES,
            handshake_backoff: Duration::from_millis(HANDSHAKE_BACKOFF_MS),
            transfer_retries: TRANSFER_RETRIES,
            linger: Duration::from_millis(3 * HANDSHAKE_BACKOFF_MS),
        }
    }
}

impl From<&TransferConfig> for SessionConfig {
    fn from(c: &TransferConfig) -> Self {
        Self {
            window_size: c.window_size.max(1),
            segment_size: PAYLOAD_CAPACITY,
            tick_interval: Duration::from_millis(c.tick_interval_ms.max(1)),
            handshake_retries: c.handshake_retries.max(1),
            handshake_backoff: Duration::from_millis(c.handshake_backoff_ms.max(1)),
            transfer_retries: c.transfer_retries.max(1),
            linger: Duration::from_millis(c.linger_ms),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Terminal session failures. Per-frame problems never end up here: they
/// are dropped and recovered by retransmission.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake timed out after {attempts} attempts")]
    HandshakeTimeout { attempts: u32 },

    #[error("transfer stalled for {intervals} intervals without progress")]
    TransferTimeout { intervals: u32 },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("frame could not be built: {0}")]
    Wire(#[from] WireError),

    #[error("inbound queue closed")]
    Closed,
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SessionError::HandshakeTimeout { .. } | SessionError::TransferTimeout { .. }
        )
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => SessionError::FileNotFound(name),
            StoreError::Io(e) => SessionError::Io(e),
            other => SessionError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
        }
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Observable milestones of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged {
        peer: SocketAddr,
        role: Role,
        from: Phase,
        to: Phase,
    },
    /// The window base moved forward.
    Slid { peer: SocketAddr, role: Role, base: u64 },
    RetryExhausted { peer: SocketAddr, role: Role, phase: Phase },
    Completed { peer: SocketAddr, role: Role, bytes: u64 },
    Failed { peer: SocketAddr, role: Role, reason: String },
}

pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub peer: SocketAddr,
    pub file_size: u64,
    pub stats: TransferStats,
}

/// Live server-side sessions, keyed by peer address. The value is the
/// session's inbound datagram queue.
pub type SessionTable = Arc<DashMap<SocketAddr, mpsc::Sender<Bytes>>>;

pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// What came off the inbound queue before a deadline.
pub(crate) enum Inbound {
    Datagram(Bytes),
    TimedOut,
    Closed,
}

pub(crate) async fn recv_until(inbound: &mut mpsc::Receiver<Bytes>, deadline: Instant) -> Inbound {
    match tokio::time::timeout_at(deadline, inbound.recv()).await {
        Ok(Some(buf)) => Inbound::Datagram(buf),
        Ok(None) => Inbound::Closed,
        Err(_) => Inbound::TimedOut,
    }
}

/// One peer's view of the transport, with the session's phase and counters.
pub(crate) struct Link<T> {
    transport: Arc<T>,
    peer: SocketAddr,
    role: Role,
    phase: Phase,
    events: Option<EventSink>,
    pub(crate) stats: TransferStats,
}

impl<T: Transport> Link<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        peer: SocketAddr,
        role: Role,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            transport,
            peer,
            role,
            phase: Phase::Idle,
            events,
            stats: TransferStats::default(),
        }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Encode and send one frame. A failed send is treated as a lost
    /// datagram: retransmission covers it.
    pub(crate) async fn send(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let buf = frame.encode()?;
        match self.transport.send_to(&buf, self.peer).await {
            Ok(_) => {
                self.stats.frames_sent += 1;
                tracing::trace!(peer = %self.peer, kind = ?frame.kind, seq = frame.seq, "frame sent");
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, kind = ?frame.kind, error = %e, "send failed");
            }
        }
        Ok(())
    }

    /// Verify and decode a datagram, counting and logging anything dropped.
    pub(crate) fn open(&mut self, buf: &[u8]) -> Option<Frame> {
        self.stats.frames_received += 1;
        match wire::open(buf) {
            Ok(frame) => {
                tracing::trace!(peer = %self.peer, kind = ?frame.kind, seq = frame.seq, "frame received");
                Some(frame)
            }
            Err(e) => {
                self.stats.record_drop(&e);
                if e == WireError::CorruptFrame {
                    let embedded = hex::encode(&buf[wire::DIGEST_FIELD]);
                    tracing::debug!(
                        peer = %self.peer,
                        digest = &embedded[..16],
                        "dropping corrupt frame"
                    );
                } else {
                    tracing::debug!(peer = %self.peer, error = %e, "dropping malformed datagram");
                }
                None
            }
        }
    }

    pub(crate) fn enter(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        self.phase = to;
        tracing::info!(peer = %self.peer, role = %self.role, %from, %to, "session phase changed");
        self.emit(SessionEvent::PhaseChanged {
            peer: self.peer,
            role: self.role,
            from,
            to,
        });
    }

    pub(crate) fn slid(&self, base: u64) {
        tracing::debug!(peer = %self.peer, role = %self.role, base, "window slid");
        self.emit(SessionEvent::Slid {
            peer: self.peer,
            role: self.role,
            base,
        });
    }

    /// Finish successfully.
    pub(crate) fn complete(&mut self, file_size: u64, segment_size: usize) -> TransferReport {
        self.enter(Phase::Complete);
        self.stats.log_summary(self.peer, file_size, segment_size);
        self.emit(SessionEvent::Completed {
            peer: self.peer,
            role: self.role,
            bytes: file_size,
        });
        TransferReport {
            peer: self.peer,
            file_size,
            stats: self.stats,
        }
    }

    /// Finish with `err`, which is handed back for the caller to return.
    pub(crate) fn fail(&mut self, err: SessionError) -> SessionError {
        if err.is_timeout() {
            tracing::warn!(peer = %self.peer, role = %self.role, phase = %self.phase, "retry budget exhausted");
            self.emit(SessionEvent::RetryExhausted {
                peer: self.peer,
                role: self.role,
                phase: self.phase,
            });
        }
        tracing::warn!(peer = %self.peer, role = %self.role, error = %err, "session failed");
        self.enter(Phase::Failed);
        self.emit(SessionEvent::Failed {
            peer: self.peer,
            role: self.role,
            reason: err.to_string(),
        });
        err
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
