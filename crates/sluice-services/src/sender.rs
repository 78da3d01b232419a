//! Sender role: answer one NameRequest and stream the file.
//!
//! ```text
//!  Idle ──NameRequest──▶ Negotiating ──Ready──▶ Transferring ──base≥size──▶ Complete
//!    │                      │                        │
//!    └──────────────────────┴────────────────────────┴──▶ Failed
//! ```
//!
//! While transferring, every tick resends the whole unacknowledged window.
//! Segments admitted by a slide are also sent straight away, so a clean link
//! never waits a full tick for the next segment.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use sluice_core::wire::{Frame, FrameKind};

use crate::file_store::{FileStore, SegmentSource};
use crate::send_window::SendWindow;
use crate::session::{
    recv_until, EventSink, Inbound, Link, Phase, Role, SessionConfig, SessionError,
    TransferReport,
};
use crate::transport::Transport;
use crate::window::Segment;

pub struct SenderSession<T> {
    link: Link<T>,
    inbound: mpsc::Receiver<Bytes>,
    store: FileStore,
    config: SessionConfig,
}

impl<T: Transport> SenderSession<T> {
    /// `inbound` carries every datagram from `peer`, starting with the
    /// NameRequest that opened the session.
    pub fn new(
        transport: Arc<T>,
        peer: SocketAddr,
        inbound: mpsc::Receiver<Bytes>,
        store: FileStore,
        config: SessionConfig,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            link: Link::new(transport, peer, Role::Sender, events),
            inbound,
            store,
            config,
        }
    }

    pub async fn run(mut self) -> Result<TransferReport, SessionError> {
        match self.drive().await {
            Ok(report) => Ok(report),
            Err(e) => Err(self.link.fail(e)),
        }
    }

    async fn drive(&mut self) -> Result<TransferReport, SessionError> {
        let name = self.await_name().await?;
        let (file_size, source) = self.store.open_for_read(&name).await?;
        tracing::info!(peer = %self.link.peer(), name, file_size, "serving file");

        self.link.enter(Phase::Negotiating);
        self.negotiate(file_size).await?;

        self.link.enter(Phase::Transferring);
        let window = SendWindow::open(
            source,
            file_size,
            self.config.segment_size,
            self.config.window_size,
        )
        .await?;
        self.transfer(window).await?;

        Ok(self.link.complete(file_size, self.config.segment_size))
    }

    /// Wait for the request that names the file.
    async fn await_name(&mut self) -> Result<String, SessionError> {
        let deadline = Instant::now() + self.config.handshake_backoff * self.config.handshake_retries;
        loop {
            let buf = match recv_until(&mut self.inbound, deadline).await {
                Inbound::Datagram(buf) => buf,
                Inbound::TimedOut => {
                    return Err(SessionError::HandshakeTimeout {
                        attempts: self.config.handshake_retries,
                    })
                }
                Inbound::Closed => return Err(SessionError::Closed),
            };
            let Some(frame) = self.link.open(&buf) else {
                continue;
            };
            match frame.name() {
                Some(name) => return Ok(name.to_string()),
                None => tracing::trace!(peer = %self.link.peer(), kind = ?frame.kind, "waiting for NameRequest, ignoring frame"),
            }
        }
    }

    /// Send SizeResponse until the receiver says it is ready.
    async fn negotiate(&mut self, file_size: u64) -> Result<(), SessionError> {
        let response = Frame::size_response(file_size);
        let budget = self.config.handshake_retries;

        self.link.send(&response).await?;
        let mut sends = 1;
        let mut deadline = Instant::now() + self.config.handshake_backoff;

        loop {
            let buf = match recv_until(&mut self.inbound, deadline).await {
                Inbound::Datagram(buf) => buf,
                Inbound::TimedOut => {
                    if sends >= budget {
                        return Err(SessionError::HandshakeTimeout { attempts: sends });
                    }
                    tracing::debug!(peer = %self.link.peer(), attempt = sends + 1, "resending SizeResponse");
                    self.link.send(&response).await?;
                    sends += 1;
                    deadline = Instant::now() + self.config.handshake_backoff;
                    continue;
                }
                Inbound::Closed => return Err(SessionError::Closed),
            };
            let Some(frame) = self.link.open(&buf) else {
                continue;
            };
            if frame.kind == FrameKind::ReadyToReceive && frame.seq == file_size {
                return Ok(());
            }
            // The receiver has not seen our size yet.
            if sends < budget {
                self.link.send(&response).await?;
                sends += 1;
                deadline = Instant::now() + self.config.handshake_backoff;
            }
        }
    }

    async fn transfer<S: SegmentSource>(
        &mut self,
        mut window: SendWindow<S>,
    ) -> Result<(), SessionError> {
        // The initial window goes out now; only later ticks count as retries.
        self.send_segments(window.pending_segments()).await?;
        let mut tick = tokio::time::interval_at(
            Instant::now() + self.config.tick_interval,
            self.config.tick_interval,
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle_ticks: u32 = 0;

        while !window.is_complete() {
            tokio::select! {
                _ = tick.tick() => {
                    idle_ticks += 1;
                    if idle_ticks > self.config.transfer_retries {
                        return Err(SessionError::TransferTimeout {
                            intervals: self.config.transfer_retries,
                        });
                    }
                    let pending = window.pending_segments();
                    tracing::debug!(
                        peer = %self.link.peer(),
                        base = window.base(),
                        pending = pending.len(),
                        idle_ticks,
                        "retransmitting window"
                    );
                    self.send_segments(pending).await?;
                }

                buf = self.inbound.recv() => {
                    let Some(buf) = buf else {
                        return Err(SessionError::Closed);
                    };
                    let Some(frame) = self.link.open(&buf) else {
                        continue;
                    };
                    if frame.kind != FrameKind::DataAck {
                        tracing::trace!(peer = %self.link.peer(), kind = ?frame.kind, "ignoring non-ack frame");
                        continue;
                    }

                    self.link.stats.acks_received += 1;
                    if window.acknowledge(frame.seq) {
                        idle_ticks = 0;
                    }
                    let slid = window.slide().await?;
                    if slid.evicted > 0 {
                        self.link.slid(window.base());
                    }
                    if slid.admitted > 0 {
                        let fresh = window.newest_segments(slid.admitted);
                        self.send_segments(fresh).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn send_segments(&mut self, segments: Vec<Segment>) -> Result<(), SessionError> {
        for seg in segments {
            self.link.send(&Frame::segment(seg.offset, seg.payload)).await?;
            self.link.stats.segments_sent += 1;
        }
        Ok(())
    }
}
