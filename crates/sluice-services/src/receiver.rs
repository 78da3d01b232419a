//! Receiver role: request a file by name and write it to a sink.
//!
//! The receiver drives the handshake. Once the window is built it never
//! retransmits data; it only acknowledges, and nudges the sender with
//! ReadyToReceive when the line goes quiet or the sender is still talking
//! handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use sluice_core::wire::{Frame, FrameKind};

use crate::file_store::SegmentSink;
use crate::recv_window::{Acceptance, RecvWindow};
use crate::session::{
    recv_until, EventSink, Inbound, Link, Phase, Role, SessionConfig, SessionError,
    TransferReport,
};
use crate::transport::{spawn_pump, Transport};

/// Depth of the queue between the socket and the session loop.
const INBOUND_DEPTH: usize = 256;

pub struct ReceiverSession<T> {
    link: Link<T>,
    inbound: mpsc::Receiver<Bytes>,
    config: SessionConfig,
}

/// Fetch `name` from `peer` into `sink`.
///
/// The transport must not be shared with another session: every datagram
/// from `peer` arriving on it is taken as part of this transfer. On success
/// the sink has been finished and is handed back.
pub async fn fetch<T: Transport, K: SegmentSink>(
    transport: Arc<T>,
    peer: SocketAddr,
    name: &str,
    sink: K,
    config: SessionConfig,
    events: Option<EventSink>,
) -> Result<(TransferReport, K), SessionError> {
    let (inbound, _pump) = spawn_pump(transport.clone(), peer, INBOUND_DEPTH);
    ReceiverSession::new(transport, peer, inbound, config, events)
        .run(name, sink)
        .await
}

impl<T: Transport> ReceiverSession<T> {
    pub fn new(
        transport: Arc<T>,
        peer: SocketAddr,
        inbound: mpsc::Receiver<Bytes>,
        config: SessionConfig,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            link: Link::new(transport, peer, Role::Receiver, events),
            inbound,
            config,
        }
    }

    pub async fn run<K: SegmentSink>(
        mut self,
        name: &str,
        sink: K,
    ) -> Result<(TransferReport, K), SessionError> {
        match self.drive(name, sink).await {
            Ok(done) => Ok(done),
            Err(e) => Err(self.link.fail(e)),
        }
    }

    async fn drive<K: SegmentSink>(
        &mut self,
        name: &str,
        sink: K,
    ) -> Result<(TransferReport, K), SessionError> {
        self.link.enter(Phase::Negotiating);
        let file_size = self.request(name).await?;
        tracing::info!(peer = %self.link.peer(), name, file_size, "file size received");

        self.link.send(&Frame::ready(file_size)).await?;
        self.link.enter(Phase::Transferring);

        let mut window = RecvWindow::new(
            sink,
            file_size,
            self.config.segment_size,
            self.config.window_size,
        );
        self.transfer(&mut window).await?;
        window.finish().await?;

        let report = self.link.complete(file_size, self.config.segment_size);
        self.linger(file_size).await;
        Ok((report, window.into_sink()))
    }

    /// Send NameRequest until a SizeResponse comes back.
    async fn request(&mut self, name: &str) -> Result<u64, SessionError> {
        let request = Frame::name_request(name);
        let budget = self.config.handshake_retries;

        for attempt in 1..=budget {
            if attempt > 1 {
                tracing::debug!(peer = %self.link.peer(), attempt, "resending NameRequest");
            }
            self.link.send(&request).await?;
            let deadline = Instant::now() + self.config.handshake_backoff;

            loop {
                let buf = match recv_until(&mut self.inbound, deadline).await {
                    Inbound::Datagram(buf) => buf,
                    Inbound::TimedOut => break,
                    Inbound::Closed => return Err(SessionError::Closed),
                };
                let Some(frame) = self.link.open(&buf) else {
                    continue;
                };
                if frame.kind == FrameKind::SizeResponse {
                    return Ok(frame.seq);
                }
                tracing::trace!(peer = %self.link.peer(), kind = ?frame.kind, "waiting for SizeResponse, ignoring frame");
            }
        }
        Err(SessionError::HandshakeTimeout { attempts: budget })
    }

    async fn transfer<K: SegmentSink>(
        &mut self,
        window: &mut RecvWindow<K>,
    ) -> Result<(), SessionError> {
        let file_size = window.file_size();
        let mut silent: u32 = 0;
        let mut deadline = Instant::now() + self.config.handshake_backoff;

        while !window.is_complete() {
            let buf = match recv_until(&mut self.inbound, deadline).await {
                Inbound::Datagram(buf) => buf,
                Inbound::TimedOut => {
                    silent += 1;
                    if silent > self.config.transfer_retries {
                        return Err(SessionError::TransferTimeout {
                            intervals: self.config.transfer_retries,
                        });
                    }
                    tracing::debug!(peer = %self.link.peer(), base = window.base(), silent, "no data, nudging sender");
                    self.link.send(&Frame::ready(file_size)).await?;
                    deadline = Instant::now() + self.config.handshake_backoff;
                    continue;
                }
                Inbound::Closed => return Err(SessionError::Closed),
            };
            let Some(frame) = self.link.open(&buf) else {
                continue;
            };
            silent = 0;
            deadline = Instant::now() + self.config.handshake_backoff;

            if frame.kind != FrameKind::DataSegment {
                // Still in the handshake as far as the sender knows.
                self.link.send(&Frame::ready(file_size)).await?;
                continue;
            }

            let offset = frame.seq;
            let outcome = window.accept(offset, frame.payload);
            self.link.stats.record_acceptance(outcome);
            if outcome == Acceptance::Rejected {
                tracing::trace!(peer = %self.link.peer(), offset, base = window.base(), "segment rejected");
                continue;
            }

            if window.slide().await? > 0 {
                self.link.slid(window.base());
            }
            self.link.send(&Frame::ack(offset)).await?;
            self.link.stats.acks_sent += 1;
        }
        Ok(())
    }

    /// Keep acknowledging for a while after completion, in case the sender
    /// lost the final acks and is still retransmitting.
    async fn linger(&mut self, file_size: u64) {
        if self.config.linger.is_zero() {
            return;
        }
        let deadline = Instant::now() + self.config.linger;
        loop {
            let buf = match recv_until(&mut self.inbound, deadline).await {
                Inbound::Datagram(buf) => buf,
                Inbound::TimedOut | Inbound::Closed => return,
            };
            let Some(frame) = self.link.open(&buf) else {
                continue;
            };
            let reply = match frame.kind {
                FrameKind::DataSegment if frame.seq < file_size => {
                    self.link.stats.duplicates += 1;
                    self.link.stats.acks_sent += 1;
                    Frame::ack(frame.seq)
                }
                FrameKind::DataSegment => continue,
                _ => Frame::ready(file_size),
            };
            if let Err(e) = self.link.send(&reply).await {
                tracing::debug!(peer = %self.link.peer(), error = %e, "linger reply failed");
                return;
            }
        }
    }
}
