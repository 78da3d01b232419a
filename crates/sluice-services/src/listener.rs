//! Serving socket listener.
//!
//! One task owns the socket. Datagrams are routed by source address into the
//! queue of that peer's session; a verified NameRequest from a peer with no
//! live session starts a new [`SenderSession`]. Sessions remove themselves
//! from the table when they end, whatever the outcome.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use sluice_core::wire::{self, FrameKind};

use crate::file_store::FileStore;
use crate::sender::SenderSession;
use crate::session::{EventSink, SessionConfig, SessionTable};
use crate::transport::{Transport, RECV_BUF_SIZE};

/// Datagrams buffered per session before new ones are dropped.
pub const SESSION_QUEUE_DEPTH: usize = 64;

pub struct Listener<T> {
    transport: Arc<T>,
    store: FileStore,
    config: SessionConfig,
    sessions: SessionTable,
    events: Option<EventSink>,
    shutdown: broadcast::Receiver<()>,
}

impl<T: Transport> Listener<T> {
    pub fn new(
        transport: Arc<T>,
        store: FileStore,
        config: SessionConfig,
        sessions: SessionTable,
        events: Option<EventSink>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            transport,
            store,
            config,
            sessions,
            events,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let mut snapshot_interval = tokio::time::interval(Duration::from_secs(5));
        tracing::info!(
            addr = %self.transport.local_addr()?,
            root = %self.store.root().display(),
            "listener ready"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(active = self.sessions.len(), "listener shutting down");
                    return Ok(());
                }

                _ = snapshot_interval.tick() => {
                    if !self.sessions.is_empty() {
                        tracing::debug!(count = self.sessions.len(), "session table snapshot");
                    }
                }

                result = self.transport.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.route(Bytes::copy_from_slice(&buf[..len]), peer);
                }
            }
        }
    }

    fn route(&self, datagram: Bytes, peer: SocketAddr) {
        if let Some(tx) = self.sessions.get(&peer).map(|entry| entry.value().clone()) {
            match tx.try_send(datagram) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(%peer, "session queue full, dropping datagram");
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(d)) => {
                    // Session ended but has not removed itself yet.
                    self.sessions.remove_if(&peer, |_, v| v.same_channel(&tx));
                    self.accept_new(d, peer);
                    return;
                }
            }
        }
        self.accept_new(datagram, peer);
    }

    /// Start a session if `datagram` is a valid NameRequest.
    fn accept_new(&self, datagram: Bytes, peer: SocketAddr) {
        match wire::open(&datagram) {
            Ok(frame) if frame.kind == FrameKind::NameRequest => {}
            Ok(frame) => {
                tracing::trace!(%peer, kind = ?frame.kind, "no session for peer, dropping frame");
                return;
            }
            Err(e) => {
                tracing::trace!(%peer, error = %e, "no session for peer, dropping datagram");
                return;
            }
        }

        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        if tx.try_send(datagram).is_err() {
            return;
        }
        self.sessions.insert(peer, tx.clone());
        tracing::info!(%peer, active = self.sessions.len(), "session started");

        let session = SenderSession::new(
            self.transport.clone(),
            peer,
            rx,
            self.store.clone(),
            self.config.clone(),
            self.events.clone(),
        );
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            match session.run().await {
                Ok(report) => {
                    tracing::info!(%peer, file_size = report.file_size, "session complete");
                }
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "session ended without completing");
                }
            }
            sessions.remove_if(&peer, |_, v| v.same_channel(&tx));
        });
    }
}
