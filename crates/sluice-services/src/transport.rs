//! Datagram transport.
//!
//! The session loops only need to put a datagram on the wire and take one
//! off it. No ordering or delivery guarantee is assumed; loss, duplication,
//! reordering and corruption are all handled above this layer.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sluice_core::wire::FRAME_SIZE;

pub trait Transport: Send + Sync + 'static {
    fn send_to(&self, buf: &[u8], peer: SocketAddr)
        -> impl Future<Output = io::Result<usize>> + Send;

    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Transport for UdpSocket {
    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, peer).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Size of receive buffers. Larger than a frame so oversized datagrams are
/// seen as such instead of being silently truncated to a valid length.
pub const RECV_BUF_SIZE: usize = FRAME_SIZE * 2;

/// Stops the pump task when dropped.
#[derive(Debug)]
pub struct PumpGuard(JoinHandle<()>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Forward every datagram from `peer` into a bounded queue.
///
/// Datagrams from other addresses are dropped, as are datagrams that find
/// the queue full. The pump runs until the guard is dropped or the queue
/// is closed.
pub fn spawn_pump<T: Transport>(
    transport: Arc<T>,
    peer: SocketAddr,
    depth: usize,
) -> (mpsc::Receiver<Bytes>, PumpGuard) {
    let (tx, rx) = mpsc::channel(depth);
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        loop {
            let (len, from) = match transport.recv_from(&mut buf).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    continue;
                }
            };
            if from != peer {
                tracing::trace!(%from, "datagram from unexpected peer, dropping");
                continue;
            }
            match tx.try_send(Bytes::copy_from_slice(&buf[..len])) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(%from, "inbound queue full, dropping datagram");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    });
    (rx, PumpGuard(handle))
}
