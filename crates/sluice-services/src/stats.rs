//! Per-session transfer counters.

use std::net::SocketAddr;

use sluice_core::WireError;

use crate::recv_window::Acceptance;
use crate::window::segment_count;

/// What happened on the wire during one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// DataSegment frames put on the wire, first sends and resends alike.
    pub segments_sent: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    /// Segments that had already been flushed.
    pub duplicates: u64,
    /// Segments dropped as out of window, already buffered, or mis-sized.
    pub rejected: u64,
    /// Frames dropped for a digest mismatch.
    pub corrupt: u64,
    /// Frames dropped because they could not be parsed.
    pub malformed: u64,
}

impl TransferStats {
    /// Count a datagram that failed to open.
    pub fn record_drop(&mut self, err: &WireError) {
        if err.is_malformed() {
            self.malformed += 1;
        } else {
            self.corrupt += 1;
        }
    }

    pub fn record_acceptance(&mut self, outcome: Acceptance) {
        match outcome {
            Acceptance::Accepted => {}
            Acceptance::Duplicate => self.duplicates += 1,
            Acceptance::Rejected => self.rejected += 1,
        }
    }

    /// Segments sent beyond one per segment of the file.
    pub fn retransmissions(&self, file_size: u64, segment_size: usize) -> u64 {
        self.segments_sent
            .saturating_sub(segment_count(file_size, segment_size))
    }

    pub fn log_summary(&self, peer: SocketAddr, file_size: u64, segment_size: usize) {
        tracing::info!(
            %peer,
            file_size,
            frames_sent = self.frames_sent,
            frames_received = self.frames_received,
            segments_sent = self.segments_sent,
            retransmitted = self.retransmissions(file_size, segment_size),
            acks_sent = self.acks_sent,
            acks_received = self.acks_received,
            duplicates = self.duplicates,
            rejected = self.rejected,
            corrupt = self.corrupt,
            malformed = self.malformed,
            "transfer stats"
        );
    }
}
