//! Consumer-side sliding window.
//!
//! Segments may arrive in any order and any number of times. [`RecvWindow`]
//! buffers the ones that land inside the window and flushes the contiguous
//! filled prefix to the sink, so the sink sees every byte exactly once and
//! in ascending offset order.

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;

use crate::file_store::SegmentSink;
use crate::window::{segment_len, slot_index, WindowSlot};

/// How [`RecvWindow::accept`] classified a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Stored in its slot.
    Accepted,
    /// Already flushed. Nothing changes, but the sender still needs an ack.
    Duplicate,
    /// Outside the window, already buffered, or the wrong length. Dropped.
    Rejected,
}

#[derive(Debug)]
pub struct RecvWindow<K> {
    sink: K,
    file_size: u64,
    segment_size: usize,
    capacity: usize,
    base: u64,
    slots: VecDeque<WindowSlot>,
}

impl<K: SegmentSink> RecvWindow<K> {
    /// Create a window over a file of `file_size` bytes, admitting its first
    /// `capacity` slots.
    ///
    /// # Panics
    /// Panics if `capacity` or `segment_size` is zero.
    pub fn new(sink: K, file_size: u64, segment_size: usize, capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        assert!(segment_size >= 1, "segment size must be at least 1");
        let mut window = Self {
            sink,
            file_size,
            segment_size,
            capacity,
            base: 0,
            slots: VecDeque::with_capacity(capacity),
        };
        window.admit_empty();
        window
    }

    fn admit_empty(&mut self) {
        while self.slots.len() < self.capacity {
            let next = self.high_water();
            let len = segment_len(self.file_size, next, self.segment_size);
            if len == 0 {
                break;
            }
            self.slots.push_back(WindowSlot::empty(next, len));
        }
    }

    /// Offer a segment to the window.
    pub fn accept(&mut self, offset: u64, payload: Bytes) -> Acceptance {
        if offset < self.base {
            return Acceptance::Duplicate;
        }
        let Some(idx) = slot_index(self.base, offset, self.segment_size) else {
            return Acceptance::Rejected;
        };
        match self.slots.get_mut(idx) {
            Some(slot)
                if slot.offset == offset && slot.payload.is_none() && slot.len == payload.len() =>
            {
                slot.payload = Some(payload);
                Acceptance::Accepted
            }
            _ => Acceptance::Rejected,
        }
    }

    /// Flush the filled prefix to the sink and admit replacement slots.
    /// Returns the number of slots flushed.
    pub async fn slide(&mut self) -> io::Result<usize> {
        let mut flushed = 0;
        while let Some(front) = self.slots.front_mut() {
            let Some(payload) = front.payload.take() else {
                break;
            };
            if let Err(e) = self.sink.write_next(&payload).await {
                // Put it back so the window still describes what was written.
                if let Some(front) = self.slots.front_mut() {
                    front.payload = Some(payload);
                }
                return Err(e);
            }
            if let Some(slot) = self.slots.pop_front() {
                self.base += slot.len as u64;
            }
            flushed += 1;
            self.admit_empty();
        }
        Ok(flushed)
    }

    /// Flush and close the sink. Call once, after [`is_complete`](Self::is_complete).
    pub async fn finish(&mut self) -> io::Result<()> {
        self.sink.finish().await
    }

    pub fn is_complete(&self) -> bool {
        self.base >= self.file_size
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last byte covered by the newest admitted slot.
    pub fn high_water(&self) -> u64 {
        self.slots.back().map_or(self.base, WindowSlot::end)
    }

    /// Number of admitted slots, filled or not.
    pub fn admitted(&self) -> usize {
        self.slots.len()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }
}
