//! Producer-side sliding window.
//!
//! [`SendWindow`] holds up to `capacity` segments read ahead from the source.
//! Every admitted segment stays in the window, and is retransmitted on every
//! tick, until the receiver acknowledges it. Acknowledgements are selective
//! and may arrive in any order or more than once; the window only slides
//! over a settled prefix.
//!
//! ```text
//!  base                               high_water
//!   │                                     │
//!  ─┼──────┬──────┬──────┬──────┬──────┬──┼───▶ file offset
//!   │ ack? │ ack? │ ack? │ ack? │ ack? │  │
//!   └──────┴──────┴──────┴──────┴──────┘
//! ```
//!
//! The window is owned by a single session task; nothing here locks.

use std::collections::VecDeque;
use std::io;

use crate::file_store::SegmentSource;
use crate::window::{segment_len, slot_index, Segment, WindowSlot};

/// What one call to [`SendWindow::slide`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlideResult {
    /// Settled slots evicted from the front.
    pub evicted: usize,
    /// New slots admitted at the back.
    pub admitted: usize,
}

#[derive(Debug)]
pub struct SendWindow<S> {
    source: S,
    file_size: u64,
    segment_size: usize,
    capacity: usize,
    base: u64,
    slots: VecDeque<WindowSlot>,
}

impl<S: SegmentSource> SendWindow<S> {
    /// Create an empty window. Call [`fill_ahead`](Self::fill_ahead) to load it.
    ///
    /// # Panics
    /// Panics if `capacity` or `segment_size` is zero.
    pub fn new(source: S, file_size: u64, segment_size: usize, capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        assert!(segment_size >= 1, "segment size must be at least 1");
        Self {
            source,
            file_size,
            segment_size,
            capacity,
            base: 0,
            slots: VecDeque::with_capacity(capacity),
        }
    }

    /// Create a window and load its first segments.
    pub async fn open(
        source: S,
        file_size: u64,
        segment_size: usize,
        capacity: usize,
    ) -> io::Result<Self> {
        let mut window = Self::new(source, file_size, segment_size, capacity);
        window.fill_ahead().await?;
        Ok(window)
    }

    /// Read and admit segments until the window is full or the file is
    /// exhausted. Returns how many were admitted.
    pub async fn fill_ahead(&mut self) -> io::Result<usize> {
        let mut admitted = 0;
        while self.slots.len() < self.capacity {
            let next = self.high_water();
            let len = segment_len(self.file_size, next, self.segment_size);
            if len == 0 {
                break;
            }
            let payload = self.source.read_next(len).await?;
            self.slots.push_back(WindowSlot::loaded(next, payload));
            admitted += 1;
        }
        Ok(admitted)
    }

    /// Every admitted, unacknowledged segment in ascending offset order.
    /// This is the retransmission set.
    pub fn pending_segments(&self) -> Vec<Segment> {
        Self::unsettled(self.slots.iter())
    }

    /// The `n` most recently admitted segments that are still unacknowledged.
    pub fn newest_segments(&self, n: usize) -> Vec<Segment> {
        let skip = self.slots.len().saturating_sub(n);
        Self::unsettled(self.slots.iter().skip(skip))
    }

    fn unsettled<'a>(slots: impl Iterator<Item = &'a WindowSlot>) -> Vec<Segment> {
        slots
            .filter(|s| !s.settled)
            .filter_map(|s| {
                s.payload.as_ref().map(|p| Segment {
                    offset: s.offset,
                    payload: p.clone(),
                })
            })
            .collect()
    }

    /// Mark the segment at `offset` acknowledged.
    ///
    /// Unknown, stale and repeated offsets are ignored. Returns `true` only
    /// if a slot changed state.
    pub fn acknowledge(&mut self, offset: u64) -> bool {
        let Some(idx) = slot_index(self.base, offset, self.segment_size) else {
            return false;
        };
        match self.slots.get_mut(idx) {
            Some(slot) if slot.offset == offset && !slot.settled => {
                slot.settled = true;
                true
            }
            _ => false,
        }
    }

    /// Evict the settled prefix, refilling behind it.
    pub async fn slide(&mut self) -> io::Result<SlideResult> {
        let mut result = SlideResult::default();
        while let Some(front) = self.slots.front() {
            if !front.settled {
                break;
            }
            let len = front.len as u64;
            self.slots.pop_front();
            self.base += len;
            result.evicted += 1;
            result.admitted += self.fill_ahead().await?;
        }
        Ok(result)
    }

    pub fn is_complete(&self) -> bool {
        self.base >= self.file_size
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the last byte of the newest admitted segment.
    pub fn high_water(&self) -> u64 {
        self.slots.back().map_or(self.base, WindowSlot::end)
    }

    /// Number of admitted slots, settled or not.
    pub fn admitted(&self) -> usize {
        self.slots.len()
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }
}
