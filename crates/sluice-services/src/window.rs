//! Window slots shared by the send and receive sides.
//!
//! A window is an ordered run of slots starting at `base`. Every slot but the
//! last of a file is exactly `segment_size` bytes, so a slot's index in the
//! window is `(offset - base) / segment_size`.

use bytes::Bytes;

/// One segment-sized position in a window.
#[derive(Debug, Clone)]
pub struct WindowSlot {
    pub offset: u64,
    /// Exact number of bytes this slot covers. The final slot of a file may
    /// be shorter than the segment size.
    pub len: usize,
    /// Always present on the send side. On the receive side `None` until the
    /// segment arrives.
    pub payload: Option<Bytes>,
    /// Acknowledged by the receiver. Receive-side slots are evicted the
    /// moment they are flushed, so they never carry this flag.
    pub settled: bool,
}

impl WindowSlot {
    pub fn loaded(offset: u64, payload: Bytes) -> Self {
        Self {
            offset,
            len: payload.len(),
            payload: Some(payload),
            settled: false,
        }
    }

    pub fn empty(offset: u64, len: usize) -> Self {
        Self {
            offset,
            len,
            payload: None,
            settled: false,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// A segment ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub offset: u64,
    pub payload: Bytes,
}

/// Length of the segment starting at `offset`, or 0 past the end of the file.
pub fn segment_len(file_size: u64, offset: u64, segment_size: usize) -> usize {
    file_size.saturating_sub(offset).min(segment_size as u64) as usize
}

/// Number of segments a file of `file_size` bytes splits into.
pub fn segment_count(file_size: u64, segment_size: usize) -> u64 {
    file_size.div_ceil(segment_size as u64)
}

/// Index of the slot holding `offset` in a window starting at `base`, if the
/// offset falls on a segment boundary at or after `base`.
pub(crate) fn slot_index(base: u64, offset: u64, segment_size: usize) -> Option<usize> {
    let delta = offset.checked_sub(base)?;
    let seg = segment_size as u64;
    if delta % seg != 0 {
        return None;
    }
    usize::try_from(delta / seg).ok()
}
