//! Sluice wire format — the fixed-size frame exchanged between peers.
//!
//! Every datagram is exactly `FRAME_SIZE` bytes:
//!
//! ```text
//!  0      1                          33          41        43             1024
//!  ┌──────┬──────────────────────────┬───────────┬─────────┬───────────────┐
//!  │ kind │ digest (BLAKE3, 32)      │ seq (u64) │ len u16 │ payload + pad │
//!  └──────┴──────────────────────────┴───────────┴─────────┴───────────────┘
//! ```
//!
//! All integers are big-endian. The payload length is carried explicitly;
//! trailing zero bytes are padding and are never interpreted as data.
//! The digest covers the whole frame with the digest field zeroed.
//!
//! The header is `#[repr(C, packed)]` with zerocopy derives for safe,
//! allocation-free serialization. There is no unsafe code in this module.

use std::ops::Range;

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::crypto::{digest_with_zeroed, digests_match, Digest, DIGEST_LEN};

// ── Frame Header ──────────────────────────────────────────────────────────────

/// On-wire header preceding every payload.
///
/// Wire size: 43 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Frame kind tag. See [`FrameKind`].
    pub kind: u8,

    /// BLAKE3 digest of the full frame, computed with this field zeroed.
    pub digest: Digest,

    /// Meaning depends on `kind`:
    ///   NameRequest    — length of the requested name
    ///   SizeResponse   — file size in bytes
    ///   ReadyToReceive — file size echoed back
    ///   DataSegment    — byte offset of the segment
    ///   DataAck        — byte offset being acknowledged
    pub seq: U64<BigEndian>,

    /// Number of meaningful payload bytes following the header.
    pub length: U16<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 43]);

// ── Constants ─────────────────────────────────────────────────────────────────

/// Total size of every encoded frame.
pub const FRAME_SIZE: usize = 1024;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = std::mem::size_of::<FrameHeader>();

/// Bytes available for payload in one frame. This is also the segment size
/// used for file data.
pub const PAYLOAD_CAPACITY: usize = FRAME_SIZE - HEADER_SIZE;

/// Byte range of the digest field inside an encoded frame.
pub const DIGEST_FIELD: Range<usize> = 1..1 + DIGEST_LEN;

/// Default number of segments a window may hold.
pub const DEFAULT_WINDOW: usize = 5;

/// Default number of attempts for each handshake step.
pub const HANDSHAKE_RETRIES: u32 = 5;

/// Default interval between handshake retransmissions, in milliseconds.
pub const HANDSHAKE_BACKOFF_MS: u64 = 500;

/// Default interval between data retransmission ticks, in milliseconds.
pub const TICK_INTERVAL_MS: u64 = 100;

/// Default number of consecutive ticks without progress before a transfer
/// is abandoned.
pub const TRANSFER_RETRIES: u32 = 50;

// ── Frame kind ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Receiver → sender: the name of the file it wants.
    NameRequest = 0x01,
    /// Sender → receiver: the size of the requested file.
    SizeResponse = 0x02,
    /// Receiver → sender: window built, start streaming.
    ReadyToReceive = 0x03,
    /// Sender → receiver: one segment of file data.
    DataSegment = 0x04,
    /// Receiver → sender: a segment was stored or already flushed.
    DataAck = 0x05,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::NameRequest),
            0x02 => Ok(FrameKind::SizeResponse),
            0x03 => Ok(FrameKind::ReadyToReceive),
            0x04 => Ok(FrameKind::DataSegment),
            0x05 => Ok(FrameKind::DataAck),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<FrameKind> for u8 {
    fn from(k: FrameKind) -> u8 {
        k as u8
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A decoded frame. The digest is not stored: it is produced by
/// [`Frame::encode`] and checked by [`open`] / [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub seq: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn name_request(name: &str) -> Self {
        let payload = Bytes::copy_from_slice(name.as_bytes());
        Self {
            kind: FrameKind::NameRequest,
            seq: payload.len() as u64,
            payload,
        }
    }

    pub fn size_response(file_size: u64) -> Self {
        Self {
            kind: FrameKind::SizeResponse,
            seq: file_size,
            payload: Bytes::new(),
        }
    }

    pub fn ready(file_size: u64) -> Self {
        Self {
            kind: FrameKind::ReadyToReceive,
            seq: file_size,
            payload: Bytes::new(),
        }
    }

    pub fn segment(offset: u64, payload: Bytes) -> Self {
        Self {
            kind: FrameKind::DataSegment,
            seq: offset,
            payload,
        }
    }

    pub fn ack(offset: u64) -> Self {
        Self {
            kind: FrameKind::DataAck,
            seq: offset,
            payload: Bytes::new(),
        }
    }

    /// The requested name carried by a NameRequest.
    ///
    /// `None` for other kinds, for non-UTF-8 names, and when the declared
    /// name length disagrees with the payload.
    pub fn name(&self) -> Option<&str> {
        if self.kind != FrameKind::NameRequest || self.seq != self.payload.len() as u64 {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()
    }

    /// Encode into exactly `FRAME_SIZE` bytes with the digest filled in.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let len = self.payload.len();
        if len > PAYLOAD_CAPACITY {
            return Err(WireError::PayloadTooLarge(len));
        }

        let header = FrameHeader {
            kind: self.kind.into(),
            digest: [0u8; DIGEST_LEN],
            seq: U64::new(self.seq),
            length: U16::new(len as u16),
        };

        let mut buf = BytesMut::zeroed(FRAME_SIZE);
        buf[..HEADER_SIZE].copy_from_slice(header.as_bytes());
        buf[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&self.payload);

        let d = digest(&buf);
        buf[DIGEST_FIELD].copy_from_slice(&d);
        Ok(buf.freeze())
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Parse a frame without checking its digest.
pub fn decode(buf: &[u8]) -> Result<Frame, WireError> {
    if buf.len() != FRAME_SIZE {
        return Err(WireError::WrongSize(buf.len()));
    }
    let header = FrameHeader::read_from_prefix(buf).ok_or(WireError::WrongSize(buf.len()))?;

    // Copy packed fields to locals
    let kind = FrameKind::try_from(header.kind)?;
    let seq = header.seq.get();
    let len = header.length.get() as usize;

    if len > PAYLOAD_CAPACITY {
        return Err(WireError::LengthOverrun(len));
    }

    Ok(Frame {
        kind,
        seq,
        payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..HEADER_SIZE + len]),
    })
}

/// Digest of an encoded frame, computed with the digest field zeroed.
///
/// # Panics
/// Panics if `buf` is shorter than the header.
pub fn digest(buf: &[u8]) -> Digest {
    digest_with_zeroed(buf, DIGEST_FIELD)
}

/// Check the embedded digest of an encoded frame.
pub fn verify(buf: &[u8]) -> bool {
    if buf.len() != FRAME_SIZE {
        return false;
    }
    let mut embedded = [0u8; DIGEST_LEN];
    embedded.copy_from_slice(&buf[DIGEST_FIELD]);
    digests_match(&embedded, &digest(buf))
}

/// Verify then decode. This is what the session loops call on every
/// datagram; any error means "drop it".
pub fn open(buf: &[u8]) -> Result<Frame, WireError> {
    if buf.len() != FRAME_SIZE {
        return Err(WireError::WrongSize(buf.len()));
    }
    if !verify(buf) {
        return Err(WireError::CorruptFrame);
    }
    decode(buf)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame is {0} bytes, expected {}", FRAME_SIZE)]
    WrongSize(usize),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload length {0} exceeds capacity {}", PAYLOAD_CAPACITY)]
    PayloadTooLarge(usize),

    #[error("declared payload length {0} overruns the frame")]
    LengthOverrun(usize),

    #[error("frame digest mismatch")]
    CorruptFrame,
}

impl WireError {
    /// True for frames that could not be parsed at all, as opposed to
    /// frames whose digest did not match.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, WireError::CorruptFrame)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
