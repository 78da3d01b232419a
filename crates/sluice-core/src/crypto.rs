//! Integrity primitives for Sluice.
//!
//! Every frame carries a BLAKE3 digest computed over the whole encoded frame
//! with the digest field itself zeroed. BLAKE3 produces exactly 32 bytes, which
//! is exactly the width of the digest field: no padding, no truncation.
//!
//! There is no unsafe code in this module.

use std::ops::Range;

/// Width of a digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// A frame digest.
pub type Digest = [u8; DIGEST_LEN];

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Incremental BLAKE3 hasher for inputs that arrive in pieces.
///
/// # Example
/// ```
/// use sluice_core::crypto::Hasher;
/// let mut pieces = Hasher::new();
/// pieces.update(b"hello ");
/// pieces.update(b"world");
///
/// let mut whole = Hasher::new();
/// whole.update(b"hello world");
/// assert_eq!(pieces.finalize(), whole.finalize());
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Digest {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash `buf` as if the bytes in `field` were all zero.
///
/// The buffer is not copied or mutated; the zeroed region is fed to the
/// hasher in its place.
///
/// # Panics
/// Panics if `field` is not within `buf` or is longer than `DIGEST_LEN`.
pub fn digest_with_zeroed(buf: &[u8], field: Range<usize>) -> Digest {
    assert!(field.end <= buf.len() && field.len() <= DIGEST_LEN);
    let mut h = Hasher::new();
    h.update(&buf[..field.start]);
    h.update(&[0u8; DIGEST_LEN][..field.len()]);
    h.update(&buf[field.end..]);
    h.finalize()
}

/// Constant-time comparison of two digests.
pub fn digests_match(a: &Digest, b: &Digest) -> bool {
    // blake3::Hash implements constant-time equality.
    blake3::Hash::from(*a) == blake3::Hash::from(*b)
}
