//! Stable hashing for partition assignment.
//!
//! Producers and consumers deployed independently must agree on which
//! partition a stream lands in, so the hash has to be identical across
//! processes, platforms and compiler versions. `std`'s hashers make no such
//! promise; SHA-256 does.

use sha2::{Digest, Sha256};

/// Compute a 32-bit uniform hash over a sequence of byte segments.
///
/// Segments are length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
/// hash differently.
#[must_use]
pub fn uniform_hash<'a>(segments: impl IntoIterator<Item = &'a [u8]>) -> u32 {
    let mut hasher = Sha256::new();
    for segment in segments {
        let len = u64::try_from(segment.len()).unwrap_or(u64::MAX);
        hasher.update(len.to_be_bytes());
        hasher.update(segment);
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
