//! Payload masking (RFC 6455 Section 5.3).
//!
//! Client-to-server payloads are XOR-ed with a 4-byte key. XOR is its own
//! inverse, so the same routine masks and unmasks.

/// Byte-by-byte masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Word-at-a-time masking, used on the receive path.
///
/// Processes 8 bytes per step with a `u64` built from the repeated key, then
/// finishes the tail byte by byte. Every chunk starts on a multiple of 4 so
/// the key phase never shifts.
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let key = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ key;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
