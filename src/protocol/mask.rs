//! Payload masking (RFC 6455 Section 5.3).
//!
//! Clients mask every frame with a 4-byte key; the server unmasks inbound
//! payloads and never masks its own frames.

use crate::error::{Error, Result};

/// XOR every byte with `mask[i % 4]`.
///
/// Masking is its own inverse: applying the same key twice restores the input.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Fresh masking key from the OS random source, for client peers.
///
/// # Errors
///
/// Returns `Error::Io` if the random source is unavailable.
pub fn random_mask() -> Result<[u8; 4]> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).map_err(|e| Error::Io(e.to_string()))?;
    Ok(key)
}
