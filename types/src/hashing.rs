use sha2::{Digest as _, Sha256};

use crate::primitives::Hash256;

/// Double SHA-256, the digest used for block and transaction identifiers.
#[must_use]
pub fn sha256d(bytes: impl AsRef<[u8]>) -> Hash256 {
    let once = Sha256::digest(bytes.as_ref());
    let twice = Sha256::digest(once);
    Hash256::from_slice(&twice)
}

/// Writes a variable-length integer in the wire encoding.
pub(crate) fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// The serialized length of a variable-length integer.
pub(crate) const fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
