//! The compact "bits" encoding of difficulty targets.
//!
//! A compact value packs a 256-bit target into a base-256 floating point
//! number: one exponent byte followed by a three-byte mantissa. Negative or
//! overflowing encodings are invalid in headers.

use crate::primitives::{Work, U256};

const MANTISSA_MASK: u32 = 0x007f_ffff;
const SIGN_MASK: u32 = 0x0080_0000;

/// Expands a compact encoding into the full 256-bit target.
///
/// Returns `None` for negative, zero, or overflowing encodings, all of which
/// are consensus-invalid in a header.
#[must_use]
pub fn target_from_compact(bits: u32) -> Option<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & MANTISSA_MASK;

    if bits & SIGN_MASK != 0 || mantissa == 0 {
        return None;
    }

    // A mantissa shifted past the top of 256 bits does not round trip.
    let overflow = exponent > 34
        || (exponent == 34 && mantissa > 0xff)
        || (exponent == 33 && mantissa > 0xffff);

    if overflow {
        return None;
    }

    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    };

    (!target.is_zero()).then_some(target)
}

/// Packs a target back into its canonical compact encoding.
#[must_use]
pub fn compact_from_target(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut mantissa = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        (target >> (8 * (size - 3))).low_u64() as u32
    };

    // The sign bit is not available, so a mantissa with its high bit set is
    // pushed down one byte.
    if mantissa & SIGN_MASK != 0 {
        mantissa >>= 8;
        size += 1;
    }

    (size as u32) << 24 | mantissa
}

/// The work proven by a header with the given compact target:
/// `2^256 / (target + 1)`, computed without overflowing 256 bits as
/// `!target / (target + 1) + 1`.
///
/// An invalid encoding proves nothing.
#[must_use]
pub fn proof(bits: u32) -> Work {
    match target_from_compact(bits) {
        Some(target) => (!target / (target + 1)) + 1,
        None => Work::zero(),
    }
}
