pub use ethereum_types::{H256, U256, U512};

/// A double-SHA-256 digest in wire order.
///
/// Comparisons against difficulty targets interpret the digest as a
/// little-endian 256-bit integer, matching the network's convention.
pub type Hash256 = H256;

/// A confirmed chain height. Height 0 is the genesis block.
pub type Height = u32;

/// Accumulated proof-of-work. Always computed with full 256-bit precision.
pub type Work = U256;

/// Satoshis per coin.
pub const COIN: u64 = 100_000_000;

/// Two hours, the tolerated clock skew for header timestamps.
pub const TIMESTAMP_FUTURE_SECONDS: u64 = 2 * 60 * 60;

/// The number of ancestor timestamps whose median bounds a header timestamp.
pub const MEDIAN_TIME_PAST_INTERVAL: usize = 11;
