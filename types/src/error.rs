use static_assertions::assert_eq_size;
use thiserror::Error;

use crate::primitives::{Hash256, Height};

/// Consensus rejection codes produced by the three validation phases.
///
/// These are normal outcomes for a candidate block, not faults; the
/// organizer reports them to the caller without retrying.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ValidationError {
    // Stateless checks.
    #[error("block has no transactions")]
    Empty,
    #[error("block size {size} exceeds the limit {limit}")]
    OversizedBlock { size: usize, limit: usize },
    #[error("header does not satisfy its proof-of-work target")]
    InvalidProofOfWork,
    #[error("timestamp {timestamp} is too far ahead of the wall clock")]
    FuturisticTimestamp { timestamp: u32 },
    #[error("first transaction is not a coinbase")]
    FirstNotCoinbase,
    #[error("coinbase transaction at position {position}")]
    ExtraCoinbase { position: usize },
    #[error("duplicate transaction {hash} within the block")]
    InternalDuplicate { hash: Hash256 },
    #[error("block sigops {sigops} exceed the limit {limit}")]
    SigopLimit { sigops: usize, limit: usize },
    #[error("merkle root does not commit to the transactions")]
    MerkleMismatch,

    // Chain-state-dependent checks.
    #[error("header bits {bits:#010x} do not match the required work {required:#010x}")]
    IncorrectWork { bits: u32, required: u32 },
    #[error("header version {version} is below the minimum {minimum}")]
    OldVersion { version: u32, minimum: u32 },
    #[error("timestamp {timestamp} is not after the median time past {median_time_past}")]
    EarlyTimestamp {
        timestamp: u32,
        median_time_past: u32,
    },
    #[error("coinbase script does not commit to height {height}")]
    CoinbaseHeightMismatch { height: Height },
    #[error("transaction {hash} duplicates an unspent confirmed transaction")]
    UnspentDuplicate { hash: Hash256 },
    #[error("prevout {hash}:{index} not found at or below the fork point")]
    MissingPrevout { hash: Hash256, index: u32 },
    #[error("prevout {hash}:{index} is already spent")]
    DoubleSpend { hash: Hash256, index: u32 },
    #[error("coinbase spend at height {height} has only {confirmations} confirmations")]
    ImmatureCoinbase {
        height: Height,
        confirmations: u32,
    },
    #[error("transaction values overflow or exceed the money supply")]
    ValueOverflow,
    #[error("inputs are worth less than outputs")]
    InsufficientInputValue,
    #[error("coinbase claims more than subsidy plus fees")]
    ExcessCoinbaseValue,

    // Script verification.
    #[error("input {input_index} of transaction {hash} fails script verification")]
    InvalidScript { hash: Hash256, input_index: usize },
}

assert_eq_size!(ValidationError, [usize; 6]);
