use thiserror::Error;
use types::ValidationError;

/// The outcome codes an organize call can surface.
///
/// Everything except [`OperationFailed`](Self::OperationFailed) and
/// [`StoreCorrupted`](Self::StoreCorrupted) is a normal rejection: the block
/// is simply not promoted. Consensus failures are never retried.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Error {
    #[error("service is stopped")]
    ServiceStopped,
    #[error("block is already known")]
    DuplicateBlock,
    #[error("block does not connect to the confirmed chain or the pool")]
    OrphanBlock,
    #[error("branch does not accumulate more work than the confirmed chain")]
    InsufficientWork,
    #[error(transparent)]
    Validate(#[from] ValidationError),
    #[error("storage operation failed")]
    OperationFailed,
    #[error("reorganization write failed, the store must be assumed corrupted")]
    StoreCorrupted,
}
