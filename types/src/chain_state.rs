use crate::primitives::Height;

/// The soft-fork rules active at a given height.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ForkFlags {
    /// Pay-to-script-hash evaluation and sigop accounting.
    pub bip16: bool,
    /// No duplicate unspent transaction identifiers.
    pub bip30: bool,
    /// Coinbase scripts commit to the block height.
    pub bip34: bool,
    /// CHECKLOCKTIMEVERIFY.
    pub bip65: bool,
    /// Strict DER signatures.
    pub bip66: bool,
}

/// An immutable view of the consensus parameters active at one height,
/// assembled from the confirmed chain and an optional branch suffix.
///
/// A new snapshot is produced for every organize call and promoted to the
/// shared pool state on a successful commit; snapshots are never mutated.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChainState {
    /// The height this snapshot applies to, i.e. the hypothetical tip.
    pub height: Height,
    pub forks: ForkFlags,
    /// The lowest header version the active forks still accept.
    pub minimum_version: u32,
    /// The compact target a header at this height must carry.
    pub work_required: u32,
    /// The median of the previous eleven timestamps.
    pub median_time_past: u32,
}

impl ChainState {
    /// Whether a header version is current enough for the active forks.
    #[must_use]
    pub const fn is_valid_version(&self, version: u32) -> bool {
        version >= self.minimum_version
    }
}
