use std::{sync::Arc, thread, time::Duration};

use arc_swap::ArcSwapOption;
use database::{ChainDatabase, SequentialLock};
use log::warn;
use organizer_store::ForkPoint;
use types::{proof, Block, ChainState, Hash256, Header, Height, OutPoint, Utxo, Work};

use crate::error::Error;

/// How long a reader backs off when its sequence is invalidated by a write.
const SPIN_LOCK_SLEEP: Duration = Duration::from_millis(1);

/// A confirmed output together with the height that spends it, if any.
/// Both facts are read under one sequence so they cannot straddle a reorg.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OutputRecord {
    pub utxo: Utxo,
    pub spender_height: Option<Height>,
}

/// The read/write adapter over the confirmed store.
///
/// Reads run the optimistic sequence-lock loop and may proceed in parallel
/// with one writer; writes assume the organizer's writer mutex is held and
/// bracket themselves with the store's write sequence. The adapter also
/// caches the chain state snapshot of the confirmed tip (the *pool state*),
/// replaced wholesale on every committed reorganization.
pub struct FastChain {
    database: Arc<ChainDatabase>,
    pool_state: ArcSwapOption<ChainState>,
    flush_writes: bool,
}

impl FastChain {
    #[must_use]
    pub fn new(database: Arc<ChainDatabase>, flush_writes: bool) -> Self {
        Self {
            database,
            pool_state: ArcSwapOption::empty(),
            flush_writes,
        }
    }

    // Readers.

    #[must_use]
    pub fn get_block_exists(&self, hash: &Hash256) -> bool {
        self.read_serial(|database| database.contains_block(hash))
    }

    #[must_use]
    pub fn get_height(&self, hash: &Hash256) -> Option<Height> {
        self.read_serial(|database| database.height_of(hash))
    }

    #[must_use]
    pub fn get_header(&self, height: Height) -> Option<Header> {
        self.read_serial(|database| database.header_at(height))
    }

    #[must_use]
    pub fn get_bits(&self, height: Height) -> Option<u32> {
        self.get_header(height).map(|header| header.bits)
    }

    #[must_use]
    pub fn get_timestamp(&self, height: Height) -> Option<u32> {
        self.get_header(height).map(|header| header.timestamp)
    }

    #[must_use]
    pub fn get_version(&self, height: Height) -> Option<u32> {
        self.get_header(height).map(|header| header.version)
    }

    #[must_use]
    pub fn get_last_height(&self) -> Option<Height> {
        self.read_serial(ChainDatabase::top_height)
    }

    #[must_use]
    pub fn get_block(&self, height: Height) -> Option<Arc<Block>> {
        self.read_serial(|database| database.block_at(height))
    }

    /// Resolves a confirmed output and its spender. Callers bound both
    /// heights by their fork point; the store itself returns whatever is
    /// confirmed.
    #[must_use]
    pub fn get_output(&self, outpoint: &OutPoint) -> Option<OutputRecord> {
        self.read_serial(|database| {
            let utxo = database.output(outpoint)?;
            let spender_height = database.spender_height(outpoint);
            Some(OutputRecord {
                utxo,
                spender_height,
            })
        })
    }

    /// Whether a transaction identifier is already confirmed at or below
    /// `fork_height` with an output still unspent there. Drives the
    /// duplicate-identifier rule of the accept phase.
    #[must_use]
    pub fn get_is_unspent_transaction(&self, hash: &Hash256, fork_height: Height) -> bool {
        self.read_serial(|database| database.is_unspent_transaction(hash, fork_height))
    }

    /// Sums `proof(bits)` over confirmed heights in `[from_height, top]`,
    /// short-circuiting as soon as the sum exceeds `maximum`. The organizer
    /// only compares the result against `maximum`, so the early exit cannot
    /// change the decision.
    pub fn get_branch_work(&self, maximum: Work, from_height: Height) -> Result<Work, Error> {
        self.read_serial(|database| {
            let Some(top) = database.top_height() else {
                return Some(Work::zero());
            };

            let mut work = Work::zero();

            for height in from_height..=top {
                work += proof(database.header_at(height)?.bits);

                if work > maximum {
                    break;
                }
            }

            Some(work)
        })
        .ok_or(Error::OperationFailed)
    }

    /// Strips confirmed hashes from an inventory request.
    pub fn filter_blocks(&self, inventory: &mut Vec<Hash256>) {
        let kept = self.read_serial(|database| {
            inventory
                .iter()
                .copied()
                .filter(|hash| !database.contains_block(hash))
                .collect::<Vec<_>>()
        });

        *inventory = kept;
    }

    // Pool chain state.

    #[must_use]
    pub fn pool_state(&self) -> Option<Arc<ChainState>> {
        self.pool_state.load_full()
    }

    pub fn set_pool_state(&self, state: Arc<ChainState>) {
        self.pool_state.store(Some(state));
    }

    // Writers. The organizer's writer mutex serializes these.

    /// Appends a block to the confirmed tip.
    pub fn push(&self, block: Arc<Block>) -> Result<(), Error> {
        self.write_serial(|database| {
            let height = database.top_height().map_or(0, |top| top + 1);
            database.push(block.clone(), height)
        })
    }

    /// Places a known-good block at a specific height. Used by parallel
    /// initial block download, never by the organizer.
    pub fn insert(&self, block: Arc<Block>, height: Height) -> Result<(), Error> {
        self.write_serial(|database| database.insert(block.clone(), height))
    }

    /// Removes all blocks strictly above `fork_hash`, top first. Each popped
    /// block keeps its confirmed height in its validation annotation so the
    /// pool can re-admit it with a usable hint.
    pub fn pop_above(&self, fork_hash: &Hash256) -> Result<Vec<Arc<Block>>, Error> {
        let fork_height = self
            .get_height(fork_hash)
            .ok_or(Error::OperationFailed)?;

        let popped = self.write_serial(|database| database.pop_above(fork_hash))?;

        for (index, block) in popped.iter().enumerate() {
            let height = fork_height + (popped.len() - index) as Height;
            block.validation.lock().height = Some(height);
        }

        Ok(popped)
    }

    /// The atomic pop-then-push swap. `incoming` is committed in order
    /// starting at `fork_point.height + 1`; the popped suffix is returned
    /// top first. On success the pool chain state is taken from the new
    /// top's validation annotation.
    ///
    /// A failure here leaves the store in an undefined state; the caller
    /// must treat it as corruption.
    pub fn reorganize(
        &self,
        fork_point: &ForkPoint,
        incoming: &[Arc<Block>],
    ) -> Result<Vec<Arc<Block>>, Error> {
        if self.flush_writes && !self.database.flush_lock() {
            warn!("flush lock is already held, refusing to reorganize");
            return Err(Error::OperationFailed);
        }

        let result = self.swap(fork_point, incoming);

        if self.flush_writes && !self.database.flush_unlock() {
            return Err(Error::OperationFailed);
        }

        let outgoing = result?;

        let state = incoming
            .last()
            .and_then(|top| top.validation.lock().state.clone());

        match state {
            Some(state) => self.set_pool_state(state),
            None => warn!("committed branch top carries no chain state"),
        }

        Ok(outgoing)
    }

    fn swap(
        &self,
        fork_point: &ForkPoint,
        incoming: &[Arc<Block>],
    ) -> Result<Vec<Arc<Block>>, Error> {
        self.database.begin_write();

        let result: anyhow::Result<Vec<Arc<Block>>> = (|| {
            let outgoing = self.database.pop_above(&fork_point.hash)?;

            for (index, block) in incoming.iter().enumerate() {
                let height = fork_point.height + 1 + index as Height;
                self.database.push(block.clone(), height)?;
            }

            Ok(outgoing)
        })();

        self.database.end_write();

        match result {
            Ok(outgoing) => {
                for (index, block) in outgoing.iter().enumerate() {
                    let height = fork_point.height + (outgoing.len() - index) as Height;
                    block.validation.lock().height = Some(height);
                }

                Ok(outgoing)
            }
            Err(error) => {
                warn!("reorganization write failed: {error:#}");
                Err(Error::OperationFailed)
            }
        }
    }

    fn write_serial<T>(
        &self,
        writer: impl FnOnce(&ChainDatabase) -> anyhow::Result<T>,
    ) -> Result<T, Error> {
        self.database.begin_write();
        let result = writer(&self.database);
        self.database.end_write();

        result.map_err(|error| {
            warn!("store write failed: {error:#}");
            Error::OperationFailed
        })
    }

    /// Runs a reader under the sequence-lock protocol. The closure must be
    /// pure with respect to externally visible state: it may run more than
    /// once.
    fn read_serial<T>(&self, reader: impl Fn(&ChainDatabase) -> T) -> T {
        loop {
            let sequence = self.database.begin_read();

            if !SequentialLock::is_write_locked(sequence) {
                let result = reader(&self.database);

                if self.database.is_read_valid(sequence) {
                    return result;
                }
            }

            thread::sleep(SPIN_LOCK_SLEEP);
        }
    }
}

#[cfg(test)]
mod tests {
    use types::{ChainConfig, ForkFlags};

    use crate::helpers::mine_block;

    use super::*;

    fn chain_of(length: usize) -> (FastChain, Vec<Arc<Block>>) {
        let config = ChainConfig::regtest();
        let fast_chain = FastChain::new(Arc::new(ChainDatabase::in_memory()), false);
        let mut blocks = vec![];
        let mut previous = Hash256::zero();

        for height in 0..length {
            let block = mine_block(&config, previous, height as Height, 0);
            previous = block.hash();
            fast_chain.push(block.clone()).expect("block extends the tip");
            blocks.push(block);
        }

        (fast_chain, blocks)
    }

    #[test]
    fn reads_resolve_headers_and_heights() {
        let (fast_chain, blocks) = chain_of(3);

        assert_eq!(fast_chain.get_last_height(), Some(2));
        assert_eq!(fast_chain.get_height(&blocks[1].hash()), Some(1));
        assert!(fast_chain.get_block_exists(&blocks[2].hash()));
        assert_eq!(
            fast_chain.get_bits(0),
            Some(blocks[0].header.bits),
        );
        assert_eq!(fast_chain.get_header(3), None);
    }

    #[test]
    fn branch_work_sums_and_short_circuits() {
        let (fast_chain, blocks) = chain_of(4);
        let unit = blocks[1].header.proof();

        let work = fast_chain
            .get_branch_work(unit * 10, 1)
            .expect("headers are readable");
        assert_eq!(work, unit * 3);

        // Once the sum exceeds the maximum the exact value no longer
        // matters, only that it is greater.
        let capped = fast_chain
            .get_branch_work(unit, 1)
            .expect("headers are readable");
        assert!(capped > unit);

        let empty = fast_chain
            .get_branch_work(unit, 4)
            .expect("an empty range sums to zero");
        assert_eq!(empty, Work::zero());
    }

    #[test]
    fn reorganize_swaps_and_annotates_heights() {
        let (fast_chain, blocks) = chain_of(3);
        let config = ChainConfig::regtest();

        let side_first = mine_block(&config, blocks[1].hash(), 2, 1);
        let side_second = mine_block(&config, side_first.hash(), 3, 1);

        for block in [&side_first, &side_second] {
            block.validation.lock().state = Some(Arc::new(ChainState {
                height: 0,
                forks: ForkFlags::default(),
                minimum_version: 1,
                work_required: config.proof_of_work_limit,
                median_time_past: 0,
            }));
        }

        let fork_point = ForkPoint {
            hash: blocks[1].hash(),
            height: 1,
        };

        let outgoing = fast_chain
            .reorganize(&fork_point, &[side_first.clone(), side_second.clone()])
            .expect("swap succeeds");

        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].hash(), blocks[2].hash());
        assert_eq!(outgoing[0].validation_height(), Some(2));
        assert_eq!(fast_chain.get_last_height(), Some(3));
        assert_eq!(fast_chain.get_height(&side_second.hash()), Some(3));
        assert!(fast_chain.pool_state().is_some());
    }

    #[test]
    fn flush_bracket_refuses_an_interrupted_span() {
        let database = Arc::new(ChainDatabase::in_memory());
        let config = ChainConfig::regtest();
        let fast_chain = FastChain::new(database.clone(), true);

        let genesis = mine_block(&config, Hash256::zero(), 0, 0);
        fast_chain.push(genesis.clone()).expect("genesis extends the empty chain");

        assert!(database.flush_lock());

        let fork_point = ForkPoint {
            hash: genesis.hash(),
            height: 0,
        };

        assert_eq!(
            fast_chain.reorganize(&fork_point, &[]),
            Err(Error::OperationFailed),
        );
    }

    #[test]
    fn filters_confirmed_hashes() {
        let (fast_chain, blocks) = chain_of(2);
        let unknown = Hash256::repeat_byte(9);

        let mut inventory = vec![blocks[0].hash(), unknown];
        fast_chain.filter_blocks(&mut inventory);

        assert_eq!(inventory, vec![unknown]);
    }
}
