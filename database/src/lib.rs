//! The narrow store surface the block organizer drives: block, transaction
//! and spend indices plus the sequence-lock protocol that keeps readers
//! available while a reorganization is being written.
//!
//! The indices here are in-memory maps. A persistent backend is outside the
//! organizer's scope; one can be slotted in behind the same surface as long
//! as it honors the write bracket and the flush lock.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{ensure, Result};
use parking_lot::RwLock;
use thiserror::Error;
use types::{Block, Hash256, Header, Height, OutPoint, Utxo};

/// A read handle obtained from [`SequentialLock::begin_read`].
pub type ReadSequence = u64;

/// The optimistic read/write protocol: writers bump the sequence to odd on
/// entry and back to even on exit; a reader holding an even sequence knows
/// its reads were consistent iff the sequence is unchanged afterwards.
/// Writers must be serialized externally.
#[derive(Default)]
pub struct SequentialLock {
    sequence: AtomicU64,
}

impl SequentialLock {
    #[must_use]
    pub fn begin_read(&self) -> ReadSequence {
        self.sequence.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn is_write_locked(sequence: ReadSequence) -> bool {
        sequence % 2 != 0
    }

    #[must_use]
    pub fn is_read_valid(&self, sequence: ReadSequence) -> bool {
        self.sequence.load(Ordering::Acquire) == sequence
    }

    pub fn begin_write(&self) {
        let previous = self.sequence.fetch_add(1, Ordering::AcqRel);
        debug_assert!(previous % 2 == 0, "writes must be serialized");
    }

    pub fn end_write(&self) {
        let previous = self.sequence.fetch_add(1, Ordering::AcqRel);
        debug_assert!(previous % 2 != 0, "end_write without begin_write");
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("height {height} does not extend the confirmed chain")]
    NonContiguousHeight { height: Height },
    #[error("height {height} is already occupied")]
    OccupiedHeight { height: Height },
    #[error("block does not link to the confirmed tip")]
    UnlinkedBlock,
    #[error("hash is not in the confirmed chain")]
    UnknownHash,
}

struct StoredBlock {
    hash: Hash256,
    block: Arc<Block>,
}

#[derive(Default)]
struct Indexes {
    blocks: BTreeMap<Height, StoredBlock>,
    heights: HashMap<Hash256, Height>,
    transactions: HashMap<Hash256, TransactionRecord>,
    /// Outpoint to the height of the confirmed block that spends it.
    spends: HashMap<OutPoint, Height>,
}

#[derive(Clone, Copy)]
struct TransactionRecord {
    height: Height,
    position: u32,
}

/// The confirmed chain store.
///
/// Individual operations are internally synchronized; *logical* consistency
/// across multi-step reads and writes is the sequence lock's job.
#[derive(Default)]
pub struct ChainDatabase {
    lock: SequentialLock,
    flush_lock: AtomicBool,
    indexes: RwLock<Indexes>,
}

impl ChainDatabase {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    // Sequence lock surface.

    #[must_use]
    pub fn begin_read(&self) -> ReadSequence {
        self.lock.begin_read()
    }

    #[must_use]
    pub fn is_read_valid(&self, sequence: ReadSequence) -> bool {
        self.lock.is_read_valid(sequence)
    }

    pub fn begin_write(&self) {
        self.lock.begin_write();
    }

    pub fn end_write(&self) {
        self.lock.end_write();
    }

    /// Marks a write span that must reach stable storage as a unit.
    /// Returns `false` if a previous span never completed.
    pub fn flush_lock(&self) -> bool {
        !self.flush_lock.swap(true, Ordering::AcqRel)
    }

    pub fn flush_unlock(&self) -> bool {
        self.flush_lock.swap(false, Ordering::AcqRel)
    }

    // Readers.

    #[must_use]
    pub fn top_height(&self) -> Option<Height> {
        self.indexes.read().blocks.keys().next_back().copied()
    }

    #[must_use]
    pub fn top_hash(&self) -> Option<Hash256> {
        let indexes = self.indexes.read();
        let (_, stored) = indexes.blocks.iter().next_back()?;
        Some(stored.hash)
    }

    #[must_use]
    pub fn contains_block(&self, hash: &Hash256) -> bool {
        self.indexes.read().heights.contains_key(hash)
    }

    #[must_use]
    pub fn height_of(&self, hash: &Hash256) -> Option<Height> {
        self.indexes.read().heights.get(hash).copied()
    }

    #[must_use]
    pub fn block_at(&self, height: Height) -> Option<Arc<Block>> {
        let indexes = self.indexes.read();
        indexes.blocks.get(&height).map(|stored| stored.block.clone())
    }

    #[must_use]
    pub fn header_at(&self, height: Height) -> Option<Header> {
        let indexes = self.indexes.read();
        indexes.blocks.get(&height).map(|stored| stored.block.header)
    }

    /// Resolves a confirmed output together with its confirmation metadata.
    #[must_use]
    pub fn output(&self, outpoint: &OutPoint) -> Option<Utxo> {
        let indexes = self.indexes.read();
        let record = indexes.transactions.get(&outpoint.hash)?;
        let stored = indexes.blocks.get(&record.height)?;

        let transaction = stored.block.transactions.get(record.position as usize)?;
        let output = transaction.outputs.get(outpoint.index as usize)?;

        Some(Utxo {
            output: output.clone(),
            height: record.height,
            coinbase: record.position == 0,
        })
    }

    /// The confirmed height spending an outpoint, if any.
    #[must_use]
    pub fn spender_height(&self, outpoint: &OutPoint) -> Option<Height> {
        self.indexes.read().spends.get(outpoint).copied()
    }

    /// Whether a transaction is confirmed at or below `fork_height` and
    /// still has an output unspent at or below it.
    #[must_use]
    pub fn is_unspent_transaction(&self, hash: &Hash256, fork_height: Height) -> bool {
        let indexes = self.indexes.read();

        let Some(record) = indexes.transactions.get(hash) else {
            return false;
        };

        if record.height > fork_height {
            return false;
        }

        let Some(stored) = indexes.blocks.get(&record.height) else {
            return false;
        };

        let Some(transaction) = stored.block.transactions.get(record.position as usize) else {
            return false;
        };

        (0..transaction.outputs.len() as u32).any(|index| {
            let outpoint = OutPoint { hash: *hash, index };

            indexes
                .spends
                .get(&outpoint)
                .is_none_or(|spender| *spender > fork_height)
        })
    }

    // Writers. Serialization and sequence bracketing are the caller's job.

    /// Appends a block to the confirmed tip. Height and hash chaining are
    /// both validated.
    pub fn push(&self, block: Arc<Block>, height: Height) -> Result<()> {
        let mut indexes = self.indexes.write();

        let expected = indexes
            .blocks
            .keys()
            .next_back()
            .map_or(0, |top| top + 1);
        ensure!(
            height == expected,
            StoreError::NonContiguousHeight { height },
        );

        if let Some((_, top)) = indexes.blocks.iter().next_back() {
            ensure!(
                block.header.previous_block_hash == top.hash,
                StoreError::UnlinkedBlock,
            );
        }

        Self::index(&mut indexes, block, height);
        Ok(())
    }

    /// Places a known-good block at a specific height without linking it to
    /// a tip. Used by parallel initial block download, never by the
    /// organizer.
    pub fn insert(&self, block: Arc<Block>, height: Height) -> Result<()> {
        let mut indexes = self.indexes.write();

        ensure!(
            !indexes.blocks.contains_key(&height),
            StoreError::OccupiedHeight { height },
        );

        Self::index(&mut indexes, block, height);
        Ok(())
    }

    /// Removes every block strictly above `fork_hash`, returning them in
    /// top-first order.
    pub fn pop_above(&self, fork_hash: &Hash256) -> Result<Vec<Arc<Block>>> {
        let mut indexes = self.indexes.write();

        let fork_height = *indexes
            .heights
            .get(fork_hash)
            .ok_or(StoreError::UnknownHash)?;

        let above = indexes
            .blocks
            .range(fork_height + 1..)
            .map(|(height, _)| *height)
            .collect::<Vec<_>>();

        let mut popped = vec![];

        for height in above.into_iter().rev() {
            let stored = indexes
                .blocks
                .remove(&height)
                .expect("height was listed from the index");

            indexes.heights.remove(&stored.hash);

            for transaction in &stored.block.transactions {
                indexes.transactions.remove(&transaction.hash());

                if !transaction.is_coinbase() {
                    for input in &transaction.inputs {
                        indexes.spends.remove(&input.previous_output);
                    }
                }
            }

            popped.push(stored.block);
        }

        Ok(popped)
    }

    fn index(indexes: &mut Indexes, block: Arc<Block>, height: Height) {
        let hash = block.hash();

        for (position, transaction) in block.transactions.iter().enumerate() {
            indexes.transactions.insert(
                transaction.hash(),
                TransactionRecord {
                    height,
                    position: position as u32,
                },
            );

            if !transaction.is_coinbase() {
                for input in &transaction.inputs {
                    indexes.spends.insert(input.previous_output, height);
                }
            }
        }

        indexes.heights.insert(hash, height);
        indexes.blocks.insert(height, StoredBlock { hash, block });
    }
}
