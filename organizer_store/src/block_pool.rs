use std::{collections::HashMap, sync::Arc};

use types::{Block, Hash256, Height};

use crate::branch::Branch;

struct PoolEntry {
    block: Arc<Block>,
    /// Height hint used for capacity enforcement. Recorded from the block's
    /// validation annotation on admission and repaired against the parent
    /// during path walks.
    height: Height,
}

/// A bounded cache of side-chain candidate blocks keyed by hash.
///
/// The pool is a forest: every entry's parent is either another entry or a
/// confirmed block. Parent links are read from headers; no child pointers
/// are stored. Capacity is measured as a height span below the confirmed
/// tip, not as an entry count.
///
/// The pool is only mutated inside the organizer's critical section, which
/// is what makes the plain map safe.
pub struct BlockPool {
    maximum_depth: Height,
    blocks: HashMap<Hash256, PoolEntry>,
}

impl BlockPool {
    #[must_use]
    pub fn new(maximum_depth: Height) -> Self {
        Self {
            maximum_depth,
            blocks: HashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn exists(&self, hash: &Hash256) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Admits a validated side-chain block. A block already present is left
    /// untouched; the parent need not be resident.
    pub fn add(&mut self, block: Arc<Block>) {
        let hash = block.hash();

        if self.blocks.contains_key(&hash) {
            return;
        }

        let height = block.validation_height().unwrap_or_default();
        self.blocks.insert(hash, PoolEntry { block, height });
    }

    /// Re-admits blocks popped from the confirmed chain by a reorganization.
    pub fn add_all(&mut self, blocks: impl IntoIterator<Item = Arc<Block>>) {
        for block in blocks {
            self.add(block);
        }
    }

    /// Drops the blocks of a committed branch.
    pub fn remove(&mut self, blocks: &[Arc<Block>]) {
        for block in blocks {
            self.blocks.remove(&block.hash());
        }
    }

    /// Evicts every entry whose recorded height has fallen more than the
    /// maximum depth below the new tip, then cascades to descendants whose
    /// parent was evicted so the forest invariant holds.
    pub fn prune(&mut self, top_height: Height) {
        let Some(threshold) = top_height.checked_sub(self.maximum_depth) else {
            return;
        };

        let mut evicted: Vec<Hash256> = vec![];

        self.blocks.retain(|hash, entry| {
            let keep = entry.height > threshold;
            if !keep {
                evicted.push(*hash);
            }
            keep
        });

        while !evicted.is_empty() {
            let mut orphaned = vec![];

            self.blocks.retain(|hash, entry| {
                let keep = !evicted.contains(&entry.block.header.previous_block_hash);
                if !keep {
                    orphaned.push(*hash);
                }
                keep
            });

            evicted = orphaned;
        }
    }

    /// Reconstructs the path from the pool forest to `block`, ordered fork
    /// point first with `block` on top. The walk follows parent hashes until
    /// one is not resident; that hash is the candidate fork point, which the
    /// organizer resolves against the confirmed chain.
    ///
    /// A candidate already resident in the pool yields an empty branch.
    pub fn get_path(&mut self, block: Arc<Block>) -> Branch {
        if self.exists(&block.hash()) {
            return Branch::default();
        }

        let mut path = vec![];
        let mut parent = block.header.previous_block_hash;

        while let Some(entry) = self.blocks.get(&parent) {
            path.push(parent);
            parent = entry.block.header.previous_block_hash;
        }

        path.reverse();

        // Repair stale height hints along the walked path.
        for index in 1..path.len() {
            let expected = self.blocks[&path[index - 1]].height + 1;
            let entry = self
                .blocks
                .get_mut(&path[index])
                .expect("hash was collected from the pool");

            if entry.height != expected {
                entry.height = expected;
            }
        }

        let mut blocks = path
            .iter()
            .map(|hash| self.blocks[hash].block.clone())
            .collect::<Vec<_>>();

        blocks.push(block);
        Branch::new(blocks)
    }

    /// Strips hashes the pool holds from an inventory request.
    pub fn filter(&self, inventory: &mut Vec<Hash256>) {
        inventory.retain(|hash| !self.exists(hash));
    }
}

#[cfg(test)]
mod tests {
    use types::Header;

    use super::*;

    fn block_at(previous: Hash256, height: Height, nonce: u32) -> Arc<Block> {
        let block = Block::new(
            Header {
                version: 1,
                previous_block_hash: previous,
                merkle_root: Hash256::zero(),
                timestamp: 0,
                bits: 0x207f_ffff,
                nonce,
            },
            vec![],
        );

        block.validation.lock().height = Some(height);
        Arc::new(block)
    }

    #[test]
    fn add_is_idempotent() {
        let mut pool = BlockPool::new(100);
        let block = block_at(Hash256::repeat_byte(1), 5, 0);

        pool.add(block.clone());
        pool.add(block.clone());

        assert_eq!(pool.len(), 1);
        assert!(pool.exists(&block.hash()));
    }

    #[test]
    fn reconstructs_the_path_to_the_fork_point() {
        let mut pool = BlockPool::new(100);

        let first = block_at(Hash256::repeat_byte(1), 4, 0);
        let second = block_at(first.hash(), 5, 1);
        let third = block_at(second.hash(), 6, 2);

        pool.add(first.clone());
        pool.add(second.clone());

        let branch = pool.get_path(third.clone());

        assert_eq!(branch.len(), 3);
        assert_eq!(branch.fork_hash(), Hash256::repeat_byte(1));
        assert_eq!(branch.blocks()[0].hash(), first.hash());
        assert_eq!(branch.top().hash(), third.hash());
    }

    #[test]
    fn resident_candidate_yields_an_empty_branch() {
        let mut pool = BlockPool::new(100);
        let block = block_at(Hash256::repeat_byte(1), 5, 0);

        pool.add(block.clone());

        assert!(pool.get_path(block).is_empty());
    }

    #[test]
    fn orphan_candidate_yields_a_branch_of_one() {
        let mut pool = BlockPool::new(100);
        let block = block_at(Hash256::repeat_byte(9), 5, 0);

        let branch = pool.get_path(block.clone());

        assert_eq!(branch.len(), 1);
        assert_eq!(branch.fork_hash(), Hash256::repeat_byte(9));
    }

    #[test]
    fn prunes_by_height_span_and_cascades_to_descendants() {
        let mut pool = BlockPool::new(10);

        let deep = block_at(Hash256::repeat_byte(1), 1, 0);
        // The child's hint is fresh, but its parent is pruned out from
        // underneath it.
        let child = block_at(deep.hash(), 95, 1);
        let recent = block_at(Hash256::repeat_byte(2), 96, 2);

        pool.add(deep.clone());
        pool.add(child.clone());
        pool.add(recent.clone());

        pool.prune(100);

        assert!(!pool.exists(&deep.hash()));
        assert!(!pool.exists(&child.hash()));
        assert!(pool.exists(&recent.hash()));
    }

    #[test]
    fn prune_below_the_depth_limit_keeps_everything() {
        let mut pool = BlockPool::new(100);
        let block = block_at(Hash256::repeat_byte(1), 0, 0);
        pool.add(block.clone());

        pool.prune(50);

        assert!(pool.exists(&block.hash()));
    }

    #[test]
    fn path_walk_repairs_stale_height_hints() {
        let mut pool = BlockPool::new(10);

        let first = block_at(Hash256::repeat_byte(1), 90, 0);
        let second = block_at(first.hash(), 0, 1);
        let candidate = block_at(second.hash(), 0, 2);

        pool.add(first);
        pool.add(second.clone());

        let _branch = pool.get_path(candidate);

        // The stale hint would have been evicted at the old value.
        pool.prune(95);
        assert!(pool.exists(&second.hash()));
    }

    #[test]
    fn filters_resident_hashes_from_inventories() {
        let mut pool = BlockPool::new(100);
        let block = block_at(Hash256::repeat_byte(1), 5, 0);
        pool.add(block.clone());

        let mut inventory = vec![block.hash(), Hash256::repeat_byte(7)];
        pool.filter(&mut inventory);

        assert_eq!(inventory, vec![Hash256::repeat_byte(7)]);
    }
}
