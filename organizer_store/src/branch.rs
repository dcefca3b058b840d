use std::sync::Arc;

use types::{Block, Hash256, Height, Work};

/// The confirmed block a branch diverges from. Never a pool block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ForkPoint {
    pub hash: Hash256,
    pub height: Height,
}

/// An ordered suffix of candidate blocks rooted at a confirmed ancestor,
/// oldest first. Constructed per organize call and dropped at the end of it.
///
/// The fork height is unknown until the organizer resolves the fork point
/// hash against the confirmed chain; every height accessor panics before
/// [`set_height`](Self::set_height) is called.
#[derive(Default, Debug)]
pub struct Branch {
    height: Option<Height>,
    blocks: Vec<Arc<Block>>,
}

impl Branch {
    #[must_use]
    pub fn new(blocks: Vec<Arc<Block>>) -> Self {
        debug_assert!(blocks
            .windows(2)
            .all(|pair| pair[1].header.previous_block_hash == pair[0].hash()));

        Self {
            height: None,
            blocks,
        }
    }

    /// Appends a block iff it chains from the current top. The first block
    /// establishes the fork point.
    pub fn push(&mut self, block: Arc<Block>) -> bool {
        let linked = self
            .blocks
            .last()
            .is_none_or(|top| block.header.previous_block_hash == top.hash());

        if linked {
            self.blocks.push(block);
        }

        linked
    }

    /// Records the resolved height of the fork point.
    pub fn set_height(&mut self, height: Height) {
        self.height = Some(height);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    #[must_use]
    pub fn top(&self) -> &Arc<Block> {
        self.blocks.last().expect("branch is not empty")
    }

    /// The hash of the confirmed block this branch extends.
    #[must_use]
    pub fn fork_hash(&self) -> Hash256 {
        self.blocks
            .first()
            .expect("branch is not empty")
            .header
            .previous_block_hash
    }

    /// The confirmed height of the fork point.
    #[must_use]
    pub fn height(&self) -> Height {
        self.height.expect("fork height has been resolved")
    }

    #[must_use]
    pub fn fork_point(&self) -> ForkPoint {
        ForkPoint {
            hash: self.fork_hash(),
            height: self.height(),
        }
    }

    /// The height the branch's top block would confirm at.
    #[must_use]
    pub fn top_height(&self) -> Height {
        self.height() + self.blocks.len() as Height
    }

    /// The height of the `index`-th branch block.
    #[must_use]
    pub fn height_at(&self, index: usize) -> Height {
        self.height() + index as Height + 1
    }

    /// Accumulated proof over all branch headers, in full 256-bit
    /// precision. Ties against the confirmed chain never reorganize, so the
    /// caller compares with strict inequality.
    #[must_use]
    pub fn work(&self) -> Work {
        self.blocks
            .iter()
            .fold(Work::zero(), |sum, block| sum + block.header.proof())
    }
}
