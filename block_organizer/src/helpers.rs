use std::sync::Arc;

use database::ChainDatabase;
use futures::channel::mpsc::UnboundedReceiver;
use parking_lot::Mutex;
use types::{
    merkle_root, script_number, Block, ChainConfig, Hash256, Header, Height, OutPoint,
    Transaction, TxIn, TxOut,
};

use crate::{
    fast_chain::FastChain,
    organizer::Organizer,
    script::NullScriptVerifier,
    settings::Settings,
    subscriber::ReorganizeEvent,
};

/// Mines a block with only its coinbase. `salt` makes otherwise identical
/// sibling coinbases distinct.
pub fn mine_block(
    config: &ChainConfig,
    previous: Hash256,
    height: Height,
    salt: u32,
) -> Arc<Block> {
    mine_block_with(config, previous, height, salt, vec![])
}

/// Mines a block over an arbitrary transaction list. The coinbase commits
/// to `height` and claims exactly the subsidy, forfeiting any fees.
pub fn mine_block_with(
    config: &ChainConfig,
    previous: Hash256,
    height: Height,
    salt: u32,
    extra: Vec<Transaction>,
) -> Arc<Block> {
    let mut script_sig = script_number(height);
    script_sig.extend_from_slice(&salt.to_le_bytes());

    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value: config.block_subsidy(height),
            script_pubkey: vec![0xac],
        }],
        lock_time: 0,
    };

    let mut transactions = vec![coinbase];
    transactions.extend(extra);

    let mut header = Header {
        version: 4,
        previous_block_hash: previous,
        merkle_root: merkle_root(transactions.iter().map(Transaction::hash).collect()),
        timestamp: block_timestamp(height),
        bits: config.proof_of_work_limit,
        nonce: 0,
    };

    // The permissive test target is satisfied after a couple of attempts.
    while !header.is_valid_proof_of_work(config.proof_of_work_limit) {
        header.nonce += 1;
    }

    Arc::new(Block::new(header, transactions))
}

/// A spend of a single confirmed output, paying `value` and forfeiting the
/// rest as fee.
pub fn spend_of(outpoint: OutPoint, value: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            previous_output: outpoint,
            script_sig: vec![],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut {
            value,
            script_pubkey: vec![0xac],
        }],
        lock_time: 0,
    }
}

/// Block timestamps are anchored at a fixed point well behind the wall
/// clock and spaced by the block interval, which keeps the
/// futuristic-timestamp and median-time-past rules satisfied and makes
/// mined fixtures deterministic.
fn block_timestamp(height: Height) -> u32 {
    1_700_000_000 + height * 600
}

/// A wired-up organizer over an in-memory store holding a mined genesis
/// block.
pub struct Context {
    pub config: Arc<ChainConfig>,
    pub database: Arc<ChainDatabase>,
    pub fast_chain: Arc<FastChain>,
    pub organizer: Organizer<NullScriptVerifier>,
    events: UnboundedReceiver<ReorganizeEvent>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::with_config_and_settings(ChainConfig::regtest(), settings)
    }

    pub fn with_config_and_settings(config: ChainConfig, settings: Settings) -> Self {
        let config = Arc::new(config);
        let database = Arc::new(ChainDatabase::in_memory());
        let fast_chain = Arc::new(FastChain::new(database.clone(), settings.flush_writes));

        let genesis = mine_block(&config, Hash256::zero(), 0, 0);
        fast_chain
            .push(genesis)
            .expect("genesis extends the empty chain");

        let organizer = Organizer::new(
            Arc::new(Mutex::new(())),
            fast_chain.clone(),
            config.clone(),
            &settings,
            NullScriptVerifier,
        )
        .expect("priority workers can be spawned");

        organizer.start().expect("store holds the genesis block");

        let events = organizer.subscribe_reorganize();

        Self {
            config,
            database,
            fast_chain,
            organizer,
            events,
        }
    }

    pub fn tip_height(&self) -> Height {
        self.fast_chain
            .get_last_height()
            .expect("store holds the genesis block")
    }

    pub fn tip(&self) -> Arc<Block> {
        self.fast_chain
            .get_block(self.tip_height())
            .expect("store holds the tip")
    }

    /// Mines the next block over `parent`, resolving the parent's height
    /// through the store or, for pooled side blocks, their annotation.
    pub fn next_block(&self, parent: &Arc<Block>) -> Arc<Block> {
        self.next_block_salted(parent, 0)
    }

    pub fn next_block_salted(&self, parent: &Arc<Block>, salt: u32) -> Arc<Block> {
        let height = self.parent_height(parent) + 1;
        mine_block(&self.config, parent.hash(), height, salt)
    }

    pub fn next_block_with(&self, parent: &Arc<Block>, extra: Vec<Transaction>) -> Arc<Block> {
        let height = self.parent_height(parent) + 1;
        mine_block_with(&self.config, parent.hash(), height, 0, extra)
    }

    fn parent_height(&self, parent: &Arc<Block>) -> Height {
        self.fast_chain
            .get_height(&parent.hash())
            .or_else(|| parent.validation_height())
            .expect("parent height is known")
    }

    /// Organizes `count` blocks onto the confirmed tip, asserting success.
    pub fn extend_chain(&self, count: usize) -> Vec<Arc<Block>> {
        let mut blocks = vec![];
        let mut parent = self.tip();

        for _ in 0..count {
            let block = self.next_block(&parent);

            self.organizer
                .organize(block.clone())
                .expect("block extends the confirmed tip");

            parent = block.clone();
            blocks.push(block);
        }

        blocks
    }

    pub fn pool_contains(&self, hash: Hash256) -> bool {
        let mut inventory = vec![hash];
        self.organizer.filter(&mut inventory);
        inventory.is_empty()
    }

    /// The accumulated proof of the whole confirmed chain.
    pub fn confirmed_work(&self) -> types::Work {
        (0..=self.tip_height())
            .map(|height| {
                self.fast_chain
                    .get_header(height)
                    .expect("confirmed header exists")
                    .proof()
            })
            .fold(types::Work::zero(), |sum, proof| sum + proof)
    }

    pub fn next_event(&mut self) -> Option<ReorganizeEvent> {
        self.events.try_next().ok().flatten()
    }

    pub fn assert_no_event(&mut self) {
        assert!(self.next_event().is_none(), "no event should be delivered");
    }

    pub fn assert_reorganize_event(
        &mut self,
        expected_fork_height: Height,
        expected_incoming: &[Arc<Block>],
        expected_outgoing: &[Arc<Block>],
    ) {
        match self.next_event() {
            Some(ReorganizeEvent::Reorganized {
                fork_height,
                incoming,
                outgoing,
            }) => {
                assert_eq!(fork_height, expected_fork_height);
                assert_eq!(
                    incoming.iter().map(|block| block.hash()).collect::<Vec<_>>(),
                    expected_incoming
                        .iter()
                        .map(|block| block.hash())
                        .collect::<Vec<_>>(),
                );
                assert_eq!(
                    outgoing.iter().map(|block| block.hash()).collect::<Vec<_>>(),
                    expected_outgoing
                        .iter()
                        .map(|block| block.hash())
                        .collect::<Vec<_>>(),
                );
            }
            other => panic!("expected a reorganize event, got {other:?}"),
        }
    }
}
