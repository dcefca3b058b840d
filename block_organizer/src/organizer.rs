use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use futures::{channel::mpsc::UnboundedReceiver, executor::block_on};
use log::{debug, error};
use organizer_store::{BlockPool, Branch};
use parking_lot::Mutex;
use types::{Block, ChainConfig, Hash256};

use crate::{
    error::Error,
    fast_chain::FastChain,
    script::ScriptVerifier,
    settings::Settings,
    subscriber::{ReorganizeEvent, ReorganizeSubscriber},
    thread_pool::ThreadPool,
    validate::Validator,
};

/// The coordinator of the block write path.
///
/// `organize` runs the whole validate-and-commit pipeline under a single
/// process-wide writer mutex shared with the sibling transaction organizer,
/// which linearizes it against both reorganization writes and transaction
/// pool admission. Store readers stay available throughout via the sequence
/// lock.
pub struct Organizer<S> {
    /// The shared writer mutex. Injected so the transaction organizer can
    /// hold the same one.
    mutex: Arc<Mutex<()>>,
    stopped: Arc<AtomicBool>,
    thread_pool: ThreadPool,
    fast_chain: Arc<FastChain>,
    /// Mutated only while the writer mutex is held.
    block_pool: Mutex<BlockPool>,
    validator: Validator<S>,
    subscriber: ReorganizeSubscriber,
    fork_point_duplicate_check: bool,
}

impl<S: ScriptVerifier> Organizer<S> {
    pub fn new(
        mutex: Arc<Mutex<()>>,
        fast_chain: Arc<FastChain>,
        config: Arc<ChainConfig>,
        settings: &Settings,
        script_verifier: S,
    ) -> anyhow::Result<Self> {
        let stopped = Arc::new(AtomicBool::new(true));
        let thread_pool = ThreadPool::new(settings.worker_count())?;

        let validator = Validator::new(
            config,
            fast_chain.clone(),
            script_verifier,
            stopped.clone(),
            settings.relay_transactions,
        );

        Ok(Self {
            mutex,
            stopped,
            thread_pool,
            fast_chain,
            block_pool: Mutex::new(BlockPool::new(settings.reorganization_limit)),
            validator,
            subscriber: ReorganizeSubscriber::default(),
            fork_point_duplicate_check: settings.fork_point_duplicate_check,
        })
    }

    /// Bootstraps the pool chain state from the confirmed tip and opens the
    /// organizer for work. The store must already hold at least the genesis
    /// block.
    pub fn start(&self) -> Result<(), Error> {
        let state = self.validator.populator().populate(None)?;
        self.fast_chain.set_pool_state(state);

        self.subscriber.start();
        self.stopped.store(false, Ordering::Release);
        Ok(())
    }

    /// Stops the organizer. In-flight organize calls observe the stop at
    /// their next phase boundary; committed work is never rolled back.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.subscriber.stop();
    }

    #[must_use]
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn subscribe_reorganize(&self) -> UnboundedReceiver<ReorganizeEvent> {
        self.subscriber.subscribe()
    }

    /// Strips hashes held by the side-chain pool from an inventory request.
    pub fn filter(&self, inventory: &mut Vec<Hash256>) {
        self.block_pool.lock().filter(inventory);
    }

    /// Decides whether `block` extends, forks, or is rejected from the
    /// chain, and commits the heavier branch if one emerges.
    ///
    /// The entire sequence holds the writer mutex. The accept phase runs on
    /// the priority pool while this thread suspends on its completion
    /// channel; the lock is always released on the calling thread.
    pub fn organize(&self, block: Arc<Block>) -> Result<(), Error> {
        let _guard = self.mutex.lock();

        // The stop check must be made under the mutex.
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        self.validator.check(&block)?;

        let hash = block.hash();
        let mut branch = self.block_pool.lock().get_path(block);

        // The historical rule checks the candidate's hash against the whole
        // store, which conflates duplicate suppression with collisions
        // outside the candidate's own chain; the fork-point-scoped variant
        // is applied after the fork height is known.
        if branch.is_empty()
            || (!self.fork_point_duplicate_check && self.fast_chain.get_block_exists(&hash))
        {
            return Err(Error::DuplicateBlock);
        }

        // The oldest branch block's parent must be confirmed; otherwise the
        // candidate is an orphan. Orphans are not pooled here; retaining
        // them for later parenting is upstream's concern.
        let Some(fork_height) = self.fast_chain.get_height(&branch.fork_hash()) else {
            return Err(Error::OrphanBlock);
        };

        branch.set_height(fork_height);

        if self.fork_point_duplicate_check {
            if let Some(height) = self.fast_chain.get_height(&hash) {
                if height > fork_height {
                    return Err(Error::DuplicateBlock);
                }
            }
        }

        let branch = Arc::new(branch);

        // Suspend on the completion channel; resuming here rather than on a
        // priority thread keeps the writer mutex off the pool.
        let accepted = self.validator.accept(&self.thread_pool, &branch);
        block_on(accepted).unwrap_or(Err(Error::OperationFailed))?;

        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        self.validator.connect(&self.thread_pool, &branch)?;

        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        // The top block is valid even if the branch has insufficient work.
        let top = branch.top();

        {
            let mut validation = top.validation.lock();
            validation.height = Some(branch.top_height());
            validation.result = Some(Ok(()));
            validation.start_notify = Some(Instant::now());
        }

        let threshold = self
            .fast_chain
            .get_branch_work(branch.work(), fork_height + 1)?;

        // Strictly greater only: an equal-work branch never displaces the
        // incumbent, so the first seen wins at ties.
        if branch.work() <= threshold {
            self.block_pool.lock().add(top.clone());
            return Err(Error::InsufficientWork);
        }

        let outgoing = match self
            .fast_chain
            .reorganize(&branch.fork_point(), branch.blocks())
        {
            Ok(outgoing) => outgoing,
            Err(error) => {
                error!("failure writing block to store, store is now corrupted: {error}");
                return Err(Error::StoreCorrupted);
            }
        };

        {
            let mut pool = self.block_pool.lock();
            pool.remove(branch.blocks());
            pool.prune(branch.top_height());
            pool.add_all(outgoing.iter().cloned());
        }

        debug!(
            "reorganized to height {} replacing {} blocks",
            branch.top_height(),
            outgoing.len(),
        );

        self.subscriber.notify(&ReorganizeEvent::Reorganized {
            fork_height,
            incoming: Arc::new(branch.blocks().to_vec()),
            outgoing: Arc::new(outgoing),
        });

        Ok(())
    }
}

// `Branch` crosses into the accept task by shared reference.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Branch>();
};
