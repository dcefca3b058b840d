use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use futures::channel::oneshot;
use itertools::Itertools as _;
use log::debug;
use organizer_store::Branch;
use types::{
    embedded_script, is_pay_to_script_hash, primitives::TIMESTAMP_FUTURE_SECONDS, script_number,
    sigop_count, Block, ChainConfig, ChainState, Hash256, Height, OutPoint, Transaction, Utxo,
    ValidationError,
};

use crate::{
    chain_state::ChainStatePopulator, error::Error, fast_chain::FastChain, script::ScriptVerifier,
    thread_pool::ThreadPool,
};

/// The three-phase consensus driver.
///
/// `check` is stateless and runs on the caller thread. `accept` runs on the
/// priority pool and reports through a oneshot channel so the organizer can
/// suspend on its own thread. `connect` fans script jobs out across the pool
/// and joins them before returning.
pub struct Validator<S> {
    config: Arc<ChainConfig>,
    fast_chain: Arc<FastChain>,
    populator: ChainStatePopulator,
    script_verifier: Arc<S>,
    stopped: Arc<AtomicBool>,
    relay_transactions: bool,
}

impl<S> Clone for Validator<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            fast_chain: self.fast_chain.clone(),
            populator: self.populator.clone(),
            script_verifier: self.script_verifier.clone(),
            stopped: self.stopped.clone(),
            relay_transactions: self.relay_transactions,
        }
    }
}

impl<S: ScriptVerifier> Validator<S> {
    #[must_use]
    pub fn new(
        config: Arc<ChainConfig>,
        fast_chain: Arc<FastChain>,
        script_verifier: S,
        stopped: Arc<AtomicBool>,
        relay_transactions: bool,
    ) -> Self {
        let populator = ChainStatePopulator::new(config.clone(), fast_chain.clone());

        Self {
            config,
            fast_chain,
            populator,
            script_verifier: Arc::new(script_verifier),
            stopped,
            relay_transactions,
        }
    }

    #[must_use]
    pub const fn populator(&self) -> &ChainStatePopulator {
        &self.populator
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Stateless checks on the candidate alone. No chain lookups; callable
    /// before a branch exists.
    pub fn check(&self, block: &Block) -> Result<(), ValidationError> {
        let config = &self.config;

        if block.transactions.is_empty() {
            return Err(ValidationError::Empty);
        }

        let size = block.serialized_size();

        if size > config.max_block_size {
            return Err(ValidationError::OversizedBlock {
                size,
                limit: config.max_block_size,
            });
        }

        if !block.header.is_valid_proof_of_work(config.proof_of_work_limit) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        if u64::from(block.header.timestamp) > now + TIMESTAMP_FUTURE_SECONDS {
            return Err(ValidationError::FuturisticTimestamp {
                timestamp: block.header.timestamp,
            });
        }

        if !block.transactions[0].is_coinbase() {
            return Err(ValidationError::FirstNotCoinbase);
        }

        if let Some(position) = block
            .transactions
            .iter()
            .skip(1)
            .position(Transaction::is_coinbase)
        {
            return Err(ValidationError::ExtraCoinbase {
                position: position + 1,
            });
        }

        if let Some(hash) = block
            .transactions
            .iter()
            .map(Transaction::hash)
            .duplicates()
            .next()
        {
            return Err(ValidationError::InternalDuplicate { hash });
        }

        let sigops = block
            .transactions
            .iter()
            .map(Transaction::legacy_sigops)
            .sum::<usize>();

        if sigops > config.max_block_sigops {
            return Err(ValidationError::SigopLimit {
                sigops,
                limit: config.max_block_sigops,
            });
        }

        if block.compute_merkle_root() != block.header.merkle_root {
            return Err(ValidationError::MerkleMismatch);
        }

        Ok(())
    }

    /// Kicks the chain-state-dependent checks of the branch top onto the
    /// priority pool. The result arrives on the returned channel; the branch
    /// top's annotation receives the snapshot and the populated prevouts.
    pub fn accept(
        &self,
        pool: &ThreadPool,
        branch: &Arc<Branch>,
    ) -> oneshot::Receiver<Result<(), Error>> {
        let (sender, receiver) = oneshot::channel();
        let validator = self.clone();
        let branch = branch.clone();

        pool.spawn_validation(move || {
            let result = validator.run_accept(&branch);
            // The organizer may already have observed a stop.
            let _ = sender.send(result);
        });

        receiver
    }

    fn run_accept(&self, branch: &Branch) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        let state = self.populator.populate(Some(branch))?;
        let top = branch.top();

        self.accept_header(top, &state, branch.top_height())?;

        // An identifier already confirmed with unspent outputs would make
        // the earlier instance unspendable, so it is rejected outright
        // while the rule is active.
        if state.forks.bip30 {
            for transaction in &top.transactions {
                let hash = transaction.hash();

                if self
                    .fast_chain
                    .get_is_unspent_transaction(&hash, branch.height())
                {
                    return Err(ValidationError::UnspentDuplicate { hash }.into());
                }
            }
        }

        let prevouts = self.populate_prevouts(branch)?;
        self.accept_transactions(top, &prevouts, branch.top_height(), &state)?;

        if self.relay_transactions {
            debug!(
                "block {:?} confirms {} transactions eligible for relay",
                top.hash(),
                top.transactions.len() - 1,
            );
        }

        let mut validation = top.validation.lock();
        validation.state = Some(state);
        validation.prevouts = prevouts;

        Ok(())
    }

    fn accept_header(
        &self,
        top: &Block,
        state: &ChainState,
        top_height: Height,
    ) -> Result<(), ValidationError> {
        let header = &top.header;

        if header.bits != state.work_required {
            return Err(ValidationError::IncorrectWork {
                bits: header.bits,
                required: state.work_required,
            });
        }

        if !state.is_valid_version(header.version) {
            return Err(ValidationError::OldVersion {
                version: header.version,
                minimum: state.minimum_version,
            });
        }

        if header.timestamp <= state.median_time_past {
            return Err(ValidationError::EarlyTimestamp {
                timestamp: header.timestamp,
                median_time_past: state.median_time_past,
            });
        }

        if state.forks.bip34 {
            let coinbase = top.transactions.first().ok_or(ValidationError::Empty)?;
            let commitment = script_number(top_height);

            if !coinbase.inputs[0].script_sig.starts_with(&commitment) {
                return Err(ValidationError::CoinbaseHeightMismatch { height: top_height });
            }
        }

        Ok(())
    }

    /// Resolves the spent output of every input of the branch top: from an
    /// earlier transaction in the same block, from a lower branch block, or
    /// from the confirmed store at or below the fork height. Anything else
    /// fails the transaction.
    fn populate_prevouts(&self, branch: &Branch) -> Result<Vec<Vec<Utxo>>, Error> {
        let top = branch.top();
        let fork_height = branch.height();
        let top_height = branch.top_height();

        let mut branch_transactions = HashMap::new();
        let mut branch_spent = HashSet::new();

        for (block_index, block) in branch.blocks()[..branch.len() - 1].iter().enumerate() {
            for (tx_index, transaction) in block.transactions.iter().enumerate() {
                branch_transactions.insert(transaction.hash(), (block_index, tx_index));

                if !transaction.is_coinbase() {
                    for input in &transaction.inputs {
                        branch_spent.insert(input.previous_output);
                    }
                }
            }
        }

        let mut intra_block: HashMap<Hash256, usize> = HashMap::new();
        let mut spent_in_block: HashSet<OutPoint> = HashSet::new();
        let mut prevouts = Vec::with_capacity(top.transactions.len());

        for (tx_index, transaction) in top.transactions.iter().enumerate() {
            let mut resolved = vec![];

            if !transaction.is_coinbase() {
                for input in &transaction.inputs {
                    let outpoint = input.previous_output;

                    if !spent_in_block.insert(outpoint) || branch_spent.contains(&outpoint) {
                        return Err(ValidationError::DoubleSpend {
                            hash: outpoint.hash,
                            index: outpoint.index,
                        }
                        .into());
                    }

                    let utxo = self.resolve_prevout(
                        branch,
                        top,
                        &intra_block,
                        &branch_transactions,
                        outpoint,
                        fork_height,
                        top_height,
                    )?;

                    if utxo.coinbase {
                        let confirmations = top_height - utxo.height;

                        if confirmations < self.config.coinbase_maturity {
                            return Err(ValidationError::ImmatureCoinbase {
                                height: utxo.height,
                                confirmations,
                            }
                            .into());
                        }
                    }

                    resolved.push(utxo);
                }
            }

            intra_block.insert(transaction.hash(), tx_index);
            prevouts.push(resolved);
        }

        Ok(prevouts)
    }

    #[expect(clippy::too_many_arguments)]
    fn resolve_prevout(
        &self,
        branch: &Branch,
        top: &Block,
        intra_block: &HashMap<Hash256, usize>,
        branch_transactions: &HashMap<Hash256, (usize, usize)>,
        outpoint: OutPoint,
        fork_height: Height,
        top_height: Height,
    ) -> Result<Utxo, Error> {
        let missing = ValidationError::MissingPrevout {
            hash: outpoint.hash,
            index: outpoint.index,
        };

        if let Some(&position) = intra_block.get(&outpoint.hash) {
            let source = &top.transactions[position];
            let output = source
                .outputs
                .get(outpoint.index as usize)
                .ok_or(missing)?;

            return Ok(Utxo {
                output: output.clone(),
                height: top_height,
                coinbase: position == 0,
            });
        }

        if let Some(&(block_index, tx_index)) = branch_transactions.get(&outpoint.hash) {
            let source = &branch.blocks()[block_index].transactions[tx_index];
            let output = source
                .outputs
                .get(outpoint.index as usize)
                .ok_or(missing)?;

            return Ok(Utxo {
                output: output.clone(),
                height: branch.height_at(block_index),
                coinbase: tx_index == 0,
            });
        }

        let record = self.fast_chain.get_output(&outpoint).ok_or(missing.clone())?;

        // Outputs confirmed above the fork belong to the chain being
        // displaced and do not exist from this branch's point of view.
        if record.utxo.height > fork_height {
            return Err(missing.into());
        }

        if let Some(spender) = record.spender_height {
            if spender <= fork_height {
                return Err(ValidationError::DoubleSpend {
                    hash: outpoint.hash,
                    index: outpoint.index,
                }
                .into());
            }
        }

        Ok(record.utxo)
    }

    fn accept_transactions(
        &self,
        top: &Block,
        prevouts: &[Vec<Utxo>],
        top_height: Height,
        state: &ChainState,
    ) -> Result<(), ValidationError> {
        let config = &self.config;
        let mut fees = 0_u64;
        let mut coinbase_value = 0_u64;
        let mut sigops = 0_usize;

        for (transaction, resolved) in top.transactions.iter().zip(prevouts) {
            sigops += transaction.legacy_sigops();

            if state.forks.bip16 {
                for (input, utxo) in transaction.inputs.iter().zip(resolved) {
                    if is_pay_to_script_hash(&utxo.output.script_pubkey) {
                        if let Some(embedded) = embedded_script(&input.script_sig) {
                            sigops += sigop_count(&embedded, true);
                        }
                    }
                }
            }

            let output_value = transaction
                .total_output_value()
                .filter(|value| *value <= config.max_money)
                .ok_or(ValidationError::ValueOverflow)?;

            if transaction.is_coinbase() {
                coinbase_value = output_value;
                continue;
            }

            let input_value = resolved
                .iter()
                .try_fold(0_u64, |sum, utxo| sum.checked_add(utxo.output.value))
                .filter(|value| *value <= config.max_money)
                .ok_or(ValidationError::ValueOverflow)?;

            if output_value > input_value {
                return Err(ValidationError::InsufficientInputValue);
            }

            fees = fees
                .checked_add(input_value - output_value)
                .ok_or(ValidationError::ValueOverflow)?;
        }

        if sigops > config.max_block_sigops {
            return Err(ValidationError::SigopLimit {
                sigops,
                limit: config.max_block_sigops,
            });
        }

        let ceiling = config
            .block_subsidy(top_height)
            .checked_add(fees)
            .ok_or(ValidationError::ValueOverflow)?;

        if coinbase_value > ceiling {
            return Err(ValidationError::ExcessCoinbaseValue);
        }

        Ok(())
    }

    /// Script verification for every input of the branch top. Lower branch
    /// blocks were verified when they entered the pool as side-chain tips
    /// and are not re-run here.
    ///
    /// Inputs are fanned out across the priority pool in chunks; the calling
    /// thread joins them before returning.
    pub fn connect(&self, pool: &ThreadPool, branch: &Branch) -> Result<(), Error> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        let top = branch.top();

        let (forks, prevouts) = {
            let validation = top.validation.lock();
            let state = validation.state.as_ref().ok_or(Error::OperationFailed)?;
            (state.forks, Arc::new(validation.prevouts.clone()))
        };

        let inputs = top
            .transactions
            .iter()
            .enumerate()
            .filter(|(_, transaction)| !transaction.is_coinbase())
            .flat_map(|(tx_index, transaction)| {
                (0..transaction.inputs.len()).map(move |input_index| (tx_index, input_index))
            })
            .collect::<Vec<_>>();

        if inputs.is_empty() {
            return Ok(());
        }

        let chunk_size = inputs.len().div_ceil(pool.workers().max(1));
        let (sender, receiver) = mpsc::channel();
        let mut jobs = 0;

        for chunk in inputs.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let sender = sender.clone();
            let top = top.clone();
            let prevouts = prevouts.clone();
            let verifier = self.script_verifier.clone();

            pool.spawn_validation(move || {
                let result = chunk.into_iter().try_for_each(|(tx_index, input_index)| {
                    let transaction = &top.transactions[tx_index];
                    let prevout = &prevouts[tx_index][input_index];
                    verifier.verify_input(transaction, input_index, prevout, &forks)
                });

                let _ = sender.send(result);
            });

            jobs += 1;
        }

        drop(sender);

        for _ in 0..jobs {
            match receiver.recv() {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(error.into()),
                // A job was lost to a panic.
                Err(_) => return Err(Error::OperationFailed),
            }
        }

        Ok(())
    }
}
