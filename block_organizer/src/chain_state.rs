use std::sync::Arc;

use organizer_store::Branch;
use types::{
    compact_from_target,
    primitives::{MEDIAN_TIME_PAST_INTERVAL, U512},
    target_from_compact, ChainConfig, ChainState, ForkFlags, Header, Height, Work,
};

use crate::{error::Error, fast_chain::FastChain};

/// Assembles the chain state snapshot for a hypothetical tip: either the top
/// of a branch under validation or the next block on the confirmed chain.
///
/// Header fields are read over the retargeting and median-time-past windows
/// ending just below the target height, resolved through the branch first
/// and the confirmed store below its fork point.
#[derive(Clone)]
pub struct ChainStatePopulator {
    config: Arc<ChainConfig>,
    fast_chain: Arc<FastChain>,
}

impl ChainStatePopulator {
    #[must_use]
    pub fn new(config: Arc<ChainConfig>, fast_chain: Arc<FastChain>) -> Self {
        Self { config, fast_chain }
    }

    /// The snapshot for the top of `branch`, or for the block that would
    /// extend the confirmed tip when no branch is given (the pool state).
    ///
    /// Promotes the cached pool state when it already applies to the target
    /// height; otherwise rebuilds from store and branch.
    pub fn populate(&self, branch: Option<&Branch>) -> Result<Arc<ChainState>, Error> {
        let height = match branch {
            Some(branch) => branch.top_height(),
            None => self
                .fast_chain
                .get_last_height()
                .ok_or(Error::OperationFailed)?
                + 1,
        };

        if let Some(state) = self.fast_chain.pool_state() {
            if state.height == height {
                return Ok(state);
            }
        }

        Ok(Arc::new(ChainState {
            height,
            forks: self.fork_flags(height),
            minimum_version: self.minimum_version(height),
            work_required: self.work_required(branch, height)?,
            median_time_past: self.median_time_past(branch, height)?,
        }))
    }

    fn fork_flags(&self, height: Height) -> ForkFlags {
        let config = &self.config;

        ForkFlags {
            bip16: height >= config.bip16_height,
            bip30: height >= config.bip30_height,
            bip34: height >= config.bip34_height,
            bip65: height >= config.bip65_height,
            bip66: height >= config.bip66_height,
        }
    }

    fn minimum_version(&self, height: Height) -> u32 {
        let config = &self.config;

        if height >= config.bip65_height {
            4
        } else if height >= config.bip66_height {
            3
        } else if height >= config.bip34_height {
            2
        } else {
            1
        }
    }

    /// The compact target a header at `height` must carry: the previous
    /// target, retargeted at every interval boundary by the clamped actual
    /// timespan of the closed interval.
    fn work_required(&self, branch: Option<&Branch>, height: Height) -> Result<u32, Error> {
        let config = &self.config;

        if height == 0 {
            return Ok(config.proof_of_work_limit);
        }

        let previous_bits = self.header_at(branch, height - 1)?.bits;

        if height % config.retargeting_interval != 0 {
            return Ok(previous_bits);
        }

        // The measured window spans one block fewer than the interval, the
        // historical off-by-one the network consensus retains.
        let interval_start = self
            .header_at(branch, height - config.retargeting_interval)?
            .timestamp;
        let interval_end = self.header_at(branch, height - 1)?.timestamp;

        let target_timespan = config.target_timespan_seconds;
        let actual_timespan = interval_end
            .saturating_sub(interval_start)
            .clamp(target_timespan / 4, target_timespan.saturating_mul(4));

        let previous_target =
            target_from_compact(previous_bits).ok_or(Error::OperationFailed)?;
        let limit = target_from_compact(config.proof_of_work_limit)
            .ok_or(Error::OperationFailed)?;

        // The scaled target can exceed 256 bits before the limit clamp, so
        // the multiplication widens.
        let scaled =
            previous_target.full_mul(Work::from(actual_timespan)) / U512::from(target_timespan);
        let retargeted = Work::try_from(scaled).unwrap_or(limit);

        Ok(compact_from_target(retargeted.min(limit)))
    }

    /// The median of the previous eleven timestamps, or of what exists near
    /// the start of the chain.
    fn median_time_past(&self, branch: Option<&Branch>, height: Height) -> Result<u32, Error> {
        let window_start = height.saturating_sub(MEDIAN_TIME_PAST_INTERVAL as Height);

        let mut timestamps = (window_start..height)
            .map(|ancestor| Ok(self.header_at(branch, ancestor)?.timestamp))
            .collect::<Result<Vec<_>, Error>>()?;

        if timestamps.is_empty() {
            return Ok(0);
        }

        timestamps.sort_unstable();
        Ok(timestamps[timestamps.len() / 2])
    }

    /// A header by height, resolved through the branch above its fork point
    /// and through the confirmed store below it.
    fn header_at(&self, branch: Option<&Branch>, height: Height) -> Result<Header, Error> {
        if let Some(branch) = branch {
            let fork_height = branch.height();

            if height > fork_height {
                let index = (height - fork_height - 1) as usize;

                return branch
                    .blocks()
                    .get(index)
                    .map(|block| block.header)
                    .ok_or(Error::OperationFailed);
            }
        }

        self.fast_chain.get_header(height).ok_or(Error::OperationFailed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use database::ChainDatabase;
    use test_case::test_case;
    use types::Hash256;

    use crate::helpers::mine_block;

    use super::*;

    // A short retargeting interval keeps the fixtures small.
    fn config() -> ChainConfig {
        ChainConfig {
            retargeting_interval: 4,
            target_timespan_seconds: 4 * 600,
            proof_of_work_limit: 0x207f_ffff,
            bip34_height: 2,
            bip65_height: 6,
            bip66_height: 4,
            ..ChainConfig::regtest()
        }
    }

    fn populator_with_chain(length: usize) -> ChainStatePopulator {
        let config = Arc::new(config());
        let fast_chain = Arc::new(FastChain::new(Arc::new(ChainDatabase::in_memory()), false));

        let mut previous = Hash256::zero();
        for height in 0..length {
            let block = mine_block(&config, previous, height as Height, 0);
            previous = block.hash();
            fast_chain.push(block).expect("block extends the tip");
        }

        ChainStatePopulator::new(config, fast_chain)
    }

    #[test]
    fn activates_forks_by_height() {
        let populator = populator_with_chain(8);

        let state = populator.populate(None).expect("chain is populated");
        assert_eq!(state.height, 8);
        assert!(state.forks.bip34);
        assert!(state.forks.bip65);

        let early = populator.fork_flags(1);
        assert!(!early.bip34);
    }

    #[test_case(1 => 1; "before every fork")]
    #[test_case(3 => 2; "height commitment active")]
    #[test_case(5 => 3; "strict signatures active")]
    #[test_case(7 => 4; "checklocktimeverify active")]
    fn raises_the_minimum_version_with_each_fork(height: Height) -> u32 {
        populator_with_chain(0).minimum_version(height)
    }

    #[test]
    fn median_time_past_is_the_middle_timestamp() {
        let populator = populator_with_chain(8);

        let state = populator.populate(None).expect("chain is populated");

        // Timestamps are spaced by the block interval, so the median of the
        // window is its middle element.
        let expected = populator
            .header_at(None, 4)
            .expect("header is confirmed")
            .timestamp;
        assert_eq!(state.median_time_past, expected);
    }

    #[test]
    fn off_interval_heights_inherit_the_previous_target() {
        let populator = populator_with_chain(3);

        let bits = populator
            .work_required(None, 3)
            .expect("window is readable");
        assert_eq!(bits, 0x207f_ffff);
    }

    #[test]
    fn retargets_over_the_closed_interval() {
        // Fixture blocks arrive exactly on schedule, but the measured
        // window spans one spacing fewer than the interval, so the target
        // tightens to three quarters of the limit.
        let populator = populator_with_chain(4);

        let bits = populator
            .work_required(None, 4)
            .expect("window is readable");
        assert_eq!(bits, 0x205f_ffff);
    }

    #[test]
    fn retarget_is_clamped_by_the_proof_limit() {
        let config = Arc::new(config());
        let fast_chain = Arc::new(FastChain::new(Arc::new(ChainDatabase::in_memory()), false));

        // Headers four times slower than the schedule; pushes validate
        // linkage only, so the fixture needs no proof of work.
        let mut previous = Hash256::zero();
        for height in 0..4_u32 {
            let header = types::Header {
                version: 4,
                previous_block_hash: previous,
                merkle_root: Hash256::zero(),
                timestamp: 1_700_000_000 + height * 4800,
                bits: config.proof_of_work_limit,
                nonce: 0,
            };
            let block = Arc::new(types::Block::new(header, vec![]));
            previous = block.hash();
            fast_chain.push(block).expect("header links to the tip");
        }

        let populator = ChainStatePopulator::new(config, fast_chain);

        // The actual timespan clamps to four times the target, and the
        // retargeted value clamps back down to the proof limit.
        let bits = populator
            .work_required(None, 4)
            .expect("window is readable");
        assert_eq!(bits, 0x207f_ffff);
    }

    #[test]
    fn promotes_the_cached_pool_state() {
        let populator = populator_with_chain(4);

        let first = populator.populate(None).expect("chain is populated");
        populator.fast_chain.set_pool_state(first.clone());

        let second = populator.populate(None).expect("chain is populated");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
