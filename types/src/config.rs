use educe::Educe;
use serde::{Deserialize, Serialize};

use crate::primitives::Height;

/// Consensus parameters. Fork activations are by height; see the chain state
/// populator for how they turn into per-height flags.
#[derive(Clone, PartialEq, Eq, Debug, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Blocks per difficulty retarget.
    #[educe(Default = 2016)]
    pub retargeting_interval: u32,
    /// Seconds the retargeting interval is expected to span.
    #[educe(Default = 1_209_600)]
    pub target_timespan_seconds: u32,
    /// Seconds between blocks the retarget aims for.
    #[educe(Default = 600)]
    pub block_spacing_seconds: u32,
    /// The easiest compact target a header may carry.
    #[educe(Default = 0x1d00_ffff)]
    pub proof_of_work_limit: u32,
    /// Blocks between subsidy halvings.
    #[educe(Default = 210_000)]
    pub subsidy_interval: u32,
    /// 50 coins, in satoshis.
    #[educe(Default = 5_000_000_000)]
    pub initial_subsidy: u64,
    /// Confirmations before a coinbase output may be spent.
    #[educe(Default = 100)]
    pub coinbase_maturity: u32,
    #[educe(Default = 1_000_000)]
    pub max_block_size: usize,
    #[educe(Default = 20_000)]
    pub max_block_sigops: usize,
    /// 21 million coins, in satoshis.
    #[educe(Default = 2_100_000_000_000_000)]
    pub max_money: u64,

    #[educe(Default = 173_805u32)]
    pub bip16_height: Height,
    #[educe(Default = 0u32)]
    pub bip30_height: Height,
    #[educe(Default = 227_931u32)]
    pub bip34_height: Height,
    #[educe(Default = 388_381u32)]
    pub bip65_height: Height,
    #[educe(Default = 363_725u32)]
    pub bip66_height: Height,
}

impl ChainConfig {
    #[must_use]
    pub fn mainnet() -> Self {
        Self::default()
    }

    /// Permissive parameters for tests and local mining: an easy proof
    /// limit, no retargeting, and every fork active from the start.
    #[must_use]
    pub fn regtest() -> Self {
        Self {
            retargeting_interval: u32::MAX,
            proof_of_work_limit: 0x207f_ffff,
            bip16_height: 0,
            bip34_height: 0,
            bip65_height: 0,
            bip66_height: 0,
            ..Self::default()
        }
    }

    /// The coinbase reward at a height, before fees.
    #[must_use]
    pub fn block_subsidy(&self, height: Height) -> u64 {
        let halvings = height / self.subsidy_interval;

        if halvings >= 64 {
            return 0;
        }

        self.initial_subsidy >> halvings
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use crate::primitives::COIN;

    use super::*;

    #[test_case(0 => 50 * COIN)]
    #[test_case(209_999 => 50 * COIN)]
    #[test_case(210_000 => 25 * COIN)]
    #[test_case(420_000 => 1_250_000_000)]
    #[test_case(64 * 210_000 => 0; "sixty fourth halving")]
    fn halves_the_subsidy(height: Height) -> u64 {
        ChainConfig::mainnet().block_subsidy(height)
    }

    #[test]
    fn deserializes_partial_settings() {
        let config: ChainConfig =
            serde_json::from_str(r#"{"coinbase_maturity": 10}"#).expect("valid configuration");
        assert_eq!(config.coinbase_maturity, 10);
        assert_eq!(config.retargeting_interval, 2016);
    }
}
