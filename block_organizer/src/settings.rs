use educe::Educe;
use serde::{Deserialize, Serialize};
use types::Height;

#[derive(Clone, Debug, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// The depth of the side-chain pool, measured in height span below the
    /// confirmed tip. Matches the coinbase maturity depth: a reorganization
    /// deeper than this would unwind spent subsidies.
    #[educe(Default = 100u32)]
    pub reorganization_limit: Height,
    /// Priority pool workers. Zero means one worker per hardware thread.
    #[educe(Default = 0)]
    pub cores: usize,
    /// Whether the validation workers are dedicated rather than shared.
    /// Accepted for configuration compatibility; the pool is always
    /// dedicated here and the OS scheduling class is left alone.
    #[educe(Default = true)]
    pub priority: bool,
    /// Passed through to the validator; gates relay bookkeeping for
    /// transactions confirmed by pooled blocks.
    #[educe(Default = true)]
    pub relay_transactions: bool,
    /// Force data to stable storage at the end of each write bracket.
    #[educe(Default = false)]
    pub flush_writes: bool,
    /// Apply the duplicate-hash check above the branch's fork point instead
    /// of against the whole store. The historical rule checks the whole
    /// store, which rejects candidates on hash collisions outside their own
    /// chain; enabling this applies the corrected rule.
    #[educe(Default = false)]
    pub fork_point_duplicate_check: bool,
}

impl Settings {
    /// The worker count the priority pool should start.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.cores == 0 {
            num_cpus::get()
        } else {
            self.cores
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_coinbase_maturity() {
        let settings = Settings::default();
        assert_eq!(settings.reorganization_limit, 100);
        assert!(!settings.fork_point_duplicate_check);
    }

    #[test]
    fn zero_cores_means_all_hardware_threads() {
        let settings = Settings {
            cores: 0,
            ..Settings::default()
        };
        assert!(settings.worker_count() >= 1);

        let settings = Settings {
            cores: 3,
            ..Settings::default()
        };
        assert_eq!(settings.worker_count(), 3);
    }
}
