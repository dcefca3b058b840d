use serde::{Deserialize, Serialize};

use crate::{
    hashing::{compact_size_len, sha256d, write_compact_size},
    primitives::{Hash256, Height},
    script::sigop_count,
};

/// A reference to a transaction output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    /// The previous output of a coinbase input.
    #[must_use]
    pub fn null() -> Self {
        Self {
            hash: Hash256::zero(),
            index: u32::MAX,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash.is_zero()
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A spendable output resolved during prevout population, together with the
/// confirmation metadata value and maturity checks need.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Utxo {
    pub output: TxOut,
    pub height: Height,
    pub coinbase: bool,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// The double-SHA-256 of the wire serialization.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        sha256d(self.to_bytes())
    }

    /// A transaction is a coinbase when its only input spends the null
    /// outpoint. Position within a block is checked separately.
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    #[must_use]
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0_u64, |sum, output| sum.checked_add(output.value))
    }

    /// Legacy signature operations over all scripts of the transaction.
    #[must_use]
    pub fn legacy_sigops(&self) -> usize {
        let inputs = self
            .inputs
            .iter()
            .map(|input| sigop_count(&input.script_sig, false));

        let outputs = self
            .outputs
            .iter()
            .map(|output| sigop_count(&output.script_pubkey, false));

        inputs.chain(outputs).sum()
    }

    #[must_use]
    pub fn serialized_size(&self) -> usize {
        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                36 + compact_size_len(input.script_sig.len() as u64) + input.script_sig.len() + 4
            })
            .sum::<usize>();

        let outputs = self
            .outputs
            .iter()
            .map(|output| {
                8 + compact_size_len(output.script_pubkey.len() as u64)
                    + output.script_pubkey.len()
            })
            .sum::<usize>();

        4 + compact_size_len(self.inputs.len() as u64)
            + inputs
            + compact_size_len(self.outputs.len() as u64)
            + outputs
            + 4
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&self.version.to_le_bytes());

        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.previous_output.hash.as_bytes());
            out.extend_from_slice(&input.previous_output.index.to_le_bytes());
            write_compact_size(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_compact_size(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coinbase() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: vec![1, 0],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 50,
                script_pubkey: vec![0xac],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn recognizes_coinbase_inputs() {
        assert!(coinbase().is_coinbase());

        let mut spend = coinbase();
        spend.inputs[0].previous_output = OutPoint {
            hash: Hash256::repeat_byte(1),
            index: 0,
        };
        assert!(!spend.is_coinbase());
    }

    #[test]
    fn serialized_size_matches_serialization() {
        let transaction = coinbase();
        assert_eq!(transaction.serialized_size(), transaction.to_bytes().len());
    }

    #[test]
    fn output_sums_detect_overflow() {
        let mut transaction = coinbase();
        transaction.outputs.push(TxOut {
            value: u64::MAX,
            script_pubkey: vec![],
        });
        assert_eq!(transaction.total_output_value(), None);
    }
}
