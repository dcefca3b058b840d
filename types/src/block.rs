use std::{sync::Arc, time::Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    chain_state::ChainState,
    compact::{proof, target_from_compact},
    error::ValidationError,
    hashing::{compact_size_len, sha256d, write_compact_size},
    merkle::merkle_root,
    primitives::{Hash256, Height, Work, U256},
    transaction::{Transaction, Utxo},
};

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub previous_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        sha256d(self.to_bytes())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.previous_block_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Whether the header hash satisfies its own compact target.
    /// The target must also expand to a valid encoding.
    #[must_use]
    pub fn is_valid_proof_of_work(&self, proof_limit: u32) -> bool {
        let Some(target) = target_from_compact(self.bits) else {
            return false;
        };

        let Some(limit) = target_from_compact(proof_limit) else {
            return false;
        };

        if target > limit {
            return false;
        }

        U256::from_little_endian(self.hash().as_bytes()) <= target
    }

    /// The work this header proves.
    #[must_use]
    pub fn proof(&self) -> Work {
        proof(self.bits)
    }
}

/// The validation annotation of a candidate block.
///
/// Written only inside the organizer's critical section; carries results
/// between phases and survives into the pool so re-admitted and side-chain
/// blocks keep their resolved height and chain state.
#[derive(Default, Debug)]
pub struct BlockValidation {
    pub height: Option<Height>,
    pub result: Option<Result<(), ValidationError>>,
    pub start_notify: Option<Instant>,
    pub state: Option<Arc<ChainState>>,
    /// Populated prevouts, one list per transaction, in block order. Filled
    /// by the accept phase, consumed by the connect phase. The coinbase
    /// contributes an empty list.
    pub prevouts: Vec<Vec<Utxo>>,
}

#[derive(Debug)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub validation: Mutex<BlockValidation>,
}

impl Block {
    #[must_use]
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            validation: Mutex::default(),
        }
    }

    #[must_use]
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    #[must_use]
    pub fn compute_merkle_root(&self) -> Hash256 {
        merkle_root(
            self.transactions
                .iter()
                .map(Transaction::hash)
                .collect(),
        )
    }

    #[must_use]
    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + compact_size_len(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(Transaction::serialized_size)
                .sum::<usize>()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&self.header.to_bytes());
        write_compact_size(&mut out, self.transactions.len() as u64);
        for transaction in &self.transactions {
            out.append(&mut transaction.to_bytes());
        }
        out
    }

    /// The height recorded by validation, if any phase has run.
    #[must_use]
    pub fn validation_height(&self) -> Option<Height> {
        self.validation.lock().height
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use crate::transaction::{OutPoint, TxIn, TxOut};

    use super::*;

    fn genesis_like_header() -> Header {
        Header {
            version: 1,
            previous_block_hash: Hash256::zero(),
            merkle_root: Hash256::from_slice(&hex!(
                "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a"
            )),
            timestamp: 1_231_006_505,
            bits: 0x1d00_ffff,
            nonce: 2_083_236_893,
        }
    }

    #[test]
    fn hashes_the_mainnet_genesis_header() {
        // Stored digest order; the conventional display reverses the bytes.
        assert_eq!(
            genesis_like_header().hash().as_bytes(),
            hex!("6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000"),
        );
    }

    #[test]
    fn genesis_header_satisfies_its_target() {
        assert!(genesis_like_header().is_valid_proof_of_work(0x1d00_ffff));
    }

    #[test]
    fn rejects_a_target_above_the_limit() {
        let mut header = genesis_like_header();
        header.bits = 0x207f_ffff;
        assert!(!header.is_valid_proof_of_work(0x1d00_ffff));
    }

    #[test]
    fn merkle_root_of_single_transaction_is_its_hash() {
        let transaction = Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: vec![1, 0],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut {
                value: 50,
                script_pubkey: vec![],
            }],
            lock_time: 0,
        };

        let block = Block::new(genesis_like_header(), vec![transaction]);
        assert_eq!(block.compute_merkle_root(), block.transactions[0].hash());
    }
}
