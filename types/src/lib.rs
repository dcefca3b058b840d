//! Chain primitives shared by the block organizer.
//!
//! This crate holds the containers and consensus arithmetic that every other
//! crate in the workspace depends on:
//! - [Hashes and 256-bit work](`primitives`).
//! - [Compact difficulty encoding](`compact`).
//! - [Double-SHA-256 and merkle roots](`hashing`).
//! - [Headers, transactions and candidate blocks](`block`).
//! - [Chain state snapshots](`chain_state`).
//! - [Consensus parameters](`config`).
//!
//! It must never depend on the database or on the organizer itself.

pub use crate::{
    block::{Block, BlockValidation, Header},
    chain_state::{ChainState, ForkFlags},
    compact::{compact_from_target, proof, target_from_compact},
    config::ChainConfig,
    error::ValidationError,
    hashing::sha256d,
    merkle::merkle_root,
    primitives::{Hash256, Height, Work},
    script::{embedded_script, is_pay_to_script_hash, script_number, sigop_count},
    transaction::{OutPoint, Transaction, TxIn, TxOut, Utxo},
};

pub mod block;
pub mod chain_state;
pub mod compact;
pub mod config;
pub mod error;
pub mod hashing;
pub mod merkle;
pub mod primitives;
pub mod script;
pub mod transaction;
