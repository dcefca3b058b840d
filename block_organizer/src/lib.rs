//! The block organizer: the write path from candidate block arrival to
//! committed chain state.
//!
//! This crate handles the following concerns:
//! - Sequencing the three validation phases under a single writer lock
//!   ([`Organizer`]).
//! - Driving consensus checks with prevout population ([`validate`]).
//! - Assembling chain state snapshots ([`chain_state`]).
//! - Reading and atomically rewriting the confirmed store ([`fast_chain`]).
//! - Parallel script verification on a dedicated priority pool
//!   ([`thread_pool`]).
//! - Notifying other components about committed reorganizations
//!   ([`subscriber`]).
//!
//! The organizer never defines consensus rules for scripts; it drives a
//! [`ScriptVerifier`] supplied by the host.

pub use crate::{
    chain_state::ChainStatePopulator,
    error::Error,
    fast_chain::{FastChain, OutputRecord},
    organizer::Organizer,
    script::{NullScriptVerifier, ScriptVerifier},
    settings::Settings,
    subscriber::{ReorganizeEvent, ReorganizeSubscriber},
    thread_pool::ThreadPool,
    validate::Validator,
};

mod chain_state;
mod error;
mod fast_chain;
mod organizer;
mod script;
mod settings;
mod subscriber;
mod thread_pool;
mod validate;

#[cfg(test)]
mod helpers;
