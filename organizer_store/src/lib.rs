//! The in-memory side of the block organizer: branches of candidate blocks
//! and the side-chain block pool.
//!
//! This crate holds pure data structures. It must never depend on the
//! database or perform I/O; resolving a branch's fork point against the
//! confirmed chain is the organizer's job.

pub use crate::{
    block_pool::BlockPool,
    branch::{Branch, ForkPoint},
};

mod block_pool;
mod branch;
