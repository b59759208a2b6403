//! The proof-of-work-sealed ballot ledger.
//!
//! A vote is recorded by nullifier, never by voter identity. Each block is
//! linked to its predecessor by hash and mined to a fixed difficulty, so
//! tampering with any historical block is detectable by [`Ledger::verify_chain`].

mod block;
mod chain;

pub use block::{Block, VoteRecord, DIFFICULTY};
pub use chain::{CastReceipt, Error, Ledger, Result, Stats, VerifyReport};
