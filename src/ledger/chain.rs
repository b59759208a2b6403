//! The hash-chained ballot ledger: a mutex-guarded append log with a
//! proof-of-work seal, persisted to a single JSON file.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::config::CANDIDATES;
use crate::crypto;
use crate::ledger::block::{Block, VoteRecord};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0:?} is not on the ballot")]
    InvalidChoice(String),
    #[error("signature fails verification against the issuer's public key")]
    InvalidCredential,
    #[error("this token has already cast a vote")]
    DoubleVote,
    #[error("failed to persist the ledger: {0}")]
    PersistenceFailure(io::Error),
    #[error("chain hashes do not link: {0}")]
    CorruptChain(String),
}
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a successfully recorded vote.
#[derive(Debug, Clone, Serialize)]
pub struct CastReceipt {
    pub tx_hash: String,
    pub block_index: u64,
}

/// Chain integrity report, as returned by [`Ledger::verify_chain`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub block_count: u64,
    pub message: String,
}

/// Aggregate counts, as returned by [`Ledger::get_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub block_count: u64,
    pub total_votes: u64,
    pub spent_tokens: u64,
    pub candidates: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct PersistedChain {
    chain: Vec<Block>,
    spent_tokens: Vec<String>,
}

struct ChainState {
    chain: Vec<Block>,
    spent_tokens: HashSet<String>,
}

/// The full ledger: in-memory chain state behind a single mutex, backed by
/// a JSON file at `path`. Every mutating call holds the mutex for the
/// entire validate-append-persist sequence, so there is never a window
/// where a spent token is recorded without its block, or vice versa.
pub struct Ledger {
    path: PathBuf,
    state: Mutex<ChainState>,
}

impl Ledger {
    /// Load an existing chain from `path`, or initialize a fresh one with
    /// a mined genesis block if the file is absent, unparseable, or fails
    /// validation. Only a genuine I/O failure is propagated as an error;
    /// a malformed or corrupt chain file is treated the same as a failed
    /// integrity check: log a warning and reinitialize from genesis.
    pub fn open(path: &Path) -> Result<Self> {
        let state = match Self::load(path) {
            Ok(Some(state)) if Self::chain_is_valid(&state.chain) => state,
            Ok(Some(_)) => {
                log::warn!("loaded chain failed integrity check, reinitializing");
                Self::fresh_state()
            }
            Ok(None) => Self::fresh_state(),
            Err(Error::CorruptChain(reason)) => {
                log::warn!("could not parse persisted chain ({reason}), reinitializing");
                Self::fresh_state()
            }
            Err(other) => return Err(other),
        };

        let ledger = Ledger {
            path: path.to_path_buf(),
            state: Mutex::new(state),
        };
        ledger.persist_locked(&ledger.state.lock().unwrap())?;
        Ok(ledger)
    }

    fn fresh_state() -> ChainState {
        let genesis = Block::genesis(chrono::Utc::now().to_rfc3339());
        ChainState {
            chain: vec![genesis],
            spent_tokens: HashSet::new(),
        }
    }

    fn load(path: &Path) -> Result<Option<ChainState>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(Error::PersistenceFailure)?;
        let persisted: PersistedChain =
            serde_json::from_str(&raw).map_err(|e| Error::CorruptChain(e.to_string()))?;
        Ok(Some(ChainState {
            chain: persisted.chain,
            spent_tokens: persisted.spent_tokens.into_iter().collect(),
        }))
    }

    /// Recompute every block's hash from its stored fields and check the
    /// `previous_hash` links. Does not re-check proof-of-work difficulty
    /// on historical blocks (only newly mined blocks must satisfy it).
    fn chain_is_valid(chain: &[Block]) -> bool {
        if chain.is_empty() {
            return false;
        }
        if chain[0].hash != chain[0].compute_hash() {
            return false;
        }
        for window in chain.windows(2) {
            let (previous, current) = (&window[0], &window[1]);
            if current.hash != current.compute_hash() {
                return false;
            }
            if current.previous_hash != previous.hash {
                return false;
            }
        }
        true
    }

    /// Write-temp-then-rename so a crash mid-write never leaves a
    /// half-written ledger file in place of a good one.
    fn persist_locked(&self, state: &ChainState) -> Result<()> {
        fs::create_dir_all(self.path.parent().unwrap_or_else(|| Path::new(".")))
            .map_err(Error::PersistenceFailure)?;
        let persisted = PersistedChain {
            chain: state.chain.clone(),
            spent_tokens: state.spent_tokens.iter().cloned().collect(),
        };
        let body = serde_json::to_string_pretty(&persisted).expect("ledger serializes");

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, body).map_err(Error::PersistenceFailure)?;
        fs::rename(&tmp_path, &self.path).map_err(Error::PersistenceFailure)?;
        Ok(())
    }

    /// Record one vote: check the choice is on the ballot, verify the
    /// credential against the issuer's public key, reject an
    /// already-spent nullifier, mine a new block holding exactly this
    /// vote, append it, and persist before returning.
    ///
    /// The whole sequence runs under one lock acquisition, so the
    /// spent-set check and the append are a single atomic step; splitting
    /// them would let two concurrent calls both observe an unspent token.
    /// If persistence fails after the in-memory append, the append is
    /// rolled back so memory never runs ahead of disk.
    pub fn cast_vote(
        &self,
        token: &[u8],
        signature: &BigUint,
        choice: &str,
        issuer_pub: &RsaPublicKey,
    ) -> Result<CastReceipt> {
        if !CANDIDATES.contains(&choice) {
            return Err(Error::InvalidChoice(choice.to_string()));
        }

        if !crypto::verify(token, signature, issuer_pub) {
            return Err(Error::InvalidCredential);
        }

        let nullifier = crypto::nullifier(token);

        let mut state = self.state.lock().unwrap();

        if state.spent_tokens.contains(&nullifier) {
            return Err(Error::DoubleVote);
        }

        let signature_excerpt: String = crypto::int_to_b64(signature).chars().take(64).collect();
        let vote = VoteRecord {
            token_hash: nullifier.clone(),
            candidate: choice.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            signature: signature_excerpt,
        };

        let previous_hash = state.chain.last().expect("chain always has genesis").hash.clone();
        let index = state.chain.len() as u64;
        let block = Block::new(index, chrono::Utc::now().to_rfc3339(), vec![vote], previous_hash);

        let receipt = CastReceipt {
            tx_hash: block.hash.clone(),
            block_index: block.index,
        };

        state.spent_tokens.insert(nullifier.clone());
        state.chain.push(block);

        if let Err(err) = self.persist_locked(&state) {
            // Disk write failed: roll the in-memory append back so the
            // invariant "disk equals memory after any successful return"
            // is never violated by a failed one.
            state.chain.pop();
            state.spent_tokens.remove(&nullifier);
            return Err(err);
        }

        log::info!("vote recorded in block {}", receipt.block_index);
        Ok(receipt)
    }

    pub fn is_token_spent(&self, token_hash: &str) -> bool {
        self.state.lock().unwrap().spent_tokens.contains(token_hash)
    }

    /// Count votes per candidate across every block but genesis.
    pub fn get_tallies(&self) -> HashMap<String, u64> {
        let state = self.state.lock().unwrap();
        let mut tallies: HashMap<String, u64> =
            CANDIDATES.iter().map(|c| (c.to_string(), 0)).collect();
        for block in state.chain.iter().skip(1) {
            for vote in &block.votes {
                if let Some(count) = tallies.get_mut(&vote.candidate) {
                    *count += 1;
                }
            }
        }
        tallies
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.state.lock().unwrap().chain.clone()
    }

    pub fn get_block(&self, index: u64) -> Option<Block> {
        self.state
            .lock()
            .unwrap()
            .chain
            .get(index as usize)
            .cloned()
    }

    pub fn get_stats(&self) -> Stats {
        let state = self.state.lock().unwrap();
        let total_votes = state.chain.iter().skip(1).map(|b| b.votes.len() as u64).sum();
        Stats {
            block_count: state.chain.len() as u64,
            total_votes,
            spent_tokens: state.spent_tokens.len() as u64,
            candidates: CANDIDATES.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Public audit entry point: walk the whole chain and report whether
    /// every hash and link still checks out. Does not re-verify
    /// proof-of-work difficulty, only hash and link consistency.
    pub fn verify_chain(&self) -> VerifyReport {
        let state = self.state.lock().unwrap();
        let valid = Self::chain_is_valid(&state.chain);
        VerifyReport {
            valid,
            block_count: state.chain.len() as u64,
            message: if valid {
                "chain integrity verified".to_string()
            } else {
                "chain integrity FAILED".to_string()
            },
        }
    }
}
