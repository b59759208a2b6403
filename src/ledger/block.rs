//! Block and vote-record types, and the canonical hash they're sealed with.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// One cast vote: a nullifier (never a voter identity), the chosen
/// candidate, when it landed, and the signature that authorized it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub token_hash: String,
    pub candidate: String,
    pub timestamp: String,
    pub signature: String,
}

/// A single mined block. Always holds exactly one [`VoteRecord`], except
/// the genesis block, which holds none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub votes: Vec<VoteRecord>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

/// Leading hex zeros a block's hash must carry to count as mined.
pub const DIFFICULTY: usize = 2;

impl Block {
    /// Construct an unmined block (`nonce = 0`, `hash` computed over that
    /// nonce) and immediately mine it. Every block that ever lands in the
    /// chain, including genesis, goes through this path.
    pub fn new(index: u64, timestamp: String, votes: Vec<VoteRecord>, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp,
            votes,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block.mine();
        block
    }

    /// The genesis block: index 0, no votes, previous_hash all zeros.
    /// Mined the same as any other block.
    pub fn genesis(timestamp: String) -> Self {
        Self::new(0, timestamp, Vec::new(), "0".repeat(64))
    }

    /// SHA-256 over the block's canonical JSON form (lexicographically
    /// key-sorted, no `hash` field: the hash covers everything that
    /// precedes it, never itself).
    pub fn compute_hash(&self) -> String {
        let canonical = self.canonical_json();
        let bytes = serde_json::to_vec(&canonical).expect("canonical JSON never fails to serialize");
        hex::encode(Sha256::digest(&bytes))
    }

    fn canonical_json(&self) -> Value {
        let votes: Vec<Value> = self
            .votes
            .iter()
            .map(|v| {
                let mut map = Map::new();
                map.insert("token_hash".to_string(), json!(v.token_hash));
                map.insert("candidate".to_string(), json!(v.candidate));
                map.insert("timestamp".to_string(), json!(v.timestamp));
                map.insert("signature".to_string(), json!(v.signature));
                Value::Object(map)
            })
            .collect();

        let mut map = Map::new();
        map.insert("index".to_string(), json!(self.index));
        map.insert("timestamp".to_string(), json!(self.timestamp));
        map.insert("votes".to_string(), Value::Array(votes));
        map.insert("previous_hash".to_string(), json!(self.previous_hash));
        map.insert("nonce".to_string(), json!(self.nonce));
        // `serde_json::Map` defaults to a BTreeMap backing (no
        // `preserve_order` feature enabled), so iterating it always
        // yields lexicographic key order regardless of insertion order.
        Value::Object(map)
    }

    /// Increment `nonce` and recompute `hash` until it carries
    /// [`DIFFICULTY`] leading hex zeros.
    fn mine(&mut self) {
        let prefix = "0".repeat(DIFFICULTY);
        while !self.hash.starts_with(&prefix) {
            self.nonce += 1;
            self.hash = self.compute_hash();
        }
    }

    /// Re-derive the hash from this block's fields and compare against the
    /// stored one. A block that fails this has been tampered with, or was
    /// never mined in the first place.
    pub fn hash_is_valid(&self) -> bool {
        self.hash == self.compute_hash() && self.hash.starts_with(&"0".repeat(DIFFICULTY))
    }
}
