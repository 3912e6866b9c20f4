//! Block header+body and the canonical hashing rule.
//!
//! A block's `hash` is never trusted as given by a peer without being
//! recomputed: `is_valid_proof` always re-derives it from the body fields
//! before accepting the stored value.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::transaction::Transaction;

pub const DIFFICULTY: &str = "000";

/// The chain's fixed starting point. Every implementation that speaks this
/// wire protocol must produce the exact same genesis block; it is not
/// computed at startup, it is this literal.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
pub const GENESIS_HASH: &str =
    "816534932c2b7154836da6afc367695e6337db8a921823784c14378abed4f7d7";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub timestamp: f64,
    pub hash: String,
}

impl Block {
    /// Construct a block with the hash left blank; callers are expected to
    /// assign `hash` themselves (the miner, the genesis constant) rather
    /// than have construction silently hash on their behalf.
    pub fn new(
        index: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
        nonce: u64,
        timestamp: f64,
    ) -> Block {
        Block {
            index,
            previous_hash: previous_hash.into(),
            transactions,
            nonce,
            timestamp,
            hash: String::new(),
        }
    }

    /// The fixed genesis block. No hashing is performed here: `hash` is the
    /// published constant, matched byte-for-byte by every conforming peer.
    pub fn genesis() -> Block {
        Block {
            index: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            transactions: Vec::new(),
            nonce: 0,
            timestamp: 0.0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    /// SHA-256 over the canonical JSON encoding of the body fields (every
    /// field except `hash`), keys recursively sorted. `serde_json::Value`'s
    /// object representation is a `BTreeMap`, so serializing through `Value`
    /// rather than directly via `#[derive(Serialize)]` gives us sorted keys
    /// without hand-rolling a canonicalizer.
    pub fn compute_hash(&self) -> String {
        let body = BlockBody {
            index: self.index,
            previous_hash: &self.previous_hash,
            transactions: &self.transactions,
            nonce: self.nonce,
            timestamp: self.timestamp,
        };
        let value =
            serde_json::to_value(&body).expect("block body is always representable as JSON");
        let canonical =
            serde_json::to_string(&value).expect("serde_json::Value always serializes");

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        data_encoding::HEXLOWER.encode(&hasher.finalize())
    }

    /// True if `hash` both carries the required difficulty prefix and
    /// matches a fresh recomputation from the body fields. Never trusts the
    /// stored `hash` alone.
    pub fn is_valid_proof(&self, difficulty: &str) -> bool {
        self.hash.starts_with(difficulty) && self.hash == self.compute_hash()
    }

    /// Whether this block links onto `parent` per the chain invariants
    /// (index succession and hash linkage). Does not check proof-of-work.
    pub fn links_onto(&self, parent: &Block) -> bool {
        self.index == parent.index + 1 && self.previous_hash == parent.hash
    }
}

#[derive(Serialize)]
struct BlockBody<'a> {
    index: u64,
    previous_hash: &'a str,
    transactions: &'a [Transaction],
    nonce: u64,
    timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_matches_published_constant() {
        let g = Block::genesis();
        assert_eq!(g.index, 0);
        assert_eq!(g.previous_hash, "0".repeat(64));
        assert!(g.transactions.is_empty());
        assert_eq!(g.nonce, 0);
        assert_eq!(g.hash, GENESIS_HASH);
    }

    #[test]
    fn compute_hash_is_deterministic() {
        let tx = Transaction::with_id("t1", "a", "b", 1.0, 1.0);
        let b = Block::new(1, "0".repeat(64), vec![tx], 42, 100.0);
        assert_eq!(b.compute_hash(), b.compute_hash());
    }

    #[test]
    fn compute_hash_changes_with_nonce() {
        let b1 = Block::new(1, "0".repeat(64), vec![], 1, 100.0);
        let b2 = Block::new(1, "0".repeat(64), vec![], 2, 100.0);
        assert_ne!(b1.compute_hash(), b2.compute_hash());
    }

    #[test]
    fn is_valid_proof_rejects_tampered_hash() {
        let mut b = Block::new(1, "0".repeat(64), vec![], 1, 100.0);
        b.hash = "000deadbeef".to_string();
        assert!(!b.is_valid_proof(DIFFICULTY));
    }

    #[test]
    fn is_valid_proof_requires_fresh_recomputation() {
        let mut b = Block::new(1, "0".repeat(64), vec![], 0, 100.0);
        b.hash = b.compute_hash();
        if !b.hash.starts_with(DIFFICULTY) {
            assert!(!b.is_valid_proof(DIFFICULTY));
        } else {
            assert!(b.is_valid_proof(DIFFICULTY));
        }
    }

    #[test]
    fn links_onto_checks_index_and_previous_hash() {
        let parent = Block::genesis();
        let mut child = Block::new(1, parent.hash.clone(), vec![], 0, 1.0);
        child.hash = child.compute_hash();
        assert!(child.links_onto(&parent));

        let mut bad_index = Block::new(2, parent.hash.clone(), vec![], 0, 1.0);
        bad_index.hash = bad_index.compute_hash();
        assert!(!bad_index.links_onto(&parent));

        let mut bad_link = Block::new(1, "f".repeat(64), vec![], 0, 1.0);
        bad_link.hash = bad_link.compute_hash();
        assert!(!bad_link.links_onto(&parent));
    }
}
