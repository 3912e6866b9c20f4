//! Chain + mempool state and its validation rules.
//!
//! `Blockchain` itself holds no lock: the Node wraps an instance in a single
//! `std::sync::Mutex` and holds it only across the synchronous calls below,
//! never across an `.await` point.

use std::collections::HashMap;

use super::block::{Block, DIFFICULTY};
use super::transaction::{COINBASE_SOURCE, Transaction};

#[derive(Debug)]
pub struct Blockchain {
    chain: Vec<Block>,
    mempool: HashMap<String, Transaction>,
}

impl Blockchain {
    /// Appends the fixed genesis block. No hashing is performed; the hash
    /// is the published constant.
    pub fn new() -> Blockchain {
        Blockchain {
            chain: vec![Block::genesis()],
            mempool: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn last_block(&self) -> &Block {
        self.chain.last().expect("chain always has at least genesis")
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Snapshot of currently pending transactions, value-descending (the
    /// order the miner would consume them in), for `RESPONSE_CHAIN`.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.mempool.values().cloned().collect();
        txs.sort_by(|a, b| b.valor.partial_cmp(&a.valor).unwrap_or(std::cmp::Ordering::Equal));
        txs
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    /// Rejects a duplicate id or a non-positive value; otherwise inserts.
    /// Idempotent: a second call with the same id is a no-op that returns
    /// `false`.
    pub fn add_transaction(&mut self, tx: Transaction) -> bool {
        if tx.valor <= 0.0 || self.mempool.contains_key(&tx.id) {
            return false;
        }
        self.mempool.insert(tx.id.clone(), tx);
        true
    }

    /// Accepts `block` only if it extends the tip at the right index, links
    /// onto the tip's hash, and carries a valid, freshly-recomputed proof of
    /// work. On acceptance, every mempool transaction absorbed by the block
    /// is removed.
    pub fn add_block(&mut self, block: Block) -> bool {
        let tip = self.last_block();
        if block.index != self.chain.len() as u64 {
            return false;
        }
        if block.previous_hash != tip.hash {
            return false;
        }
        if !block.is_valid_proof(DIFFICULTY) {
            return false;
        }

        for tx in &block.transactions {
            self.mempool.remove(&tx.id);
        }
        self.chain.push(block);
        true
    }

    /// Validates a foreign chain: the first block must be byte-identical to
    /// the local genesis; every subsequent block must satisfy the link and
    /// proof invariants against its predecessor.
    pub fn is_chain_valid(&self, chain: &[Block]) -> bool {
        let genesis = Block::genesis();
        match chain.first() {
            Some(first) if *first == genesis => {}
            _ => return false,
        }
        for pair in chain.windows(2) {
            let (parent, child) = (&pair[0], &pair[1]);
            if !child.links_onto(parent) || !child.is_valid_proof(DIFFICULTY) {
                return false;
            }
        }
        true
    }

    /// Adopts `new_chain` if strictly longer than the current chain and
    /// valid. Mempool transactions already present in the new chain are
    /// dropped; the rest remain pending.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> bool {
        if new_chain.len() <= self.chain.len() || !self.is_chain_valid(&new_chain) {
            return false;
        }
        for block in &new_chain {
            for tx in &block.transactions {
                self.mempool.remove(&tx.id);
            }
        }
        self.chain = new_chain;
        true
    }

    /// `Σ incoming − Σ outgoing` across all accepted blocks. The mempool is
    /// ignored; `"coinbase"` is a synthetic source and is never debited.
    pub fn get_balance(&self, address: &str) -> f64 {
        let mut balance = 0.0;
        for block in &self.chain {
            for tx in &block.transactions {
                if tx.destino == address {
                    balance += tx.valor;
                }
                if tx.origem == address && tx.origem != COINBASE_SOURCE {
                    balance -= tx.valor;
                }
            }
        }
        balance
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Blockchain::new()
    }
}
