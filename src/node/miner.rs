//! Parallel proof-of-work search with cooperative cancellation.
//!
//! Workers are OS threads, not tokio tasks: the hot loop is CPU-bound and
//! must never yield to the async executor. `mine` is driven from async
//! context via `tokio::task::spawn_blocking`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::domain::{Block, DIFFICULTY, Transaction};

const WORKERS: u64 = 4;

pub enum MineOutcome {
    Found(Block),
    Cancelled,
}

/// Searches for a nonce such that `{index, previous_hash, transactions,
/// nonce, timestamp}` hashes to something starting with `"000"`. `N = 4`
/// worker threads test an interleaved sequence of nonces (`i, i+N, i+2N,
/// ...`); the first to find a valid pair wins, writes it to the shared
/// result slot, and flips `cancel` so the others notice on their next
/// iteration and exit. `cancel` may also be set from outside — e.g. the
/// Node, on a competing block arriving from the network — in which case
/// `mine` returns `MineOutcome::Cancelled` with no block produced.
pub fn mine(
    index: u64,
    previous_hash: String,
    transactions: Vec<Transaction>,
    timestamp: f64,
    cancel: Arc<AtomicBool>,
) -> MineOutcome {
    let winner: Arc<std::sync::Mutex<Option<(u64, String)>>> =
        Arc::new(std::sync::Mutex::new(None));
    let found = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        for worker in 0..WORKERS {
            let cancel = Arc::clone(&cancel);
            let found = Arc::clone(&found);
            let winner = Arc::clone(&winner);
            let previous_hash = previous_hash.clone();
            let transactions = &transactions;
            scope.spawn(move || {
                let mut nonce = worker;
                loop {
                    if cancel.load(Ordering::Relaxed) || found.load(Ordering::Relaxed) {
                        return;
                    }
                    let candidate = Block::new(
                        index,
                        previous_hash.clone(),
                        transactions.clone(),
                        nonce,
                        timestamp,
                    );
                    let hash = candidate.compute_hash();
                    if hash.starts_with(DIFFICULTY) {
                        let mut slot = winner.lock().expect("winner mutex poisoned");
                        if slot.is_none() {
                            *slot = Some((nonce, hash));
                            found.store(true, Ordering::Relaxed);
                            cancel.store(true, Ordering::Relaxed);
                        }
                        return;
                    }
                    nonce += WORKERS;
                }
            });
        }
    });

    if !found.load(Ordering::Relaxed) {
        return MineOutcome::Cancelled;
    }

    let (nonce, hash) = winner
        .lock()
        .expect("winner mutex poisoned")
        .take()
        .expect("found implies winner is set");
    let mut block = Block::new(index, previous_hash, transactions, nonce, timestamp);
    block.hash = hash;
    MineOutcome::Found(block)
}

/// A fresh, unset cancellation flag, shared between the miner and whatever
/// else (the Node, on an accepted competing block) may stop it.
pub fn new_cancel_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transaction;

    #[test]
    fn mines_a_block_satisfying_the_difficulty_prefix() {
        let cancel = new_cancel_flag();
        let outcome = mine(
            1,
            "0".repeat(64),
            vec![Transaction::new_coinbase("m", 1.0)],
            2.0,
            cancel,
        );
        match outcome {
            MineOutcome::Found(block) => {
                assert!(block.hash.starts_with(DIFFICULTY));
                assert!(block.is_valid_proof(DIFFICULTY));
            }
            MineOutcome::Cancelled => panic!("expected a mined block"),
        }
    }

    #[test]
    fn pre_set_cancel_flag_stops_immediately() {
        let cancel = new_cancel_flag();
        cancel.store(true, Ordering::Relaxed);
        let outcome = mine(1, "0".repeat(64), vec![], 1.0, cancel);
        assert!(matches!(outcome, MineOutcome::Cancelled));
    }
}
