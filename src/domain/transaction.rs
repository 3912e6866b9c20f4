//! Transaction value object.
//!
//! A transaction moves value from one opaque address to another. There are
//! no signatures: `origem`/`destino` are plain strings and `"coinbase"` is
//! reserved for mining rewards (see `Transaction::new_coinbase`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const COINBASE_SOURCE: &str = "coinbase";
pub const COINBASE_REWARD: f64 = 50.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub origem: String,
    pub destino: String,
    pub valor: f64,
    pub timestamp: f64,
}

impl Transaction {
    /// Construct a transaction, generating a fresh id.
    pub fn new(origem: impl Into<String>, destino: impl Into<String>, valor: f64, timestamp: f64) -> Transaction {
        Transaction {
            id: Uuid::new_v4().to_string(),
            origem: origem.into(),
            destino: destino.into(),
            valor,
            timestamp,
        }
    }

    /// Reconstruct a transaction with an explicit id, as received from the
    /// wire or a user-supplied id for idempotent resubmission.
    pub fn with_id(
        id: impl Into<String>,
        origem: impl Into<String>,
        destino: impl Into<String>,
        valor: f64,
        timestamp: f64,
    ) -> Transaction {
        Transaction {
            id: id.into(),
            origem: origem.into(),
            destino: destino.into(),
            valor,
            timestamp,
        }
    }

    /// First transaction of any mined block: mints `COINBASE_REWARD` to the
    /// miner's wallet address.
    pub fn new_coinbase(miner_address: impl Into<String>, timestamp: f64) -> Transaction {
        Transaction::new(COINBASE_SOURCE, miner_address, COINBASE_REWARD, timestamp)
    }

    pub fn is_coinbase(&self) -> bool {
        self.origem == COINBASE_SOURCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_generates_unique_ids() {
        let a = Transaction::new("x", "y", 1.0, 0.0);
        let b = Transaction::new("x", "y", 1.0, 0.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn with_id_roundtrips_through_json() {
        let tx = Transaction::with_id("t1", "x", "y", 1.0, 1_700_000_000.0);
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn coinbase_has_reserved_source_and_fixed_reward() {
        let tx = Transaction::new_coinbase("miner-addr", 10.0);
        assert!(tx.is_coinbase());
        assert_eq!(tx.origem, COINBASE_SOURCE);
        assert_eq!(tx.destino, "miner-addr");
        assert_eq!(tx.valor, COINBASE_REWARD);
    }

    #[test]
    fn canonical_json_has_expected_keys() {
        let tx = Transaction::with_id("id1", "x", "y", 1.0, 1.0);
        let value = serde_json::to_value(&tx).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["destino", "id", "origem", "timestamp", "valor"]);
    }
}
