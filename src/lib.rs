//! `meshchain` — a fully-distributed, Bitcoin-like blockchain node.
//!
//! Four tightly coupled subsystems make up the core: chain + mempool state
//! ([`domain`]), the proof-of-work miner and peer-to-peer node ([`node`]),
//! and the wire protocol that lets independently developed peers
//! interoperate ([`protocol`]).

pub mod domain;
pub mod error;
pub mod node;
pub mod protocol;

pub use error::{ChainError, Result};
