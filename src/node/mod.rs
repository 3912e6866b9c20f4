//! The peer-to-peer node: TCP server, outbound dialer, peer table,
//! broadcast, and chain sync.
pub mod context;
pub mod miner;
pub mod peers;

pub use context::Node;
pub use peers::{MAX_PEERS, PeerEntry, PeerTable};
