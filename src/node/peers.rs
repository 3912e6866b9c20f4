//! Peer table: `host:port` → health, bounded to `MAX_PEERS` with quarantine.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MAX_PEERS: usize = 20;
pub const QUARANTINE_THRESHOLD: u32 = 3;

#[derive(Clone, Debug)]
pub struct PeerEntry {
    pub last_seen: f64,
    pub consecutive_failures: u32,
}

impl PeerEntry {
    fn fresh() -> PeerEntry {
        PeerEntry {
            last_seen: now_secs(),
            consecutive_failures: 0,
        }
    }

    pub fn is_quarantined(&self) -> bool {
        self.consecutive_failures >= QUARANTINE_THRESHOLD
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Bounded table of known peers, keyed by their `host:port` address. Holds
/// no lock itself; the Node wraps it in a mutex and releases it before any
/// network I/O, per the broadcast contract.
#[derive(Clone, Debug, Default)]
pub struct PeerTable {
    own_addr: String,
    peers: HashMap<String, PeerEntry>,
}

impl PeerTable {
    pub fn new(own_addr: impl Into<String>) -> PeerTable {
        PeerTable {
            own_addr: own_addr.into(),
            peers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.contains_key(addr)
    }

    /// Admits `addr` if it isn't the node's own address, isn't already
    /// known, and the table has room (evicting the most-failed quarantined
    /// peer first if it's full). Returns whether `addr` ended up admitted.
    pub fn learn(&mut self, addr: &str) -> bool {
        if addr == self.own_addr || addr.is_empty() {
            return false;
        }
        if self.peers.contains_key(addr) {
            self.record_success(addr);
            return true;
        }
        if self.peers.len() >= MAX_PEERS && !self.evict_worst_quarantined() {
            return false;
        }
        self.peers.insert(addr.to_string(), PeerEntry::fresh());
        true
    }

    /// Resets a peer's failure count and refreshes its last-seen timestamp
    /// on any successful exchange; this is how a quarantined peer recovers.
    pub fn record_success(&mut self, addr: &str) {
        if let Some(entry) = self.peers.get_mut(addr) {
            entry.consecutive_failures = 0;
            entry.last_seen = now_secs();
        }
    }

    /// Increments the failure counter; the peer becomes quarantined once it
    /// reaches `QUARANTINE_THRESHOLD`, but stays in the table either way.
    pub fn record_failure(&mut self, addr: &str) {
        if let Some(entry) = self.peers.get_mut(addr) {
            entry.consecutive_failures += 1;
        }
    }

    /// Snapshot of non-quarantined peer addresses, suitable to release the
    /// lock and shuffle before opening outbound connections.
    pub fn active_addrs(&self) -> Vec<String> {
        self.peers
            .iter()
            .filter(|(_, e)| !e.is_quarantined())
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn all_addrs(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    fn evict_worst_quarantined(&mut self) -> bool {
        let worst = self
            .peers
            .iter()
            .filter(|(_, e)| e.is_quarantined())
            .max_by_key(|(_, e)| e.consecutive_failures)
            .map(|(addr, _)| addr.clone());
        match worst {
            Some(addr) => {
                self.peers.remove(&addr);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learn_refuses_own_address() {
        let mut table = PeerTable::new("me:1");
        assert!(!table.learn("me:1"));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn learn_admits_new_peer() {
        let mut table = PeerTable::new("me:1");
        assert!(table.learn("a:1"));
        assert_eq!(table.len(), 1);
        assert!(table.contains("a:1"));
    }

    #[test]
    fn quarantine_excludes_from_active_but_keeps_in_table() {
        let mut table = PeerTable::new("me:1");
        table.learn("a:1");
        table.record_failure("a:1");
        table.record_failure("a:1");
        table.record_failure("a:1");
        assert_eq!(table.len(), 1);
        assert!(table.active_addrs().is_empty());

        table.record_success("a:1");
        assert_eq!(table.active_addrs(), vec!["a:1".to_string()]);
    }

    #[test]
    fn table_is_bounded_and_evicts_worst_quarantined_on_overflow() {
        let mut table = PeerTable::new("me:1");
        for i in 0..MAX_PEERS {
            table.learn(&format!("p{i}:1"));
        }
        assert_eq!(table.len(), MAX_PEERS);
        // no quarantined peer to evict, overflow is refused
        assert!(!table.learn("overflow:1"));
        assert_eq!(table.len(), MAX_PEERS);

        table.record_failure("p0:1");
        table.record_failure("p0:1");
        table.record_failure("p0:1");
        assert!(table.learn("newcomer:1"));
        assert_eq!(table.len(), MAX_PEERS);
        assert!(!table.contains("p0:1"));
        assert!(table.contains("newcomer:1"));
    }
}
