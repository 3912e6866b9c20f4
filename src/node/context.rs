//! The Node: TCP listener, outbound dialer, peer table, broadcast fan-out,
//! and chain synchronization.
//!
//! The Node is the composition root. It owns the Blockchain and the peer
//! table behind plain `std::sync::Mutex`es, mediates every inbound and
//! outbound frame, and spawns the Miner on demand. No network I/O is ever
//! performed while either lock is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::domain::{Block, Blockchain, Transaction};
use crate::error::{ChainError, Result};
use crate::node::miner::{self, MineOutcome};
use crate::node::peers::PeerTable;
use crate::protocol::{ChainSnapshot, Envelope, Payload, read_envelope, write_envelope};

/// Wall-clock budget for a single `sync_blockchain` round.
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);
/// Wall-clock budget for a single outbound dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Node {
    /// This node's own `host:port`, as learned by peers from the `sender`
    /// field of every frame it sends.
    pub addr: String,
    /// Recipient of coinbase rewards for blocks this node mines.
    pub wallet: String,
    blockchain: Mutex<Blockchain>,
    peers: Mutex<PeerTable>,
    /// Cancellation flag for the in-flight mining round, if any.
    mining: Mutex<Option<Arc<AtomicBool>>>,
}

impl Node {
    pub fn new(addr: impl Into<String>, wallet: impl Into<String>) -> Arc<Node> {
        let addr = addr.into();
        Arc::new(Node {
            peers: Mutex::new(PeerTable::new(addr.clone())),
            blockchain: Mutex::new(Blockchain::new()),
            wallet: wallet.into(),
            addr,
            mining: Mutex::new(None),
        })
    }

    /// Binds the listening socket, starts the accept loop and the
    /// sync-heartbeat task, and dials every bootstrap address. Returns once
    /// startup is complete; the spawned tasks keep running in the
    /// background.
    pub async fn run(self: &Arc<Self>, bootstrap: Vec<String>) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| ChainError::InvalidListenAddr(self.addr.clone(), e.to_string()))?;
        info!(addr = %self.addr, "node listening");

        let accept_node = Arc::clone(self);
        tokio::spawn(async move { accept_node.accept_loop(listener).await });

        let heartbeat_node = Arc::clone(self);
        tokio::spawn(async move { heartbeat_node.sync_heartbeat().await });

        for addr in bootstrap {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                node.connect_to_peer(&addr).await;
            });
        }
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move { node.handle_connection(stream).await });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }

    /// A background task that periodically calls `sync_blockchain`, so a
    /// node that missed blocks while disconnected still converges.
    async fn sync_heartbeat(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let gained = self.sync_blockchain().await;
            if gained > 0 {
                info!(gained, "sync heartbeat adopted a longer chain");
            }
        }
    }

    /// Decodes exactly one framed envelope, dispatches it, writes back a
    /// reply for request/response message types, then closes the
    /// connection. There is no long-lived session multiplexing.
    #[instrument(skip(self, stream), fields(addr = %self.addr))]
    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) {
        let envelope = match read_envelope(&mut stream).await {
            Ok(env) => env,
            Err(e) => {
                debug!(error = %e, "dropping connection: invalid frame");
                return;
            }
        };
        if let Some(reply) = self.dispatch(envelope).await {
            if let Err(e) = write_envelope(&mut stream, &reply).await {
                debug!(error = %e, "failed writing reply");
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope) -> Option<Envelope> {
        let sender = envelope.sender.clone();
        self.learn_peer(&sender);

        match envelope.payload {
            Payload::NewTransaction { transaction } => {
                self.handle_new_transaction(transaction, sender);
                None
            }
            Payload::NewBlock { block } => {
                self.handle_new_block(block, sender);
                None
            }
            Payload::RequestChain {} => Some(self.respond_with_chain()),
            Payload::ResponseChain { .. } => {
                // Unsolicited RESPONSE_CHAIN frames arrive only outside an
                // active sync round (the aggregator reads its own replies
                // directly off the dialed connection); nothing to do.
                None
            }
            Payload::Ping {} => Some(Envelope::new(Payload::Pong {}, self.addr.clone())),
            Payload::Pong {} => {
                self.peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .record_success(&sender);
                None
            }
            Payload::DiscoverPeers {} => Some(self.respond_with_peers(&sender)),
            Payload::PeersList { peers } => {
                self.admit_and_dial(peers);
                None
            }
        }
    }

    fn handle_new_transaction(self: &Arc<Self>, transaction: Transaction, sender: String) {
        let added = self
            .blockchain
            .lock()
            .expect("blockchain lock poisoned")
            .add_transaction(transaction.clone());
        if added {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                node.broadcast(Payload::NewTransaction { transaction }, Some(&sender))
                    .await;
            });
        }
    }

    fn handle_new_block(self: &Arc<Self>, block: Block, sender: String) {
        let (accepted, index, height) = {
            let mut bc = self.blockchain.lock().expect("blockchain lock poisoned");
            let height = bc.len() as u64 - 1;
            let index = block.index;
            (bc.add_block(block.clone()), index, height)
        };

        if accepted {
            self.cancel_mining();
            let node = Arc::clone(self);
            tokio::spawn(async move {
                node.broadcast(Payload::NewBlock { block }, Some(&sender)).await;
            });
        } else if index > height + 1 {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                node.sync_blockchain().await;
            });
        }
    }

    fn respond_with_chain(&self) -> Envelope {
        let (chain, pending_transactions) = {
            let bc = self.blockchain.lock().expect("blockchain lock poisoned");
            (bc.chain().to_vec(), bc.pending_transactions())
        };
        Envelope::new(
            Payload::ResponseChain {
                blockchain: ChainSnapshot {
                    chain,
                    pending_transactions,
                },
            },
            self.addr.clone(),
        )
    }

    fn respond_with_peers(&self, requester: &str) -> Envelope {
        let peers = {
            let table = self.peers.lock().expect("peer table lock poisoned");
            table.all_addrs()
        };
        let peers = peers.into_iter().filter(|a| a != requester).collect();
        Envelope::new(Payload::PeersList { peers }, self.addr.clone())
    }

    fn admit_and_dial(self: &Arc<Self>, peers: Vec<String>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            for addr in peers {
                let already_known = {
                    let table = node.peers.lock().expect("peer table lock poisoned");
                    table.contains(&addr)
                };
                if !already_known {
                    node.connect_to_peer(&addr).await;
                }
            }
        });
    }

    fn learn_peer(&self, addr: &str) {
        if addr.is_empty() || addr == self.addr {
            return;
        }
        self.peers.lock().expect("peer table lock poisoned").learn(addr);
    }

    fn cancel_mining(&self) {
        if let Some(flag) = self.mining.lock().expect("mining lock poisoned").as_ref() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Snapshot the non-quarantined peer list, release the lock, shuffle,
    /// then open one short-lived connection per peer and send `payload`.
    pub async fn broadcast(self: &Arc<Self>, payload: Payload, exclude: Option<&str>) {
        let mut targets = {
            let table = self.peers.lock().expect("peer table lock poisoned");
            table.active_addrs()
        };
        targets.retain(|addr| Some(addr.as_str()) != exclude);
        targets.shuffle(&mut rand::rng());

        let mut handles = Vec::with_capacity(targets.len());
        for addr in targets {
            let node = Arc::clone(self);
            let envelope = Envelope::new(payload.clone(), self.addr.clone());
            handles.push(tokio::spawn(async move {
                node.send_one_shot(&addr, envelope).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn send_one_shot(self: &Arc<Self>, addr: &str, envelope: Envelope) {
        match self.dial_and_send(addr, envelope, false).await {
            Ok(_) => self
                .peers
                .lock()
                .expect("peer table lock poisoned")
                .record_success(addr),
            Err(e) => {
                debug!(addr, error = %e, "broadcast send failed");
                self.peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .record_failure(addr);
            }
        }
    }

    /// `PING` a candidate peer; on `PONG`, admit it and ask it for its own
    /// peer list so the overlay keeps growing.
    pub async fn connect_to_peer(self: &Arc<Self>, addr: &str) -> bool {
        if addr.is_empty() || addr == self.addr {
            return false;
        }

        let ping = Envelope::new(Payload::Ping {}, self.addr.clone());
        let reply = match self.dial_and_send(addr, ping, true).await {
            Ok(Some(reply)) => reply,
            _ => {
                self.peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .record_failure(addr);
                return false;
            }
        };
        if !matches!(reply.payload, Payload::Pong {}) {
            self.peers
                .lock()
                .expect("peer table lock poisoned")
                .record_failure(addr);
            return false;
        }

        self.peers.lock().expect("peer table lock poisoned").learn(addr);

        let discover = Envelope::new(Payload::DiscoverPeers {}, self.addr.clone());
        if let Ok(Some(reply)) = self.dial_and_send(addr, discover, true).await {
            if let Payload::PeersList { peers } = reply.payload {
                self.admit_and_dial(peers);
            }
        }
        true
    }

    /// Fans `REQUEST_CHAIN` out to every active peer, collects every
    /// strictly-longer, valid candidate chain within `SYNC_TIMEOUT`, and
    /// adopts the longest (first-seen on ties). Returns the number of
    /// blocks gained, or 0 if no candidate was adopted.
    #[instrument(skip(self))]
    pub async fn sync_blockchain(self: &Arc<Self>) -> usize {
        let before = self.blockchain.lock().expect("blockchain lock poisoned").len();
        let targets = {
            let table = self.peers.lock().expect("peer table lock poisoned");
            table.active_addrs()
        };
        if targets.is_empty() {
            return 0;
        }

        let mut handles = Vec::with_capacity(targets.len());
        for addr in targets {
            let node = Arc::clone(self);
            handles.push(tokio::spawn(async move { node.request_chain_from(addr).await }));
        }

        let mut best: Option<Vec<Block>> = None;
        for handle in handles {
            let Ok(Some(candidate)) = handle.await else {
                continue;
            };
            if candidate.len() <= before {
                continue;
            }
            let valid = self
                .blockchain
                .lock()
                .expect("blockchain lock poisoned")
                .is_chain_valid(&candidate);
            if !valid {
                continue;
            }
            match &best {
                Some(current) if candidate.len() <= current.len() => {}
                _ => best = Some(candidate),
            }
        }

        match best {
            Some(candidate) => {
                let gained = candidate.len() - before;
                let adopted = self
                    .blockchain
                    .lock()
                    .expect("blockchain lock poisoned")
                    .replace_chain(candidate);
                if adopted { gained } else { 0 }
            }
            None => 0,
        }
    }

    async fn request_chain_from(self: Arc<Self>, addr: String) -> Option<Vec<Block>> {
        let envelope = Envelope::new(Payload::RequestChain {}, self.addr.clone());
        let result =
            tokio::time::timeout(SYNC_TIMEOUT, self.dial_and_send(&addr, envelope, true)).await;
        match result {
            Ok(Ok(Some(reply))) => {
                self.peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .record_success(&addr);
                match reply.payload {
                    Payload::ResponseChain { blockchain } => Some(blockchain.chain),
                    _ => None,
                }
            }
            _ => {
                self.peers
                    .lock()
                    .expect("peer table lock poisoned")
                    .record_failure(&addr);
                None
            }
        }
    }

    async fn dial_and_send(
        &self,
        addr: &str,
        envelope: Envelope,
        expect_response: bool,
    ) -> Result<Option<Envelope>> {
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ChainError::PeerUnreachable(addr.to_string(), "connect timed out".into()))?
            .map_err(|e| ChainError::PeerUnreachable(addr.to_string(), e.to_string()))?;

        write_envelope(&mut stream, &envelope).await?;
        if !expect_response {
            return Ok(None);
        }
        let reply = read_envelope(&mut stream).await?;
        Ok(Some(reply))
    }

    /// Submits a transaction to the local mempool, as a user call (not a
    /// wire frame) would.
    pub fn add_transaction(&self, transaction: Transaction) -> bool {
        self.blockchain
            .lock()
            .expect("blockchain lock poisoned")
            .add_transaction(transaction)
    }

    pub fn get_balance(&self, address: &str) -> f64 {
        self.blockchain.lock().expect("blockchain lock poisoned").get_balance(address)
    }

    pub fn chain_len(&self) -> usize {
        self.blockchain.lock().expect("blockchain lock poisoned").len()
    }

    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.blockchain.lock().expect("blockchain lock poisoned").chain().to_vec()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().expect("peer table lock poisoned").len()
    }

    /// Addresses currently eligible for broadcast (known and not quarantined).
    pub fn active_peer_addrs(&self) -> Vec<String> {
        self.peers.lock().expect("peer table lock poisoned").active_addrs()
    }

    pub fn pending_count(&self) -> usize {
        self.blockchain.lock().expect("blockchain lock poisoned").mempool_len()
    }

    /// Mines one block against the current tip, using every currently
    /// pending transaction (value-descending) plus a fresh coinbase reward
    /// to `self.wallet`. Runs the CPU-bound search on a blocking thread pool
    /// so the async runtime keeps serving connections. Returns `None` if
    /// mining was cancelled by a competing block arriving first, or if the
    /// mined block lost a race to append.
    #[instrument(skip(self))]
    pub async fn mine(self: &Arc<Self>) -> Option<Block> {
        let (index, previous_hash, pending) = {
            let bc = self.blockchain.lock().expect("blockchain lock poisoned");
            (bc.len() as u64, bc.last_block().hash.clone(), bc.pending_transactions())
        };

        let timestamp = now_secs();
        let mut transactions = vec![Transaction::new_coinbase(self.wallet.clone(), timestamp)];
        transactions.extend(pending);

        let cancel = miner::new_cancel_flag();
        *self.mining.lock().expect("mining lock poisoned") = Some(Arc::clone(&cancel));

        let outcome = tokio::task::spawn_blocking(move || {
            miner::mine(index, previous_hash, transactions, timestamp, cancel)
        })
        .await
        .expect("mining worker task panicked");

        *self.mining.lock().expect("mining lock poisoned") = None;

        match outcome {
            MineOutcome::Found(block) => {
                let accepted = self
                    .blockchain
                    .lock()
                    .expect("blockchain lock poisoned")
                    .add_block(block.clone());
                if accepted {
                    let node = Arc::clone(self);
                    let broadcasted = block.clone();
                    tokio::spawn(async move {
                        node.broadcast(Payload::NewBlock { block: broadcasted }, None).await;
                    });
                    Some(block)
                } else {
                    None
                }
            }
            MineOutcome::Cancelled => None,
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mine_then_verify() {
        let node = Node::new("127.0.0.1:0", "m");
        assert!(node.add_transaction(Transaction::with_id("t1", "x", "y", 1.0, 1.0)));

        let block = node.mine().await.expect("mining should succeed");
        assert_eq!(node.chain_len(), 2);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].origem, "coinbase");
        assert_eq!(block.transactions[0].destino, "m");
        assert_eq!(block.transactions[0].valor, 50.0);
        assert_eq!(node.get_balance("m"), 50.0);
        assert_eq!(node.get_balance("x"), -1.0);
        assert_eq!(node.get_balance("y"), 1.0);
    }

    #[tokio::test]
    async fn priority_ordering_by_descending_value() {
        let node = Node::new("127.0.0.1:0", "m");
        node.add_transaction(Transaction::with_id("a", "x", "y", 3.0, 1.0));
        node.add_transaction(Transaction::with_id("b", "x", "y", 1.0, 1.0));
        node.add_transaction(Transaction::with_id("c", "x", "y", 2.0, 1.0));

        let block = node.mine().await.expect("mining should succeed");
        let values: Vec<f64> = block.transactions[1..].iter().map(|t| t.valor).collect();
        assert_eq!(values, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn duplicate_transaction_is_rejected() {
        let node = Node::new("127.0.0.1:0", "m");
        assert!(node.add_transaction(Transaction::with_id("dup", "x", "y", 1.0, 1.0)));
        assert!(!node.add_transaction(Transaction::with_id("dup", "x", "y", 1.0, 1.0)));
    }
}
