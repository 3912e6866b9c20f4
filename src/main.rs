use std::sync::Arc;

use clap::Parser;
use meshchain::node::Node;
use tracing::info;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
};

/// A fully-distributed, Bitcoin-like blockchain node.
#[derive(Debug, Parser)]
#[command(name = "meshchain")]
struct Opt {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long)]
    port: u16,

    /// Recipient of coinbase rewards for blocks this node mines. Defaults
    /// to the node's own `host:port`.
    #[arg(long)]
    wallet: Option<String>,

    /// Bootstrap peer address (`host:port`); may be repeated.
    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,

    /// Mine continuously against the current mempool in the background.
    #[arg(long)]
    mine: bool,
}

fn initialize_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter))
        .init();
}

/// Runs a continuous mining loop: mine a block, broadcast it if found, then
/// immediately mine the next one against whatever the mempool holds by then.
/// Mining naturally no-ops (returns quickly as cancelled or keeps searching)
/// when the mempool is empty, since a coinbase-only block is still valid.
async fn mining_loop(node: Arc<Node>) {
    loop {
        if let Some(block) = node.mine().await {
            info!(index = block.index, hash = %block.hash, "mined block");
        }
    }
}

#[tokio::main]
async fn main() {
    initialize_logging();

    let opt = Opt::parse();
    let addr = format!("{}:{}", opt.host, opt.port);
    let wallet = opt.wallet.unwrap_or_else(|| addr.clone());

    let node = Node::new(addr.clone(), wallet);

    if let Err(e) = node.run(opt.bootstrap).await {
        eprintln!("failed to start node: {e}");
        std::process::exit(1);
    }
    info!(addr = %addr, "node started");

    if opt.mine {
        let miner_node = Arc::clone(&node);
        tokio::spawn(async move { mining_loop(miner_node).await });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutting down"),
        Err(e) => eprintln!("failed to listen for ctrl-c: {e}"),
    }
}
