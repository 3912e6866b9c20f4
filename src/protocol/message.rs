//! Wire message taxonomy.
//!
//! Every frame on the wire is an [`Envelope`] carrying a tagged [`Payload`].
//! `serde`'s adjacently-tagged enum representation gives us the `"type"`
//! discriminator for free; unknown `type` values and malformed payload
//! shapes both fail the same `serde_json` deserialization step, surfacing
//! as `ChainError::InvalidJson` at the codec layer — spec.md's
//! `InvalidFrame`/`InvalidPayload` kinds share one policy (close the
//! connection, log at `debug`, never propagate) so they share one variant.

use serde::{Deserialize, Serialize};

use crate::domain::{Block, Transaction};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub payload: Payload,
    pub sender: String,
}

impl Envelope {
    pub fn new(payload: Payload, sender: impl Into<String>) -> Envelope {
        Envelope {
            payload,
            sender: sender.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Payload {
    #[serde(rename = "NEW_TRANSACTION")]
    NewTransaction { transaction: Transaction },

    #[serde(rename = "NEW_BLOCK")]
    NewBlock { block: Block },

    #[serde(rename = "REQUEST_CHAIN")]
    RequestChain {},

    #[serde(rename = "RESPONSE_CHAIN")]
    ResponseChain { blockchain: ChainSnapshot },

    #[serde(rename = "PING")]
    Ping {},

    #[serde(rename = "PONG")]
    Pong {},

    #[serde(rename = "DISCOVER_PEERS")]
    DiscoverPeers {},

    #[serde(rename = "PEERS_LIST")]
    PeersList { peers: Vec<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
}
