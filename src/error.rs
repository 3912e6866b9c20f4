use thiserror::Error;

/// Behavioral error taxonomy for the node. Peer misbehaviour and network
/// failures are never fatal — see the call sites in `node/context.rs`,
/// which log and continue rather than propagate these.
#[derive(Clone, Error, Debug)]
pub enum ChainError {
    #[error("frame length prefix exceeds the maximum message size: {0} bytes")]
    FrameTooLarge(usize),
    #[error("connection closed before a full frame was read")]
    FrameTruncated,
    #[error("frame payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("frame payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("peer {0} unreachable: {1}")]
    PeerUnreachable(String, String),

    #[error("invalid listen address {0}: {1}")]
    InvalidListenAddr(String, String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        ChainError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
