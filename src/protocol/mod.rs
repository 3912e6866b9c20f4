//! Wire protocol: message taxonomy and length-prefixed framing.
pub mod codec;
pub mod message;

pub use codec::{MAX_FRAME_SIZE, read_envelope, write_envelope};
pub use message::{ChainSnapshot, Envelope, Payload};
