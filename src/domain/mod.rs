//! Chain and mempool state: the value objects and their validation rules.
pub mod block;
pub mod blockchain;
pub mod transaction;

pub use block::{Block, DIFFICULTY};
pub use blockchain::Blockchain;
pub use transaction::{COINBASE_REWARD, COINBASE_SOURCE, Transaction};
