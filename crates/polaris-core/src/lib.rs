// Polaris data model: blocks, transactions, announcements, chain state,
// the canonical codec, and the contracts the consensus core consumes.

pub mod announcement;
pub mod block;
pub mod chain_state;
pub mod codec;
pub mod config;
pub mod error;
pub mod mempool;
pub mod network;
pub mod store;
pub mod transaction;

pub use announcement::{SignedAnnouncement, VrfAnnouncement};
pub use block::{round_seed, target_to_bytes, Block};
pub use chain_state::ChainState;
pub use config::ConsensusConfig;
pub use error::{CoreError, Result};
pub use mempool::Mempool;
pub use network::{Network, NetworkError, NoopNetwork};
pub use store::{
    AccountState, BlockStore, MemoryBlockStore, MemoryStateStore, StateDelta, StateSnapshot,
    StateStore, StoreError,
};
pub use transaction::Transaction;
