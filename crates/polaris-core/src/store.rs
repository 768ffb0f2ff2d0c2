//! Storage contracts consumed by the consensus core, plus in-memory
//! implementations used by tests and single-process deployments.
//!
//! Both stores are single-writer (the round driver) and many-reader; reads
//! see a consistent height.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use polaris_crypto::{Hash, PublicKey};
use thiserror::Error;

use crate::block::Block;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Block not found at height {0}")]
    NotFound(u64),

    #[error("Non-monotonic commit: expected height {expected}, got {actual}")]
    NonMonotonic { expected: u64, actual: u64 },

    #[error("State snapshot missing at or below height {0}")]
    MissingSnapshot(u64),

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Balance and nonce of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountState {
    pub balance: u64,
    pub nonce: u64,
}

/// Consistent read view of account state as of one height.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub height: u64,
    pub accounts: HashMap<PublicKey, AccountState>,
}

impl StateSnapshot {
    pub fn balance_of(&self, pk: &PublicKey) -> u64 {
        self.accounts.get(pk).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce_of(&self, pk: &PublicKey) -> u64 {
        self.accounts.get(pk).map(|a| a.nonce).unwrap_or(0)
    }
}

/// Post-state of the accounts touched by one committed block.
#[derive(Debug, Clone)]
pub struct StateDelta {
    pub height: u64,
    pub accounts: HashMap<PublicKey, AccountState>,
}

/// Append-only block storage.
pub trait BlockStore: Send + Sync {
    fn put(&self, block: &Block) -> Result<(), StoreError>;
    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError>;
    fn get_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError>;
    /// Highest committed height, `None` when empty.
    fn current_height(&self) -> Result<Option<u64>, StoreError>;
}

/// Height-indexed account state storage.
pub trait StateStore: Send + Sync {
    /// Snapshot at the greatest stored height `<= height`.
    fn snapshot_at(&self, height: u64) -> Result<StateSnapshot, StoreError>;
    fn apply(&self, delta: &StateDelta) -> Result<(), StoreError>;
    fn current(&self) -> Result<StateSnapshot, StoreError>;
}

// ── In-memory implementations ──────────────────────────────────────────────

#[derive(Default)]
struct MemoryBlockStoreInner {
    by_height: BTreeMap<u64, Block>,
    height_by_hash: HashMap<Hash, u64>,
}

/// Heap-backed [`BlockStore`].
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: RwLock<MemoryBlockStoreInner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a chain from its genesis block.
    pub fn with_genesis(genesis: Block) -> Self {
        let store = Self::new();
        store.put(&genesis).expect("empty store accepts genesis");
        store
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let expected = inner.by_height.last_key_value().map(|(h, _)| h + 1).unwrap_or(0);
        if block.height != expected {
            return Err(StoreError::NonMonotonic { expected, actual: block.height });
        }
        inner.height_by_hash.insert(block.hash(), block.height);
        inner.by_height.insert(block.height, block.clone());
        Ok(())
    }

    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        Ok(self.inner.read().by_height.get(&height).cloned())
    }

    fn get_by_hash(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .height_by_hash
            .get(hash)
            .and_then(|h| inner.by_height.get(h))
            .cloned())
    }

    fn current_height(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.read().by_height.last_key_value().map(|(h, _)| *h))
    }
}

/// Heap-backed [`StateStore`] keeping a full account map per height.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<BTreeMap<u64, HashMap<PublicKey, AccountState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize height 0 with pre-funded accounts.
    pub fn with_genesis(accounts: HashMap<PublicKey, AccountState>) -> Self {
        let store = Self::new();
        store.inner.write().insert(0, accounts);
        store
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot_at(&self, height: u64) -> Result<StateSnapshot, StoreError> {
        let inner = self.inner.read();
        let (snap_height, accounts) = inner
            .range(..=height)
            .next_back()
            .ok_or(StoreError::MissingSnapshot(height))?;
        Ok(StateSnapshot { height: *snap_height, accounts: accounts.clone() })
    }

    fn apply(&self, delta: &StateDelta) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let mut accounts = inner
            .last_key_value()
            .map(|(_, accounts)| accounts.clone())
            .unwrap_or_default();
        for (pk, state) in &delta.accounts {
            accounts.insert(*pk, *state);
        }
        inner.insert(delta.height, accounts);
        Ok(())
    }

    fn current(&self) -> Result<StateSnapshot, StoreError> {
        let inner = self.inner.read();
        let (height, accounts) =
            inner.last_key_value().ok_or(StoreError::MissingSnapshot(0))?;
        Ok(StateSnapshot { height: *height, accounts: accounts.clone() })
    }
}
