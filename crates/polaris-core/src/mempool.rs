use std::collections::HashMap;

use parking_lot::RwLock;
use polaris_crypto::Hash;

use crate::transaction::Transaction;
use crate::{CoreError, Result};

/// Shared transaction pool.
///
/// Writers (network ingress) and the consensus engine coordinate through
/// the internal lock; the engine only ever consumes an ordered snapshot at
/// proposal time and removes entries at commit.
pub struct Mempool {
    inner: RwLock<HashMap<Hash, Transaction>>,
    capacity: usize,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self { inner: RwLock::new(HashMap::new()), capacity }
    }

    /// Admit a transaction. Rejects duplicates, bad signatures, and
    /// overflow beyond capacity.
    pub fn add(&self, tx: Transaction) -> Result<()> {
        if !tx.verify_signature() {
            return Err(CoreError::InvalidTransaction("signature verification failed".into()));
        }
        let mut pool = self.inner.write();
        if pool.len() >= self.capacity {
            return Err(CoreError::MempoolFull(self.capacity));
        }
        let hash = tx.hash();
        if pool.contains_key(&hash) {
            return Err(CoreError::DuplicateTransaction);
        }
        pool.insert(hash, tx);
        Ok(())
    }

    /// Snapshot of the pool in proposal order:
    /// fee descending, then timestamp ascending, then hash ascending.
    pub fn snapshot_ordered(&self) -> Vec<Transaction> {
        let pool = self.inner.read();
        let mut txs: Vec<(Hash, Transaction)> =
            pool.iter().map(|(h, tx)| (*h, tx.clone())).collect();
        txs.sort_by(|(ha, a), (hb, b)| {
            b.fee
                .cmp(&a.fee)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
                .then_with(|| ha.cmp(hb))
        });
        txs.into_iter().map(|(_, tx)| tx).collect()
    }

    /// Drop committed transactions.
    pub fn remove(&self, hashes: &[Hash]) {
        let mut pool = self.inner.write();
        for hash in hashes {
            pool.remove(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().contains_key(hash)
    }
}
