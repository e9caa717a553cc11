//! Thread-safe pool of pending, validated-but-unmined transactions, keyed by id.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::Transaction;

/// No ordering guarantees, no fee prioritization, no de-duplication beyond the id key.
/// Admission is unconditional at this layer; callers validate before calling `add`.
#[derive(Default)]
pub struct Mempool {
    txns: RwLock<HashMap<String, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool::default()
    }

    pub fn add(&self, tx: Transaction) {
        let mut txns = self.txns.write().expect("mempool lock poisoned");
        txns.insert(tx.id.clone(), tx);
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        let txns = self.txns.read().expect("mempool lock poisoned");
        txns.values().cloned().collect()
    }

    /// Returns an unspecified-order sample of up to `limit` pending transactions.
    pub fn get_pending(&self, limit: usize) -> Vec<Transaction> {
        let txns = self.txns.read().expect("mempool lock poisoned");
        txns.values().take(limit).cloned().collect()
    }

    pub fn remove_confirmed(&self, confirmed: &[Transaction]) {
        let mut txns = self.txns.write().expect("mempool lock poisoned");
        for tx in confirmed {
            txns.remove(&tx.id);
        }
    }

    pub fn count(&self) -> usize {
        let txns = self.txns.read().expect("mempool lock poisoned");
        txns.len()
    }
}
