//! Network-side transaction lookup and a bounded cache in front of it.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use slpwallet_consensus::Hash256;
use slpwallet_primitives::Transaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchError {
    NotFound,
    /// Transient failure; callers retry later.
    Unavailable(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "transaction not found"),
            FetchError::Unavailable(message) => write!(f, "source unavailable: {message}"),
        }
    }
}

impl std::error::Error for FetchError {}

pub trait TransactionSource: Send + Sync {
    /// Returns the raw serialized transaction.
    fn fetch_transaction(&self, txid: &Hash256) -> Result<Vec<u8>, FetchError>;
}

/// FIFO-evicting transaction cache.
#[derive(Debug)]
pub struct TxCache {
    capacity: usize,
    entries: HashMap<Hash256, Transaction>,
    order: VecDeque<Hash256>,
}

impl TxCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, txid: &Hash256) -> Option<&Transaction> {
        self.entries.get(txid)
    }

    pub fn put(&mut self, txid: Hash256, tx: Transaction) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(txid, tx).is_some() {
            return;
        }
        self.order.push_back(txid);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(lock_time: u32) -> Transaction {
        Transaction {
            version: 1,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time,
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let mut cache = TxCache::new(2);
        cache.put([1; 32], tx(1));
        cache.put([2; 32], tx(2));
        cache.put([1; 32], tx(1));
        cache.put([3; 32], tx(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[1; 32]).is_none());
        assert_eq!(cache.get(&[3; 32]).map(|tx| tx.lock_time), Some(3));

        let mut disabled = TxCache::new(0);
        disabled.put([1; 32], tx(1));
        assert!(disabled.is_empty());
    }
}
