//! Confirmation state of wallet transactions as reported by the sync source.

use std::collections::HashMap;

use slpwallet_consensus::Hash256;
use slpwallet_log::log_info;

/// Ordering key for transactions that have no block position yet.
const MEMPOOL_POSITION: i64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifiedTx {
    pub height: i32,
    pub timestamp: u32,
    pub position: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxHeight {
    pub height: i32,
    pub confirmations: i32,
    pub timestamp: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Verification {
    pub(crate) verified: HashMap<Hash256, VerifiedTx>,
    pub(crate) unverified: HashMap<Hash256, i32>,
    local_height: i32,
}

impl Verification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_height(&self) -> i32 {
        self.local_height
    }

    pub fn set_local_height(&mut self, height: i32) {
        self.local_height = height;
    }

    /// Records a height reported by history. A height of zero demotes a verified
    /// transaction back to the mempool. Returns true when that happened.
    pub fn add_unverified(&mut self, txid: Hash256, height: i32) -> bool {
        let demoted = height == 0 && self.verified.remove(&txid).is_some();
        if !self.verified.contains_key(&txid) {
            self.unverified.insert(txid, height);
        }
        demoted
    }

    pub fn add_verified(&mut self, txid: Hash256, info: VerifiedTx) {
        self.unverified.remove(&txid);
        self.verified.insert(txid, info);
    }

    pub fn is_verified(&self, txid: &Hash256) -> bool {
        self.verified.contains_key(txid)
    }

    pub fn verified(&self, txid: &Hash256) -> Option<&VerifiedTx> {
        self.verified.get(txid)
    }

    /// Transactions reported in a block that still await a proof.
    pub fn unverified_pending(&self) -> Vec<(Hash256, i32)> {
        let mut out: Vec<(Hash256, i32)> = self
            .unverified
            .iter()
            .filter(|(_, height)| **height > 0)
            .map(|(txid, height)| (*txid, *height))
            .collect();
        out.sort_by_key(|(txid, height)| (*height, *txid));
        out
    }

    pub fn tx_height(&self, txid: &Hash256) -> TxHeight {
        if let Some(info) = self.verified.get(txid) {
            return TxHeight {
                height: info.height,
                confirmations: (self.local_height - info.height + 1).max(0),
                timestamp: info.timestamp,
            };
        }
        if let Some(height) = self.unverified.get(txid) {
            return TxHeight {
                height: *height,
                ..TxHeight::default()
            };
        }
        TxHeight::default()
    }

    /// Sort key placing confirmed transactions by block position ahead of mempool ones.
    pub fn txpos(&self, txid: &Hash256) -> (i64, u32) {
        if let Some(info) = self.verified.get(txid) {
            return (i64::from(info.height), info.position);
        }
        match self.unverified.get(txid) {
            Some(height) if *height > 0 => (i64::from(*height), 0),
            Some(height) => (MEMPOOL_POSITION - i64::from(*height), 0),
            None => (MEMPOOL_POSITION + 1, 0),
        }
    }

    /// Drops verifications at or above `height` whose block timestamp no longer matches
    /// the header the chain now has at that height. Returns the affected txids.
    pub fn undo_verifications(
        &mut self,
        height: i32,
        header_timestamp: impl Fn(i32) -> Option<u32>,
    ) -> Vec<Hash256> {
        let mut undone: Vec<Hash256> = self
            .verified
            .iter()
            .filter(|(_, info)| {
                info.height >= height && header_timestamp(info.height) != Some(info.timestamp)
            })
            .map(|(txid, _)| *txid)
            .collect();
        undone.sort();
        for txid in &undone {
            self.verified.remove(txid);
        }
        if !undone.is_empty() {
            log_info!(
                "rolled back {} verified transactions at or above height {height}",
                undone.len()
            );
        }
        undone
    }

    /// Drops every height known for `txid`.
    pub fn forget(&mut self, txid: &Hash256) {
        self.verified.remove(txid);
        self.unverified.remove(txid);
    }

    pub fn clear(&mut self) {
        self.verified.clear();
        self.unverified.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(height: i32, timestamp: u32) -> VerifiedTx {
        VerifiedTx {
            height,
            timestamp,
            position: 3,
        }
    }

    #[test]
    fn heights_and_confirmations() {
        let mut state = Verification::new();
        state.set_local_height(20);
        state.add_unverified([1; 32], 10);
        assert_eq!(state.tx_height(&[1; 32]).height, 10);
        assert_eq!(state.tx_height(&[1; 32]).confirmations, 0);
        assert_eq!(state.unverified_pending(), vec![([1; 32], 10)]);

        state.add_verified([1; 32], verified(10, 1_600));
        let height = state.tx_height(&[1; 32]);
        assert_eq!(height.confirmations, 11);
        assert_eq!(height.timestamp, 1_600);
        assert!(state.unverified_pending().is_empty());
        assert_eq!(state.tx_height(&[9; 32]), TxHeight::default());
    }

    #[test]
    fn zero_height_demotes_verified() {
        let mut state = Verification::new();
        state.add_verified([2; 32], verified(5, 1));
        assert!(!state.add_unverified([2; 32], 5));
        assert!(state.is_verified(&[2; 32]));
        assert!(state.add_unverified([2; 32], 0));
        assert!(!state.is_verified(&[2; 32]));
        assert_eq!(state.tx_height(&[2; 32]).height, 0);
    }

    #[test]
    fn txpos_orders_confirmed_before_mempool() {
        let mut state = Verification::new();
        state.add_verified([1; 32], verified(7, 1));
        state.add_unverified([2; 32], 0);
        state.add_unverified([3; 32], -1);
        assert!(state.txpos(&[1; 32]) < state.txpos(&[2; 32]));
        assert!(state.txpos(&[2; 32]) < state.txpos(&[3; 32]));
        assert!(state.txpos(&[3; 32]) <= state.txpos(&[4; 32]));
    }

    #[test]
    fn undo_keeps_entries_whose_header_still_matches() {
        let mut state = Verification::new();
        state.add_verified([1; 32], verified(99, 10));
        state.add_verified([2; 32], verified(100, 20));
        state.add_verified([3; 32], verified(101, 30));
        let undone = state.undo_verifications(100, |height| (height == 100).then_some(20));
        assert_eq!(undone, vec![[3; 32]]);
        assert!(state.is_verified(&[1; 32]));
        assert!(state.is_verified(&[2; 32]));
    }
}
