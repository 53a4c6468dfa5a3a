//! Spends recorded before the output they consume could be matched to the wallet.

use std::collections::HashMap;

use slpwallet_consensus::Hash256;
use slpwallet_primitives::OutPoint;

/// `outpoint -> spending txid`, plus a count of entries per spending txid so
/// "does this tx still have unresolved spends" is a single lookup.
#[derive(Clone, Debug, Default)]
pub struct PrunedSpends {
    spends: HashMap<OutPoint, Hash256>,
    spenders: HashMap<Hash256, usize>,
}

impl PrunedSpends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spends.is_empty()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Hash256> {
        self.spends.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.spends.contains_key(outpoint)
    }

    pub fn contains_spender(&self, txid: &Hash256) -> bool {
        self.spenders.contains_key(txid)
    }

    /// Returns true when `outpoint` was not already pruned.
    pub fn put(&mut self, outpoint: OutPoint, spender: Hash256) -> bool {
        match self.spends.insert(outpoint, spender) {
            Some(previous) if previous == spender => false,
            Some(previous) => {
                self.release(&previous);
                *self.spenders.entry(spender).or_insert(0) += 1;
                false
            }
            None => {
                *self.spenders.entry(spender).or_insert(0) += 1;
                true
            }
        }
    }

    pub fn pop(&mut self, outpoint: &OutPoint) -> Option<Hash256> {
        let spender = self.spends.remove(outpoint)?;
        self.release(&spender);
        Some(spender)
    }

    /// Drops every entry recorded for `spender`, returning the outpoints removed.
    pub fn remove_spender(&mut self, spender: &Hash256) -> Vec<OutPoint> {
        if !self.spenders.contains_key(spender) {
            return Vec::new();
        }
        let outpoints: Vec<OutPoint> = self
            .spends
            .iter()
            .filter(|(_, txid)| *txid == spender)
            .map(|(outpoint, _)| *outpoint)
            .collect();
        for outpoint in &outpoints {
            self.spends.remove(outpoint);
        }
        self.spenders.remove(spender);
        outpoints
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Hash256)> {
        self.spends.iter()
    }

    pub fn clear(&mut self) {
        self.spends.clear();
        self.spenders.clear();
    }

    /// True when the spender counts equal the value multiset of the mapping.
    pub fn is_consistent(&self) -> bool {
        let mut counts: HashMap<Hash256, usize> = HashMap::new();
        for spender in self.spends.values() {
            *counts.entry(*spender).or_insert(0) += 1;
        }
        counts == self.spenders
    }

    fn release(&mut self, spender: &Hash256) {
        if let Some(count) = self.spenders.get_mut(spender) {
            *count -= 1;
            if *count == 0 {
                self.spenders.remove(spender);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(byte: u8, index: u32) -> OutPoint {
        OutPoint::new([byte; 32], index)
    }

    #[test]
    fn spender_counts_follow_the_mapping() {
        let mut pruned = PrunedSpends::new();
        assert!(pruned.put(outpoint(1, 0), [9; 32]));
        assert!(pruned.put(outpoint(1, 1), [9; 32]));
        assert!(!pruned.put(outpoint(1, 1), [9; 32]));
        assert!(pruned.contains_spender(&[9; 32]));
        assert!(pruned.is_consistent());

        assert_eq!(pruned.pop(&outpoint(1, 0)), Some([9; 32]));
        assert!(pruned.contains_spender(&[9; 32]));
        assert_eq!(pruned.pop(&outpoint(1, 1)), Some([9; 32]));
        assert!(!pruned.contains_spender(&[9; 32]));
        assert!(pruned.is_empty());
        assert!(pruned.is_consistent());
    }

    #[test]
    fn replacing_a_spender_moves_the_count() {
        let mut pruned = PrunedSpends::new();
        pruned.put(outpoint(2, 0), [7; 32]);
        pruned.put(outpoint(2, 0), [8; 32]);
        assert!(!pruned.contains_spender(&[7; 32]));
        assert!(pruned.contains_spender(&[8; 32]));
        assert!(pruned.is_consistent());
    }

    #[test]
    fn remove_spender_drops_all_its_entries() {
        let mut pruned = PrunedSpends::new();
        pruned.put(outpoint(3, 0), [5; 32]);
        pruned.put(outpoint(3, 1), [5; 32]);
        pruned.put(outpoint(4, 0), [6; 32]);
        let mut removed = pruned.remove_spender(&[5; 32]);
        removed.sort();
        assert_eq!(removed, vec![outpoint(3, 0), outpoint(3, 1)]);
        assert_eq!(pruned.len(), 1);
        assert!(pruned.is_consistent());
    }
}
