//! Transaction records with per-address received/spent indices.
//!
//! Spends whose funding output is not known yet are parked in [`PrunedSpends`] and
//! materialized when the funding transaction arrives, so the resulting indices do not
//! depend on delivery order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use slpwallet_consensus::{hash256_to_hex, Amount, Hash256};
use slpwallet_log::{log_debug, log_warn};
use slpwallet_primitives::{Address, OutPoint, Transaction};
use slpwallet_script::input_address;

use crate::error::WalletError;
use crate::pruned::PrunedSpends;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub raw: Vec<u8>,
    pub tx: Transaction,
}

impl TransactionRecord {
    pub fn from_raw(raw: Vec<u8>) -> Result<Self, WalletError> {
        let tx = Transaction::consensus_decode(&raw)?;
        Ok(Self { raw, tx })
    }

    pub fn from_transaction(tx: Transaction) -> Self {
        Self {
            raw: tx.consensus_encode(),
            tx,
        }
    }

    pub fn txid(&self) -> Hash256 {
        self.tx.txid()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReceivedOutput {
    pub index: u32,
    pub value: Amount,
    pub is_coinbase: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpentOutput {
    pub prevout: OutPoint,
    pub value: Amount,
}

/// Side effects of a ledger mutation the wallet propagates to caches and the janitor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerDelta {
    pub touched: BTreeSet<Address>,
    pub pruned_added: Vec<OutPoint>,
    pub pruned_resolved: Vec<OutPoint>,
}

/// Received outputs of one address and the spends consuming them.
#[derive(Clone, Debug, Default)]
pub struct AddressIo {
    pub received: Vec<(OutPoint, ReceivedOutput)>,
    /// `prevout -> spending txid`
    pub spent: BTreeMap<OutPoint, Hash256>,
}

pub type AddressMap<T> = BTreeMap<Address, Vec<T>>;

#[derive(Clone, Debug, Default)]
pub struct Ledger {
    pub(crate) transactions: HashMap<Hash256, TransactionRecord>,
    pub(crate) received: HashMap<Hash256, AddressMap<ReceivedOutput>>,
    pub(crate) spent: HashMap<Hash256, AddressMap<SpentOutput>>,
    pub(crate) pruned: PrunedSpends,
    by_address: HashMap<Address, BTreeSet<Hash256>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `record` under `txid`. Re-adding a transaction rebuilds its own entries and
    /// leaves the ledger unchanged. Returns `None` for transactions without inputs.
    pub fn add(
        &mut self,
        txid: Hash256,
        record: TransactionRecord,
        is_mine: impl Fn(&Address) -> bool,
    ) -> Option<LedgerDelta> {
        if record.tx.vin.is_empty() {
            log_warn!(
                "ignoring transaction {} with no inputs",
                hash256_to_hex(&txid)
            );
            return None;
        }

        let mut delta = LedgerDelta::default();
        let previous_received = self.received.remove(&txid).unwrap_or_default();
        let previous_spent = self.spent.remove(&txid).unwrap_or_default();

        let tx = &record.tx;
        let is_coinbase = tx.is_coinbase();
        let mut spent: AddressMap<SpentOutput> = BTreeMap::new();
        if !is_coinbase {
            for input in &tx.vin {
                let prevout = input.prevout;
                let resolved = match input_address(&input.script_sig) {
                    Some(address) if is_mine(&address) => {
                        delta.touched.insert(address);
                        self.received_value(&prevout, &address)
                            .map(|value| (address, value))
                    }
                    Some(_) => continue,
                    // Unrecognized scriptSig; the funding output may still be ours.
                    None => self
                        .find_in_received(&prevout)
                        .filter(|(address, _)| is_mine(address))
                        .inspect(|(address, _)| {
                            delta.touched.insert(*address);
                        }),
                };
                match resolved {
                    Some((address, value)) => {
                        spent
                            .entry(address)
                            .or_default()
                            .push(SpentOutput { prevout, value });
                    }
                    None => {
                        if self.pruned.put(prevout, txid) {
                            delta.pruned_added.push(prevout);
                        }
                    }
                }
            }
        }

        let mut received: AddressMap<ReceivedOutput> = BTreeMap::new();
        for (index, output) in tx.vout.iter().enumerate() {
            let index = index as u32;
            let outpoint = OutPoint::new(txid, index);
            let mine = Address::from_script_pubkey(&output.script_pubkey)
                .filter(|address| is_mine(address));
            if let Some(address) = mine {
                received.entry(address).or_default().push(ReceivedOutput {
                    index,
                    value: output.value,
                    is_coinbase,
                });
                delta.touched.insert(address);
            }
            let Some(spender) = self.pruned.pop(&outpoint) else {
                continue;
            };
            delta.pruned_resolved.push(outpoint);
            if let Some(address) = mine {
                self.spent
                    .entry(spender)
                    .or_default()
                    .entry(address)
                    .or_default()
                    .push(SpentOutput {
                        prevout: outpoint,
                        value: output.value,
                    });
                self.index(spender, address);
            }
        }

        for address in received.keys().chain(spent.keys()) {
            self.by_address.entry(*address).or_default().insert(txid);
        }
        if !received.is_empty() {
            self.received.insert(txid, received);
        }
        if !spent.is_empty() {
            self.spent.insert(txid, spent);
        }
        for address in previous_received.keys().chain(previous_spent.keys()) {
            self.reindex(&txid, address);
        }
        self.transactions.insert(txid, record);
        Some(delta)
    }

    /// Withdraws the contributions of `txid`. Spends by other transactions of its outputs
    /// become pruned again. The record itself is kept until it is unreferenced.
    pub fn remove(&mut self, txid: &Hash256) -> LedgerDelta {
        log_debug!("removing tx {} from history", hash256_to_hex(txid));
        let mut delta = LedgerDelta {
            pruned_resolved: self.pruned.remove_spender(txid),
            ..LedgerDelta::default()
        };

        let mut reindex = Vec::new();
        for (spender, by_address) in self.spent.iter_mut() {
            if spender == txid {
                continue;
            }
            for (address, spends) in by_address.iter_mut() {
                spends.retain(|spend| {
                    if spend.prevout.hash != *txid {
                        return true;
                    }
                    if self.pruned.put(spend.prevout, *spender) {
                        delta.pruned_added.push(spend.prevout);
                    }
                    delta.touched.insert(*address);
                    false
                });
                if spends.is_empty() {
                    reindex.push((*spender, *address));
                }
            }
            by_address.retain(|_, spends| !spends.is_empty());
        }
        self.spent.retain(|_, by_address| !by_address.is_empty());

        let received = self.received.remove(txid).unwrap_or_default();
        let spent = self.spent.remove(txid).unwrap_or_default();
        for address in received.keys().chain(spent.keys()) {
            delta.touched.insert(*address);
            reindex.push((*txid, *address));
        }
        for (txid, address) in reindex {
            self.reindex(&txid, &address);
        }
        delta
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.transactions.contains_key(txid)
    }

    pub fn transaction(&self, txid: &Hash256) -> Option<&TransactionRecord> {
        self.transactions.get(txid)
    }

    pub fn transactions(&self) -> impl Iterator<Item = (&Hash256, &TransactionRecord)> {
        self.transactions.iter()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn received(&self, txid: &Hash256) -> Option<&AddressMap<ReceivedOutput>> {
        self.received.get(txid)
    }

    pub fn spent(&self, txid: &Hash256) -> Option<&AddressMap<SpentOutput>> {
        self.spent.get(txid)
    }

    pub fn pruned(&self) -> &PrunedSpends {
        &self.pruned
    }

    /// Removes a pruned spend proven irrelevant.
    pub fn discard_pruned(&mut self, outpoint: &OutPoint) -> Option<Hash256> {
        self.pruned.pop(outpoint)
    }

    /// True when `txid` has entries for `address` in either index.
    pub fn touches(&self, txid: &Hash256, address: &Address) -> bool {
        self.received
            .get(txid)
            .is_some_and(|by_address| by_address.contains_key(address))
            || self
                .spent
                .get(txid)
                .is_some_and(|by_address| by_address.contains_key(address))
    }

    pub fn address_txids(&self, address: &Address) -> impl Iterator<Item = &Hash256> {
        self.by_address.get(address).into_iter().flatten()
    }

    pub fn address_io(&self, address: &Address) -> AddressIo {
        let mut io = AddressIo::default();
        for txid in self.address_txids(address) {
            if let Some(outputs) = self.received.get(txid).and_then(|m| m.get(address)) {
                io.received.extend(
                    outputs
                        .iter()
                        .map(|output| (OutPoint::new(*txid, output.index), *output)),
                );
            }
            if let Some(spends) = self.spent.get(txid).and_then(|m| m.get(address)) {
                for spend in spends {
                    io.spent.insert(spend.prevout, *txid);
                }
            }
        }
        io
    }

    pub fn received_value(&self, outpoint: &OutPoint, address: &Address) -> Option<Amount> {
        self.received
            .get(&outpoint.hash)?
            .get(address)?
            .iter()
            .find(|output| output.index == outpoint.index)
            .map(|output| output.value)
    }

    pub fn find_in_received(&self, outpoint: &OutPoint) -> Option<(Address, Amount)> {
        self.received
            .get(&outpoint.hash)?
            .iter()
            .find_map(|(address, outputs)| {
                outputs
                    .iter()
                    .find(|output| output.index == outpoint.index)
                    .map(|output| (*address, output.value))
            })
    }

    /// True while `txid` has spends whose funding outputs are not matched yet.
    pub fn has_pruned_spends(&self, txid: &Hash256) -> bool {
        self.pruned.contains_spender(txid)
    }

    /// Drops transaction records for which `keep` is false and that no index references.
    pub fn prune_unreferenced(&mut self, keep: impl Fn(&Hash256) -> bool) -> usize {
        let referenced: BTreeSet<Hash256> = self
            .received
            .keys()
            .chain(self.spent.keys())
            .copied()
            .chain(self.pruned.iter().map(|(_, spender)| *spender))
            .collect();
        let before = self.transactions.len();
        self.transactions
            .retain(|txid, _| referenced.contains(txid) || keep(txid));
        before - self.transactions.len()
    }

    /// Clears every index while keeping transaction records.
    pub fn clear_indices(&mut self) {
        self.received.clear();
        self.spent.clear();
        self.pruned.clear();
        self.by_address.clear();
    }

    pub(crate) fn insert_record(&mut self, txid: Hash256, record: TransactionRecord) {
        self.transactions.insert(txid, record);
    }

    pub(crate) fn rebuild_address_index(&mut self) {
        self.by_address.clear();
        let received = self
            .received
            .iter()
            .flat_map(|(txid, by_address)| {
                by_address.keys().map(move |address| (*txid, *address))
            });
        let spent = self
            .spent
            .iter()
            .flat_map(|(txid, by_address)| {
                by_address.keys().map(move |address| (*txid, *address))
            });
        let pairs: Vec<(Hash256, Address)> = received.chain(spent).collect();
        for (txid, address) in pairs {
            self.index(txid, address);
        }
    }

    /// Removes every received and spent entry filed under `address`. Records stay.
    pub fn drop_address(&mut self, address: &Address) {
        for by_address in self.received.values_mut() {
            by_address.remove(address);
        }
        self.received.retain(|_, by_address| !by_address.is_empty());
        for by_address in self.spent.values_mut() {
            by_address.remove(address);
        }
        self.spent.retain(|_, by_address| !by_address.is_empty());
        self.by_address.remove(address);
    }

    /// Withdraws `txid` like [`Ledger::remove`] and drops its record as well.
    pub fn forget(&mut self, txid: &Hash256) -> LedgerDelta {
        let delta = self.remove(txid);
        self.transactions.remove(txid);
        delta
    }

    fn index(&mut self, txid: Hash256, address: Address) {
        self.by_address.entry(address).or_default().insert(txid);
    }

    fn reindex(&mut self, txid: &Hash256, address: &Address) {
        if self.touches(txid, address) {
            self.index(*txid, *address);
            return;
        }
        if let Some(txids) = self.by_address.get_mut(address) {
            txids.remove(txid);
            if txids.is_empty() {
                self.by_address.remove(address);
            }
        }
    }
}
