//! Address histories reported by the sync source and the per-transaction views derived
//! from them.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use slpwallet_consensus::{Amount, Hash256};
use slpwallet_primitives::{Address, OutPoint, Transaction};
use slpwallet_script::input_address;

use crate::state::WalletState;
use crate::token::{TokenQuantity, Validity};

#[derive(Clone, Debug, Default)]
pub struct HistoryIndex {
    by_address: BTreeMap<Address, Vec<(Hash256, i32)>>,
    by_tx: HashMap<Hash256, BTreeSet<Address>>,
    pub(crate) fees: HashMap<Hash256, Amount>,
}

impl HistoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `history` for `address`. Returns the txids that no address references
    /// anymore.
    pub fn replace(&mut self, address: Address, history: Vec<(Hash256, i32)>) -> Vec<Hash256> {
        let keep: BTreeSet<Hash256> = history.iter().map(|(txid, _)| *txid).collect();
        let mut orphaned = Vec::new();
        if let Some(previous) = self.by_address.get(&address) {
            for (txid, _) in previous {
                if keep.contains(txid) {
                    continue;
                }
                let Some(addresses) = self.by_tx.get_mut(txid) else {
                    continue;
                };
                addresses.remove(&address);
                if addresses.is_empty() {
                    self.by_tx.remove(txid);
                    orphaned.push(*txid);
                }
            }
        }
        for txid in &keep {
            self.by_tx.entry(*txid).or_default().insert(address);
        }
        self.by_address.insert(address, history);
        orphaned
    }

    pub fn address_history(&self, address: &Address) -> &[(Hash256, i32)] {
        self.by_address
            .get(address)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn addresses_of(&self, txid: &Hash256) -> Option<&BTreeSet<Address>> {
        self.by_tx.get(txid)
    }

    pub fn contains_address(&self, address: &Address) -> bool {
        self.by_address.contains_key(address)
    }

    pub fn is_used(&self, address: &Address) -> bool {
        !self.address_history(address).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Vec<(Hash256, i32)>)> {
        self.by_address.iter()
    }

    /// Every `(txid, height)` pair across addresses.
    pub fn entries(&self) -> impl Iterator<Item = (Hash256, i32)> + '_ {
        self.by_address.values().flatten().copied()
    }

    pub fn fee(&self, txid: &Hash256) -> Option<Amount> {
        self.fees.get(txid).copied()
    }

    pub fn fees(&self) -> impl Iterator<Item = (&Hash256, &Amount)> {
        self.fees.iter()
    }

    /// Drops histories of addresses for which `keep` is false. Returns how many went.
    pub fn retain_addresses(&mut self, keep: impl Fn(&Address) -> bool) -> usize {
        let dropped: Vec<Address> = self
            .by_address
            .keys()
            .filter(|address| !keep(address))
            .copied()
            .collect();
        for address in &dropped {
            self.remove_address(address);
        }
        dropped.len()
    }

    /// Drops the history of `address`. Returns the txids no other address refers to.
    pub fn remove_address(&mut self, address: &Address) -> Vec<Hash256> {
        let Some(history) = self.by_address.remove(address) else {
            return Vec::new();
        };
        let mut orphaned = Vec::new();
        for (txid, _) in history {
            let Some(addresses) = self.by_tx.get_mut(&txid) else {
                continue;
            };
            addresses.remove(address);
            if addresses.is_empty() {
                self.by_tx.remove(&txid);
                orphaned.push(txid);
            }
        }
        orphaned
    }

    pub fn clear(&mut self) {
        self.by_address.clear();
        self.by_tx.clear();
        self.fees.clear();
    }
}

/// Effect of a transaction on the wallet as a whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletDelta {
    pub is_relevant: bool,
    pub is_mine: bool,
    pub value: Amount,
    /// Known only when every input is ours and resolved.
    pub fee: Option<Amount>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryItem {
    pub txid: Hash256,
    pub height: i32,
    pub confirmations: i32,
    pub timestamp: u32,
    pub delta: Option<Amount>,
    /// Balance after this transaction; unknown below a transaction with unknown delta.
    pub balance: Option<Amount>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenHistoryItem {
    pub txid: Hash256,
    pub height: i32,
    pub confirmations: i32,
    pub timestamp: u32,
    pub delta: i128,
}

impl WalletState {
    /// Net value `txid` moves into `address`; `None` while spends of it are pruned.
    pub fn tx_delta(&self, txid: &Hash256, address: &Address) -> Option<Amount> {
        if self.ledger.has_pruned_spends(txid) {
            return None;
        }
        let spent: Amount = self
            .ledger
            .spent(txid)
            .and_then(|by_address| by_address.get(address))
            .map(|spends| spends.iter().map(|spend| spend.value).sum())
            .unwrap_or(0);
        let received: Amount = self
            .ledger
            .received(txid)
            .and_then(|by_address| by_address.get(address))
            .map(|outputs| outputs.iter().map(|output| output.value).sum())
            .unwrap_or(0);
        Some(received - spent)
    }

    pub fn wallet_delta(&self, tx: &Transaction) -> WalletDelta {
        let mut is_relevant = false;
        let mut is_mine = false;
        let mut is_pruned = false;
        let mut is_partial = false;
        let mut v_in: Amount = 0;
        for input in &tx.vin {
            let address = input_address(&input.script_sig).or_else(|| {
                self.ledger
                    .find_in_received(&input.prevout)
                    .map(|(address, _)| address)
            });
            match address {
                Some(address) if self.is_mine(&address) => {
                    is_mine = true;
                    is_relevant = true;
                    match self.ledger.received_value(&input.prevout, &address) {
                        Some(value) => v_in += value,
                        None => is_pruned = true,
                    }
                }
                _ => is_partial = true,
            }
        }
        if !is_mine {
            is_partial = false;
        }
        let mut v_out: Amount = 0;
        let mut v_out_mine: Amount = 0;
        for output in &tx.vout {
            v_out += output.value;
            let mine = Address::from_script_pubkey(&output.script_pubkey)
                .is_some_and(|address| self.is_mine(&address));
            if mine {
                v_out_mine += output.value;
                is_relevant = true;
            }
        }
        let (value, fee) = if is_pruned {
            let value = if is_mine { v_out_mine - v_out } else { v_out_mine };
            (value, None)
        } else {
            let fee = (!is_partial).then_some(v_in - v_out);
            (v_out_mine - v_in, fee)
        };
        WalletDelta {
            is_relevant,
            is_mine,
            value,
            fee: if is_mine { fee } else { None },
        }
    }

    /// Wallet history over `domain`, oldest first, with the running balance.
    pub fn history(&mut self, domain: Option<&[Address]>) -> Vec<HistoryItem> {
        let domain = match domain {
            Some(domain) => domain.to_vec(),
            None => self.addresses.addresses(),
        };
        let mut deltas: HashMap<Hash256, Option<Amount>> = HashMap::new();
        for address in &domain {
            for (txid, _) in self.history.address_history(address) {
                let delta = self.tx_delta(txid, address);
                let entry = deltas.entry(*txid).or_insert(Some(0));
                *entry = match (*entry, delta) {
                    (Some(total), Some(delta)) => Some(total + delta),
                    _ => None,
                };
            }
        }

        let mut items: Vec<HistoryItem> = deltas
            .into_iter()
            .map(|(txid, delta)| {
                let height = self.verification.tx_height(&txid);
                HistoryItem {
                    txid,
                    height: height.height,
                    confirmations: height.confirmations,
                    timestamp: height.timestamp,
                    delta,
                    balance: None,
                }
            })
            .collect();
        items.sort_by(|a, b| {
            let a_key = (self.verification.txpos(&a.txid), a.txid);
            let b_key = (self.verification.txpos(&b.txid), b.txid);
            b_key.cmp(&a_key)
        });

        let mut balance = Some(self.wallet_balance(Some(&domain), false, false).total());
        for item in &mut items {
            item.balance = balance;
            balance = match (balance, item.delta) {
                (Some(balance), Some(delta)) => Some(balance - delta),
                _ => None,
            };
        }
        items.reverse();
        items
    }

    /// Per-token quantity deltas of transactions whose token validity is in
    /// `validities`. Spends of token outputs count against the spending transaction.
    pub fn token_histories(
        &self,
        domain: Option<&[Address]>,
        validities: &[Validity],
    ) -> BTreeMap<Hash256, Vec<TokenHistoryItem>> {
        let domain = match domain {
            Some(domain) => domain.to_vec(),
            None => self.addresses.addresses(),
        };
        let considered = |txid: &Hash256| {
            self.tokens
                .validity(txid)
                .is_some_and(|validity| validities.contains(&validity))
        };
        let mut deltas: BTreeMap<Hash256, BTreeMap<Hash256, i128>> = BTreeMap::new();
        for address in &domain {
            let outputs = self.tokens.outputs.get(address);
            for (txid, _) in self.history.address_history(address) {
                if self.ledger.has_pruned_spends(txid) {
                    continue;
                }
                if considered(txid) {
                    let received = outputs.into_iter().flat_map(|by_outpoint| {
                        by_outpoint.range(OutPoint::new(*txid, 0)..=OutPoint::new(*txid, u32::MAX))
                    });
                    for (_, output) in received {
                        if let (Some(token_id), TokenQuantity::Amount(quantity)) =
                            (output.token_id, output.quantity)
                        {
                            *deltas.entry(token_id).or_default().entry(*txid).or_default() +=
                                i128::from(quantity);
                        }
                    }
                }
                let spends = self
                    .ledger
                    .spent(txid)
                    .and_then(|by_address| by_address.get(address))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for spend in spends {
                    if !considered(&spend.prevout.hash) {
                        continue;
                    }
                    let Some(output) = self.tokens.output(address, &spend.prevout) else {
                        continue;
                    };
                    if let (Some(token_id), TokenQuantity::Amount(quantity)) =
                        (output.token_id, output.quantity)
                    {
                        *deltas.entry(token_id).or_default().entry(*txid).or_default() -=
                            i128::from(quantity);
                    }
                }
            }
        }

        deltas
            .into_iter()
            .map(|(token_id, by_tx)| {
                let mut items: Vec<TokenHistoryItem> = by_tx
                    .into_iter()
                    .map(|(txid, delta)| {
                        let height = self.verification.tx_height(&txid);
                        TokenHistoryItem {
                            txid,
                            height: height.height,
                            confirmations: height.confirmations,
                            timestamp: height.timestamp,
                            delta,
                        }
                    })
                    .collect();
                items.sort_by_key(|item| (self.verification.txpos(&item.txid), item.txid));
                (token_id, items)
            })
            .collect()
    }
}
