//! The lock-protected wallet state and the mutations the sync source drives.
//!
//! Every method here runs with the wallet mutex held. Side effects meant for the
//! outside world (events, validation submissions) are queued in [`Outbox`] and
//! dispatched by [`crate::Wallet`] after the lock is released.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use slpwallet_consensus::{hash256_to_hex, Amount, Hash256};
use slpwallet_log::{log_debug, log_info};
use slpwallet_primitives::{Address, Transaction};

use crate::addresses::AddressBook;
use crate::balance::{compute_balance, Balance, BalanceCache};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::freeze::FreezeState;
use crate::history::HistoryIndex;
use crate::janitor::JanitorMessage;
use crate::ledger::{Ledger, LedgerDelta, TransactionRecord};
use crate::token::{TokenClass, TokenState, Validity};
use crate::verify::{TxHeight, Verification, VerifiedTx};

pub(crate) struct PendingValidation {
    pub txid: Hash256,
    pub tx: Transaction,
    pub class: TokenClass,
    pub token_id: Hash256,
}

#[derive(Default)]
pub(crate) struct Outbox {
    pub events: Vec<WalletEvent>,
    pub validations: Vec<PendingValidation>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.validations.is_empty()
    }
}

pub struct WalletState {
    pub(crate) config: WalletConfig,
    pub(crate) addresses: AddressBook,
    pub(crate) ledger: Ledger,
    pub(crate) history: HistoryIndex,
    pub(crate) verification: Verification,
    pub(crate) balances: BalanceCache,
    pub(crate) freeze: FreezeState,
    pub(crate) tokens: TokenState,
    pub(crate) janitor: Option<Sender<JanitorMessage>>,
    pub(crate) outbox: Outbox,
}

impl WalletState {
    pub fn new(config: WalletConfig, addresses: AddressBook) -> Self {
        let tokens = TokenState::new(config.tokens_enabled);
        Self {
            config,
            addresses,
            ledger: Ledger::new(),
            history: HistoryIndex::new(),
            verification: Verification::new(),
            balances: BalanceCache::new(),
            freeze: FreezeState::default(),
            tokens,
            janitor: None,
            outbox: Outbox::default(),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn addresses(&self) -> &AddressBook {
        &self.addresses
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn tokens(&self) -> &TokenState {
        &self.tokens
    }

    pub fn verification(&self) -> &Verification {
        &self.verification
    }

    pub fn history_index(&self) -> &HistoryIndex {
        &self.history
    }

    pub fn freeze(&self) -> &FreezeState {
        &self.freeze
    }

    pub fn is_mine(&self, address: &Address) -> bool {
        self.addresses.is_mine(address)
    }

    pub fn local_height(&self) -> i32 {
        self.verification.local_height()
    }

    /// Indexes a transaction and runs the token classifier on it. Returns false when
    /// the transaction was rejected.
    pub fn add_transaction(&mut self, txid: Hash256, record: TransactionRecord) -> bool {
        let addresses = &self.addresses;
        let Some(delta) = self.ledger.add(txid, record, |address| addresses.is_mine(address))
        else {
            return false;
        };
        self.apply_delta(delta);
        if let Some(record) = self.ledger.transaction(&txid) {
            let addresses = &self.addresses;
            self.tokens
                .classify(txid, &record.tx, |address| addresses.is_mine(address));
        }
        true
    }

    pub fn remove_transaction(&mut self, txid: &Hash256) {
        let delta = self.ledger.remove(txid);
        self.apply_delta(delta);
        self.tokens.remove_transaction(txid);
        self.history.fees.remove(txid);
    }

    /// Removes `txid` together with its record, heights and fee hint.
    fn forget_transaction(&mut self, txid: &Hash256) {
        let delta = self.ledger.forget(txid);
        self.apply_delta(delta);
        self.tokens.remove_transaction(txid);
        self.history.fees.remove(txid);
        self.verification.forget(txid);
    }

    fn apply_delta(&mut self, delta: LedgerDelta) {
        self.balances.invalidate_all(&delta.touched);
        let Some(janitor) = &self.janitor else {
            return;
        };
        // A stopped janitor drops its receiver; nothing left to notify.
        for outpoint in delta.pruned_added {
            let _ = janitor.send(JanitorMessage::Added(outpoint));
        }
        for outpoint in delta.pruned_resolved {
            let _ = janitor.send(JanitorMessage::Removed(outpoint));
        }
    }

    /// A transaction delivered by the sync source together with its mempool or block
    /// height.
    pub fn receive_transaction(
        &mut self,
        txid: Hash256,
        record: TransactionRecord,
        height: i32,
    ) -> bool {
        let added = self.add_transaction(txid, record);
        if added {
            self.add_unverified_tx(txid, height);
        }
        added
    }

    /// Replaces the history of `address`. Transactions no address refers to anymore
    /// leave the ledger; stored transactions newly relevant to `address` are re-indexed.
    pub fn receive_history(
        &mut self,
        address: Address,
        history: Vec<(Hash256, i32)>,
        fees: HashMap<Hash256, Amount>,
    ) {
        let orphaned = self.history.replace(address, history.clone());
        for txid in &orphaned {
            self.remove_transaction(txid);
        }
        self.balances.invalidate(&address);
        for (txid, height) in &history {
            self.add_unverified_tx(*txid, *height);
            if self.ledger.touches(txid, &address) {
                continue;
            }
            if let Some(record) = self.ledger.transaction(txid).cloned() {
                self.add_transaction(*txid, record);
            }
        }
        self.history.fees.extend(fees);
        self.outbox
            .events
            .push(WalletEvent::HistoryUpdated { address });
    }

    pub fn add_unverified_tx(&mut self, txid: Hash256, height: i32) {
        let before = self.verification.tx_height(&txid).height;
        self.verification.add_unverified(txid, height);
        if self.verification.tx_height(&txid).height != before {
            self.invalidate_received(&txid);
        }
    }

    pub fn add_verified_tx(&mut self, txid: Hash256, info: VerifiedTx) {
        let before = self.verification.tx_height(&txid).height;
        self.verification.add_verified(txid, info);
        if info.height != before {
            self.invalidate_received(&txid);
        }
        self.outbox.events.push(WalletEvent::Verified {
            txid,
            height: info.height,
            timestamp: info.timestamp,
        });
    }

    pub fn tx_height(&self, txid: &Hash256) -> TxHeight {
        self.verification.tx_height(txid)
    }

    /// Rolls back verifications invalidated by a reorg at `height`. The balance cache is
    /// dropped entirely when anything was undone.
    pub fn undo_verifications(
        &mut self,
        height: i32,
        header_timestamp: impl Fn(i32) -> Option<u32>,
    ) -> Vec<Hash256> {
        let undone = self
            .verification
            .undo_verifications(height, header_timestamp);
        if !undone.is_empty() {
            self.balances.clear();
        }
        undone
    }

    pub fn set_local_height(&mut self, height: i32) {
        self.verification.set_local_height(height);
    }

    fn invalidate_received(&mut self, txid: &Hash256) {
        if let Some(by_address) = self.ledger.received(txid) {
            self.balances.invalidate_all(by_address.keys());
        }
    }

    /// Seeds the unverified map from stored history so the verifier picks it up.
    pub fn prepare_for_verifier(&mut self) {
        for (txid, height) in self.history.entries() {
            self.verification.add_unverified(txid, height);
        }
    }

    /// Drops history of addresses that are not ours and indexes stored transactions
    /// that history references but the ledger has no entries for. Returns true if
    /// anything changed.
    pub fn check_history(&mut self) -> bool {
        let addresses = &self.addresses;
        let mut changed = self
            .history
            .retain_addresses(|address| addresses.is_mine(address))
            > 0;
        let referenced: Vec<Hash256> = self.history.entries().map(|(txid, _)| txid).collect();
        for txid in referenced {
            if self.ledger.has_pruned_spends(&txid)
                || self.ledger.received(&txid).is_some()
                || self.ledger.spent(&txid).is_some()
            {
                continue;
            }
            if let Some(record) = self.ledger.transaction(&txid).cloned() {
                changed |= self.add_transaction(txid, record);
            }
        }
        changed
    }

    /// Forgets all indices, history and cached balances. Transaction records stay.
    pub fn clear_history(&mut self) {
        self.ledger.clear_indices();
        self.history.clear();
        self.balances.clear();
    }

    /// Resets the wallet to a fresh sync: records, verification, token data and the
    /// derived address lists beyond the gap limits are discarded.
    pub fn rebuild_history(&mut self) {
        self.ledger = Ledger::new();
        self.verification.clear();
        self.tokens = TokenState::new(self.config.tokens_enabled);
        self.clear_history();
        self.addresses
            .truncate(self.config.gap_limit, self.config.gap_limit_for_change);
        log_info!("wallet history reset for rebuild");
    }

    /// Records a validator verdict and announces it.
    pub fn apply_validity(&mut self, txid: &Hash256, validity: Validity) -> bool {
        let Some(info) = self.tokens.apply_validity(txid, validity) else {
            log_debug!(
                "ignoring validity {:?} for tx {}",
                validity,
                hash256_to_hex(txid)
            );
            return false;
        };
        self.outbox.events.push(WalletEvent::TokenValidityChanged {
            txid: *txid,
            token_id: info.token_id,
            validity: info.validity,
        });
        true
    }

    /// Re-submits every unresolved token transaction.
    pub fn activate_tokens(&mut self) -> usize {
        self.tokens.reactivate()
    }

    /// Recomputes token outputs and token info from every stored transaction.
    pub fn rebuild_tokens(&mut self) {
        self.tokens.clear_derived();
        let addresses = &self.addresses;
        let mut txids: Vec<&Hash256> = self.ledger.transactions.keys().collect();
        txids.sort();
        for txid in txids {
            let tx = &self.ledger.transactions[txid].tx;
            self.tokens
                .classify(*txid, tx, |address| addresses.is_mine(address));
        }
    }

    /// Extends deterministic address lists to the gap limits.
    pub fn synchronize(&mut self) -> Result<Vec<Address>, WalletError> {
        let history = &self.history;
        self.addresses.synchronize(
            self.config.gap_limit,
            self.config.gap_limit_for_change,
            |address| history.is_used(address),
        )
    }

    /// Derives a fresh change address. `None` for wallets without a deriver.
    pub fn derive_change_address(&mut self) -> Result<Option<Address>, WalletError> {
        let derived = self.addresses.derive_change_address()?;
        if let Some(address) = derived {
            self.outbox
                .events
                .push(WalletEvent::AddressAdded { address });
        }
        Ok(derived)
    }

    /// Adds an address to an imported wallet. The sync source is told to follow it.
    pub fn import_address(&mut self, address: Address) -> Result<bool, WalletError> {
        if !self.addresses.import_address(address)? {
            return Ok(false);
        }
        self.balances.invalidate(&address);
        self.outbox
            .events
            .push(WalletEvent::AddressAdded { address });
        Ok(true)
    }

    /// Removes an address from an imported wallet along with its history. Transactions
    /// no remaining address refers to leave the wallet entirely; shared ones only lose
    /// the entries filed under `address`.
    pub fn delete_address(&mut self, address: &Address) -> Result<bool, WalletError> {
        if !self.addresses.delete_address(address)? {
            return Ok(false);
        }
        for (outpoint, _) in self.ledger.address_io(address).received {
            self.freeze.coins.remove(&outpoint);
        }
        self.freeze.addresses.remove(address);
        self.ledger.drop_address(address);
        self.tokens.outputs.remove(address);

        let orphaned = self.history.remove_address(address);
        for txid in &orphaned {
            self.forget_transaction(txid);
        }
        self.balances.invalidate(address);
        log_info!(
            "deleted address {address}; {} transactions left the wallet",
            orphaned.len()
        );
        self.outbox.events.push(WalletEvent::AddressRemoved {
            address: *address,
        });
        Ok(true)
    }

    pub fn balance(&mut self, address: &Address, exclude_frozen_coins: bool) -> Balance {
        if !exclude_frozen_coins {
            if let Some(balance) = self.balances.get(address) {
                return balance;
            }
        }
        let io = self.ledger.address_io(address);
        let verification = &self.verification;
        let computed = compute_balance(
            &io,
            |txid| verification.tx_height(txid).height,
            verification.local_height(),
            self.config.coinbase_maturity,
            exclude_frozen_coins.then_some(&self.freeze.coins),
        );
        if !exclude_frozen_coins {
            self.balances.store(*address, computed);
        }
        computed.balance
    }

    /// Sum over `domain` (all addresses when `None`).
    pub fn wallet_balance(
        &mut self,
        domain: Option<&[Address]>,
        exclude_frozen_coins: bool,
        exclude_frozen_addresses: bool,
    ) -> Balance {
        let domain = match domain {
            Some(domain) => domain.to_vec(),
            None => self.addresses.addresses(),
        };
        let mut total = Balance::default();
        for address in &domain {
            if exclude_frozen_addresses && self.freeze.addresses.contains(address) {
                continue;
            }
            total += self.balance(address, exclude_frozen_coins);
        }
        total
    }

    /// Moves queued events and validation jobs out for dispatch.
    pub(crate) fn take_outbox(&mut self) -> Outbox {
        for job in self.tokens.drain_jobs() {
            match self.ledger.transaction(&job.txid) {
                Some(record) => self.outbox.validations.push(PendingValidation {
                    txid: job.txid,
                    tx: record.tx.clone(),
                    class: job.class,
                    token_id: job.token_id,
                }),
                None => self.tokens.forget_pending(&job.txid),
            }
        }
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::tests::{mine, other, pay};
    use slpwallet_primitives::OutPoint;

    pub(crate) fn state() -> WalletState {
        WalletState::new(WalletConfig::default(), AddressBook::imported(vec![mine()]))
    }

    pub(crate) fn record(tx: Transaction) -> (Hash256, TransactionRecord) {
        (tx.txid(), TransactionRecord::from_transaction(tx))
    }

    #[test]
    fn balance_follows_heights_and_spends() {
        let mut state = state();
        let funding = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 100_000)], 0);
        let (funding_id, funding_record) = record(funding);
        assert!(state.receive_transaction(funding_id, funding_record, 10));
        state.set_local_height(20);
        assert_eq!(state.balance(&mine(), false), Balance::new(100_000, 0, 0));

        let spend = pay(
            &[OutPoint::new(funding_id, 0)],
            &[(other(), 59_000), (mine(), 40_000)],
            0,
        );
        let (spend_id, spend_record) = record(spend);
        state.receive_transaction(spend_id, spend_record, 0);
        assert_eq!(state.balance(&mine(), false), Balance::new(0, 40_000, 0));
        assert_eq!(state.balance(&mine(), false), Balance::new(0, 40_000, 0));
    }

    #[test]
    fn history_replacement_orphans_dropped_transactions() {
        let mut state = state();
        let tx = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let (txid, record) = record(tx);
        state.receive_history(mine(), vec![(txid, 0)], HashMap::new());
        state.receive_transaction(txid, record, 0);
        assert_eq!(state.balance(&mine(), false).total(), 5_000);

        state.receive_history(mine(), vec![(txid, 12)], HashMap::new());
        assert!(state.ledger().received(&txid).is_some());
        assert_eq!(state.tx_height(&txid).height, 12);

        state.receive_history(mine(), Vec::new(), HashMap::new());
        assert!(state.ledger().received(&txid).is_none());
        assert_eq!(state.balance(&mine(), false).total(), 0);
        let outbox = state.take_outbox();
        assert_eq!(outbox.events.len(), 3);
    }

    #[test]
    fn reorg_clears_cache_and_unconfirms() {
        let mut state = state();
        let tx = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let (txid, record) = record(tx);
        state.receive_transaction(txid, record, 50);
        state.add_verified_tx(
            txid,
            VerifiedTx {
                height: 50,
                timestamp: 1_000,
                position: 1,
            },
        );
        state.set_local_height(60);
        assert_eq!(state.balance(&mine(), false).confirmed, 5_000);
        assert_eq!(state.tx_height(&txid).confirmations, 11);

        let undone = state.undo_verifications(45, |_| None);
        assert_eq!(undone, vec![txid]);
        assert!(state.balances.is_empty());
        assert_eq!(state.tx_height(&txid), TxHeight::default());
        assert_eq!(state.balance(&mine(), false).unconfirmed, 5_000);
    }

    #[test]
    fn rejected_transactions_leave_no_height_behind() {
        let mut state = state();
        let (txid, record) = record(pay(&[], &[(mine(), 1_000)], 0));
        assert!(!state.receive_transaction(txid, record, 12));
        assert_eq!(state.tx_height(&txid), TxHeight::default());
        assert!(state.verification().unverified_pending().is_empty());
    }

    #[test]
    fn deleting_an_address_forgets_what_only_it_referred_to() {
        let mut state = state();
        assert_eq!(state.derive_change_address().expect("derive"), None);
        assert!(state.import_address(other()).expect("import"));
        assert!(!state.import_address(other()).expect("import again"));
        assert!(state.is_mine(&other()));

        let own = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let shared = pay(
            &[OutPoint::new([8; 32], 0)],
            &[(mine(), 1_000), (other(), 2_000)],
            0,
        );
        let theirs = pay(&[OutPoint::new([7; 32], 0)], &[(other(), 3_000)], 0);
        let (own_id, own_record) = record(own);
        let (shared_id, shared_record) = record(shared);
        let (theirs_id, theirs_record) = record(theirs);
        state.receive_history(mine(), vec![(own_id, 5), (shared_id, 6)], HashMap::new());
        state.receive_history(
            other(),
            vec![(shared_id, 6), (theirs_id, 7)],
            HashMap::from([(theirs_id, 250)]),
        );
        state.receive_transaction(own_id, own_record, 5);
        state.receive_transaction(shared_id, shared_record, 6);
        state.receive_transaction(theirs_id, theirs_record, 7);
        state.set_frozen_state(&[other()], true).expect("freeze");
        state.set_frozen_coin_state(&[OutPoint::new(theirs_id, 0)], true);
        state.set_local_height(10);
        assert_eq!(state.balance(&other(), false).total(), 5_000);

        assert!(state.delete_address(&other()).expect("delete"));
        assert!(!state.is_mine(&other()));
        assert!(!state.ledger().contains(&theirs_id));
        assert_eq!(state.tx_height(&theirs_id), TxHeight::default());
        assert_eq!(state.history_index().fee(&theirs_id), None);
        assert!(state.ledger().contains(&shared_id));
        assert!(state
            .ledger()
            .received(&shared_id)
            .is_some_and(|by_address| !by_address.contains_key(&other())));
        assert!(!state.is_frozen(&other()));
        assert!(state.freeze().coins().is_empty());
        assert_eq!(state.balance(&other(), false).total(), 0);
        assert_eq!(state.wallet_balance(None, false, false).total(), 6_000);
        assert!(state.ledger().pruned().is_consistent());

        let events = state.take_outbox().events;
        assert!(events.contains(&WalletEvent::AddressAdded { address: other() }));
        assert!(events.contains(&WalletEvent::AddressRemoved { address: other() }));
        assert!(!state.delete_address(&other()).expect("delete again"));
    }

    #[test]
    fn check_history_drops_foreign_addresses_and_reindexes() {
        let mut state = state();
        let tx = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let (txid, record) = record(tx);
        state.ledger.insert_record(txid, record);
        state.history.replace(mine(), vec![(txid, 3)]);
        state.history.replace(other(), vec![(txid, 3)]);
        assert!(state.check_history());
        assert!(!state.history_index().contains_address(&other()));
        assert!(state.ledger().received(&txid).is_some());
        assert!(!state.check_history());
    }
}
