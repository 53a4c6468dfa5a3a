//! Thread-safe wallet handle.
//!
//! [`Wallet`] owns the state mutex, the pruned spend janitor and the validation
//! worker. Every mutation runs through [`Wallet::update`], which takes the lock,
//! collects side effects into the outbox and dispatches them once the lock is
//! released, so event subscribers and validators never run under the wallet lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use slpwallet_consensus::{hash256_to_hex, Amount, Hash256};
use slpwallet_log::{log_debug, log_info, log_warn};
use slpwallet_primitives::{Address, OutPoint, Transaction};
use slpwallet_storage::KeyValueStore;

use crate::addresses::AddressBook;
use crate::balance::Balance;
use crate::coins::{Coin, TokenBalance};
use crate::config::WalletConfig;
use crate::construct::{CoinChooser, PaymentOutput, SimpleCoinChooser, UnsignedTransaction};
use crate::error::WalletError;
use crate::events::WalletEvent;
use crate::history::{HistoryItem, TokenHistoryItem};
use crate::janitor::{self, JanitorHandle};
use crate::ledger::TransactionRecord;
use crate::source::{TransactionSource, TxCache};
use crate::state::{Outbox, WalletState};
use crate::token::slp::SlpMessage;
use crate::token::validator::{
    spawn_worker, DagValidator, ValidationMessage, ValidationRequest, ValidationSink,
};
use crate::token::{TokenClass, TokenTxInfo, TokenTypeRecord, Validity};
use crate::verify::{TxHeight, VerifiedTx};

/// External services a wallet talks to. Both are optional: without a source the
/// janitor does not run, without a validator token transactions stay unknown.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub source: Option<Arc<dyn TransactionSource>>,
    pub validator: Option<Arc<dyn DagValidator>>,
}

pub(crate) struct WalletShared {
    state: Mutex<WalletState>,
    pub(crate) up_to_date: AtomicBool,
    tx_cache: Mutex<TxCache>,
    subscribers: Mutex<Vec<Sender<WalletEvent>>>,
    source: Option<Arc<dyn TransactionSource>>,
    validator: Option<Arc<dyn DagValidator>>,
    completions: Sender<ValidationMessage>,
}

impl WalletShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_tx_cache(&self) -> MutexGuard<'_, TxCache> {
        self.tx_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(self: &Arc<Self>, f: impl FnOnce(&mut WalletState) -> R) -> R {
        let (result, outbox) = {
            let mut state = self.lock_state();
            let result = f(&mut state);
            (result, state.take_outbox())
        };
        if !outbox.is_empty() {
            self.dispatch(outbox);
        }
        result
    }

    fn dispatch(self: &Arc<Self>, outbox: Outbox) {
        if !outbox.events.is_empty() {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|subscriber| {
                outbox
                    .events
                    .iter()
                    .all(|event| subscriber.send(event.clone()).is_ok())
            });
        }

        for pending in outbox.validations {
            let txid = pending.txid;
            let Some(validator) = &self.validator else {
                self.lock_state().tokens.forget_pending(&txid);
                continue;
            };
            let request = ValidationRequest {
                txid,
                tx: pending.tx,
                class: pending.class,
                token_id: pending.token_id,
                wallet: WalletView {
                    shared: Arc::downgrade(self),
                },
                network: self.source.clone(),
            };
            match validator.submit(request, ValidationSink::new(self.completions.clone())) {
                Ok(job) => log_debug!(
                    "submitted validation job {} for tx {}",
                    job.id,
                    hash256_to_hex(&txid)
                ),
                Err(err) => {
                    log_warn!(
                        "validator rejected tx {}: {err}",
                        hash256_to_hex(&txid)
                    );
                    self.lock_state().tokens.forget_pending(&txid);
                }
            }
        }
    }
}

/// Read-only view of a wallet handed to validators. It does not keep the wallet
/// alive; every lookup returns `None` once the wallet is dropped.
#[derive(Clone)]
pub struct WalletView {
    shared: Weak<WalletShared>,
}

impl WalletView {
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// A transaction from the ledger or the transaction cache.
    pub fn transaction(&self, txid: &Hash256) -> Option<Transaction> {
        let shared = self.shared.upgrade()?;
        let from_ledger = shared
            .lock_state()
            .ledger
            .transaction(txid)
            .map(|record| record.tx.clone());
        from_ledger.or_else(|| shared.lock_tx_cache().get(txid).cloned())
    }

    pub fn token_tx_info(&self, txid: &Hash256) -> Option<TokenTxInfo> {
        let shared = self.shared.upgrade()?;
        let state = shared.lock_state();
        state.tokens.tx_info(txid).copied()
    }

    pub fn token_type(&self, token_id: &Hash256) -> Option<TokenTypeRecord> {
        let shared = self.shared.upgrade()?;
        let state = shared.lock_state();
        state.tokens.token_type(token_id).cloned()
    }
}

pub struct Wallet {
    shared: Arc<WalletShared>,
    janitor: Mutex<Option<JanitorHandle>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Wallet {
    pub fn new(state: WalletState, collaborators: Collaborators) -> Self {
        let (completions, receiver) = crossbeam_channel::unbounded();
        let tx_cache = TxCache::new(state.config().tx_cache_size);
        let shared = Arc::new(WalletShared {
            state: Mutex::new(state),
            up_to_date: AtomicBool::new(false),
            tx_cache: Mutex::new(tx_cache),
            subscribers: Mutex::new(Vec::new()),
            source: collaborators.source,
            validator: collaborators.validator,
            completions,
        });

        let worker = shared.validator.is_some().then(|| {
            let weak = Arc::downgrade(&shared);
            spawn_worker(receiver, move |txid, validity| {
                let Some(shared) = weak.upgrade() else {
                    return false;
                };
                shared.with_state(|state| state.apply_validity(&txid, validity));
                true
            })
        });

        Self {
            shared,
            janitor: Mutex::new(None),
            worker: Mutex::new(worker),
        }
    }

    /// Restores a wallet from `store`.
    pub fn load<S: KeyValueStore + ?Sized>(
        config: WalletConfig,
        addresses: AddressBook,
        store: &S,
        collaborators: Collaborators,
    ) -> Result<Self, WalletError> {
        let state = WalletState::load(config, addresses, store)?;
        Ok(Self::new(state, collaborators))
    }

    /// Applies the log settings, starts the janitor (when a source is configured) and
    /// submits every unresolved token transaction.
    pub fn start(&self) -> Result<(), WalletError> {
        self.shared.lock_state().config().init_logging();
        if let Some(source) = &self.shared.source {
            let mut janitor = self.janitor.lock().unwrap_or_else(PoisonError::into_inner);
            if janitor.is_none() {
                let config = self.shared.lock_state().config().janitor;
                *janitor = Some(janitor::spawn(&self.shared, Arc::clone(source), config)?);
            }
        }
        let queued = self.activate_tokens();
        log_info!("wallet started; {queued} token transactions queued for validation");
        Ok(())
    }

    /// Stops background threads. Safe to call more than once.
    pub fn stop(&self) {
        let janitor = self
            .janitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(janitor) = janitor {
            self.shared.lock_state().janitor = None;
            janitor.stop();
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = self.shared.completions.send(ValidationMessage::Stop);
            if worker.join().is_err() {
                log_warn!("validation worker panicked");
            }
        }
    }

    /// Runs `f` under the wallet lock and dispatches what it queued afterwards.
    pub fn update<R>(&self, f: impl FnOnce(&mut WalletState) -> R) -> R {
        self.shared.with_state(f)
    }

    pub fn read<R>(&self, f: impl FnOnce(&WalletState) -> R) -> R {
        f(&self.shared.lock_state())
    }

    pub fn subscribe(&self) -> Receiver<WalletEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    pub fn set_up_to_date(&self, up_to_date: bool) {
        self.shared.up_to_date.store(up_to_date, Ordering::SeqCst);
    }

    pub fn is_up_to_date(&self) -> bool {
        self.shared.up_to_date.load(Ordering::SeqCst)
    }

    /// Up to date with no pruned spends left to resolve.
    pub fn is_settled(&self) -> bool {
        self.is_up_to_date() && self.read(|state| state.ledger().pruned().is_empty())
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), WalletError> {
        self.read(|state| state.save(store))
    }

    pub fn add_transaction(&self, record: TransactionRecord) -> bool {
        let txid = record.txid();
        self.update(|state| state.add_transaction(txid, record))
    }

    pub fn remove_transaction(&self, txid: &Hash256) {
        self.update(|state| state.remove_transaction(txid))
    }

    pub fn receive_transaction(&self, record: TransactionRecord, height: i32) -> bool {
        let txid = record.txid();
        self.update(|state| state.receive_transaction(txid, record, height))
    }

    pub fn receive_history(
        &self,
        address: Address,
        history: Vec<(Hash256, i32)>,
        fees: HashMap<Hash256, Amount>,
    ) {
        self.update(|state| state.receive_history(address, history, fees))
    }

    pub fn add_unverified_tx(&self, txid: Hash256, height: i32) {
        self.update(|state| state.add_unverified_tx(txid, height))
    }

    pub fn add_verified_tx(&self, txid: Hash256, info: VerifiedTx) {
        self.update(|state| state.add_verified_tx(txid, info))
    }

    pub fn undo_verifications(
        &self,
        height: i32,
        header_timestamp: impl Fn(i32) -> Option<u32>,
    ) -> Vec<Hash256> {
        self.update(|state| state.undo_verifications(height, header_timestamp))
    }

    pub fn set_local_height(&self, height: i32) {
        self.update(|state| state.set_local_height(height))
    }

    pub fn tx_height(&self, txid: &Hash256) -> TxHeight {
        self.read(|state| state.tx_height(txid))
    }

    pub fn synchronize(&self) -> Result<Vec<Address>, WalletError> {
        self.update(WalletState::synchronize)
    }

    pub fn derive_change_address(&self) -> Result<Option<Address>, WalletError> {
        self.update(WalletState::derive_change_address)
    }

    pub fn import_address(&self, address: Address) -> Result<bool, WalletError> {
        self.update(|state| state.import_address(address))
    }

    pub fn delete_address(&self, address: &Address) -> Result<bool, WalletError> {
        self.update(|state| state.delete_address(address))
    }

    pub fn balance(&self, address: &Address, exclude_frozen_coins: bool) -> Balance {
        self.update(|state| state.balance(address, exclude_frozen_coins))
    }

    pub fn wallet_balance(
        &self,
        domain: Option<&[Address]>,
        exclude_frozen_coins: bool,
        exclude_frozen_addresses: bool,
    ) -> Balance {
        self.update(|state| {
            state.wallet_balance(domain, exclude_frozen_coins, exclude_frozen_addresses)
        })
    }

    pub fn frozen_balance(&self) -> Balance {
        self.update(WalletState::frozen_balance)
    }

    pub fn set_frozen_state(&self, addresses: &[Address], freeze: bool) -> Result<(), WalletError> {
        self.update(|state| state.set_frozen_state(addresses, freeze))
    }

    pub fn set_frozen_coin_state(&self, coins: &[OutPoint], freeze: bool) -> usize {
        self.update(|state| state.set_frozen_coin_state(coins, freeze))
    }

    pub fn spendable_coins(&self, domain: Option<Vec<Address>>) -> Vec<Coin> {
        self.update(|state| state.spendable_coins(domain))
    }

    pub fn token_spendable_coins(
        &self,
        token_id: &Hash256,
        domain: Option<Vec<Address>>,
    ) -> Vec<Coin> {
        self.update(|state| state.token_spendable_coins(token_id, domain))
    }

    pub fn token_balance(&self, token_id: &Hash256) -> TokenBalance {
        self.update(|state| state.token_balance(token_id))
    }

    pub fn token_baton(&self, token_id: &Hash256) -> Result<Coin, WalletError> {
        self.update(|state| state.token_baton(token_id))
    }

    pub fn history(&self, domain: Option<&[Address]>) -> Vec<HistoryItem> {
        self.update(|state| state.history(domain))
    }

    pub fn token_histories(
        &self,
        domain: Option<&[Address]>,
        validities: &[Validity],
    ) -> BTreeMap<Hash256, Vec<TokenHistoryItem>> {
        self.read(|state| state.token_histories(domain, validities))
    }

    pub fn add_token_safe(
        &self,
        class: TokenClass,
        token_id_hex: &str,
        name: &str,
        decimals: u8,
        allow_overwrite: bool,
    ) -> Result<Hash256, WalletError> {
        self.update(|state| {
            state
                .tokens
                .add_token_safe(class, token_id_hex, name, decimals, allow_overwrite)
        })
    }

    pub fn add_token_from_genesis_tx(
        &self,
        tx: &Transaction,
        allow_overwrite: bool,
    ) -> Result<SlpMessage, WalletError> {
        self.update(|state| state.tokens.add_token_from_genesis_tx(tx, allow_overwrite))
    }

    pub fn add_token_type(&self, token_id: Hash256, record: TokenTypeRecord) {
        self.update(|state| state.tokens.add_token_type(token_id, record))
    }

    pub fn check_sufficient_token_balance(&self, message: &SlpMessage) -> Result<(), WalletError> {
        self.update(|state| state.check_sufficient_token_balance(message))
    }

    pub fn activate_tokens(&self) -> usize {
        self.update(WalletState::activate_tokens)
    }

    /// Builds an unsigned transaction with the default coin chooser from the wallet's
    /// spendable coins.
    pub fn make_payment(
        &self,
        outputs: Vec<PaymentOutput>,
        fixed_fee: Option<Amount>,
    ) -> Result<UnsignedTransaction, WalletError> {
        self.make_unsigned_transaction(outputs, fixed_fee, None, Vec::new(), &SimpleCoinChooser)
    }

    pub fn make_unsigned_transaction(
        &self,
        outputs: Vec<PaymentOutput>,
        fixed_fee: Option<Amount>,
        change_address: Option<Address>,
        mandatory_coins: Vec<Coin>,
        chooser: &dyn CoinChooser,
    ) -> Result<UnsignedTransaction, WalletError> {
        self.update(|state| {
            let inputs = state.spendable_coins(None);
            state.make_unsigned_transaction(
                inputs,
                outputs,
                fixed_fee,
                change_address,
                mandatory_coins,
                chooser,
            )
        })
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        self.stop();
    }
}
