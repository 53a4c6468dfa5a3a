//! Background cleaner for pruned spends.
//!
//! Spends with an unrecognized scriptSig are parked as pruned until their funding
//! output is seen. Most of them fund from addresses that are not ours and would
//! stay parked forever; the janitor fetches the funding transaction and discards
//! those placeholders.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use slpwallet_consensus::{hash256_to_hex, Hash256};
use slpwallet_log::{log_debug, log_error, log_info, log_warn};
use slpwallet_primitives::{Address, OutPoint, Transaction};

use crate::config::JanitorConfig;
use crate::error::WalletError;
use crate::source::{FetchError, TransactionSource};
use crate::wallet::WalletShared;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JanitorMessage {
    Added(OutPoint),
    Removed(OutPoint),
    Stop,
}

type WorkingSet = HashMap<Hash256, BTreeSet<u32>>;

pub(crate) struct JanitorHandle {
    sender: Sender<JanitorMessage>,
    stopping: Arc<AtomicBool>,
    done: Receiver<()>,
    thread: thread::JoinHandle<()>,
    config: JanitorConfig,
}

impl JanitorHandle {
    /// Signals the thread and waits up to the configured timeout. A thread stuck in a
    /// network call is left to exit on its own. Returns true when it was joined.
    pub(crate) fn stop(self) -> bool {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.sender.send(JanitorMessage::Stop);
        match self.done.recv_timeout(self.config.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log_warn!(
                    "pruned spend janitor did not stop within {:?}; detaching",
                    self.config.stop_timeout
                );
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    log_error!("pruned spend janitor panicked");
                }
                true
            }
        }
    }
}

/// Starts the janitor and wires it into the wallet state. The working set is seeded
/// from the pruned spends present right now.
pub(crate) fn spawn(
    shared: &Arc<WalletShared>,
    source: Arc<dyn TransactionSource>,
    config: JanitorConfig,
) -> Result<JanitorHandle, WalletError> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let (done_tx, done) = crossbeam_channel::bounded::<()>(1);
    let stopping = Arc::new(AtomicBool::new(false));

    let mut seed = WorkingSet::new();
    {
        let mut state = shared.lock_state();
        for (outpoint, _) in state.ledger.pruned().iter() {
            seed.entry(outpoint.hash).or_default().insert(outpoint.index);
        }
        state.janitor = Some(sender.clone());
    }

    let weak = Arc::downgrade(shared);
    let thread_stopping = Arc::clone(&stopping);
    let thread = thread::Builder::new()
        .name("pruned-spend-janitor".to_string())
        .spawn(move || {
            let _done = done_tx;
            log_info!("pruned spend janitor started");
            run(weak, source, receiver, config, seed, thread_stopping);
            log_info!("pruned spend janitor exiting");
        })
        .map_err(WalletError::Io)?;

    Ok(JanitorHandle {
        sender,
        stopping,
        done,
        thread,
        config,
    })
}

fn run(
    shared: Weak<WalletShared>,
    source: Arc<dyn TransactionSource>,
    receiver: Receiver<JanitorMessage>,
    config: JanitorConfig,
    mut working: WorkingSet,
    stopping: Arc<AtomicBool>,
) {
    let mut last_cycle: Option<Instant> = None;
    loop {
        if stopping.load(Ordering::SeqCst) {
            return;
        }
        let Some(can_work) = can_do_work(&shared, &working) else {
            return;
        };
        let wait = if can_work {
            config.busy_wait
        } else {
            config.idle_wait
        };
        match receiver.recv_timeout(wait) {
            Ok(JanitorMessage::Stop) => return,
            Ok(JanitorMessage::Added(outpoint)) => {
                working.entry(outpoint.hash).or_default().insert(outpoint.index);
            }
            Ok(JanitorMessage::Removed(outpoint)) => forget(&mut working, &outpoint),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }

        match can_do_work(&shared, &working) {
            Some(true) => {}
            Some(false) => continue,
            None => return,
        }
        if last_cycle.is_some_and(|at| at.elapsed() < config.min_interval) {
            continue;
        }
        last_cycle = Some(Instant::now());
        if !cycle(&shared, source.as_ref(), &mut working, &stopping) {
            return;
        }
    }
}

/// `None` once the wallet is gone.
fn can_do_work(shared: &Weak<WalletShared>, working: &WorkingSet) -> Option<bool> {
    let shared = shared.upgrade()?;
    Some(!working.is_empty() && shared.up_to_date.load(Ordering::SeqCst))
}

fn forget(working: &mut WorkingSet, outpoint: &OutPoint) {
    if let Some(indices) = working.get_mut(&outpoint.hash) {
        indices.remove(&outpoint.index);
        if indices.is_empty() {
            working.remove(&outpoint.hash);
        }
    }
}

/// One cleaning pass. Returns false when the thread should exit.
fn cycle(
    shared: &Weak<WalletShared>,
    source: &dyn TransactionSource,
    working: &mut WorkingSet,
    stopping: &AtomicBool,
) -> bool {
    let started = Instant::now();
    let Some(wallet) = shared.upgrade() else {
        return false;
    };

    // Placeholders resolved since they were queued.
    let defunct: Vec<OutPoint> = {
        let state = wallet.lock_state();
        working
            .iter()
            .flat_map(|(hash, indices)| indices.iter().map(|index| OutPoint::new(*hash, *index)))
            .filter(|outpoint| !state.ledger.pruned().contains(outpoint))
            .collect()
    };
    for outpoint in &defunct {
        forget(working, outpoint);
    }
    if !defunct.is_empty() {
        log_debug!("janitor skipped {} resolved pruned spends", defunct.len());
    }

    let mut removed = 0usize;
    let hashes: Vec<Hash256> = working.keys().copied().collect();
    for hash in hashes {
        let tx = match fetch(&wallet, source, &hash) {
            Ok(tx) => tx,
            Err(err) => {
                log_warn!(
                    "janitor could not retrieve tx {}: {err}",
                    hash256_to_hex(&hash)
                );
                if stopping.load(Ordering::SeqCst) {
                    return false;
                }
                continue;
            }
        };
        if stopping.load(Ordering::SeqCst) {
            return false;
        }
        let indices: Vec<u32> = working
            .get(&hash)
            .map(|indices| indices.iter().copied().collect())
            .unwrap_or_default();
        for index in indices {
            let outpoint = OutPoint::new(hash, index);
            forget(working, &outpoint);
            let mut state = wallet.lock_state();
            let Some(output) = tx.vout.get(index as usize) else {
                log_error!("janitor could not find output {outpoint}");
                state.ledger.discard_pruned(&outpoint);
                continue;
            };
            let mine = Address::from_script_pubkey(&output.script_pubkey)
                .is_some_and(|address| state.is_mine(&address));
            if !mine && state.ledger.discard_pruned(&outpoint).is_some() {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        log_info!(
            "janitor removed {removed} irrelevant pruned spends in {:.2?}",
            started.elapsed()
        );
    }
    true
}

/// Looks in the ledger, then the transaction cache, then asks the network.
fn fetch(
    wallet: &WalletShared,
    source: &dyn TransactionSource,
    hash: &Hash256,
) -> Result<Transaction, FetchError> {
    if let Some(record) = wallet.lock_state().ledger.transaction(hash) {
        return Ok(record.tx.clone());
    }
    if let Some(tx) = wallet.lock_tx_cache().get(hash) {
        return Ok(tx.clone());
    }
    let raw = source.fetch_transaction(hash)?;
    let tx = Transaction::consensus_decode(&raw)
        .map_err(|err| FetchError::Unavailable(err.to_string()))?;
    if tx.txid() != *hash {
        return Err(FetchError::Unavailable("txid mismatch".to_string()));
    }
    wallet.lock_tx_cache().put(*hash, tx.clone());
    Ok(tx)
}
