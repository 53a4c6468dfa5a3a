mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{address, funding, imported, record, transaction};
use slpwallet::config::JanitorConfig;
use slpwallet::{Collaborators, FetchError, TransactionSource, Wallet, WalletConfig};
use slpwallet_consensus::Hash256;
use slpwallet_primitives::{OutPoint, Transaction};

const MINE: u8 = 1;
const OTHER: u8 = 9;

struct ScriptedSource {
    raw: HashMap<Hash256, Vec<u8>>,
}

impl ScriptedSource {
    fn new(txs: &[Transaction]) -> Self {
        Self {
            raw: txs
                .iter()
                .map(|tx| (tx.txid(), tx.consensus_encode()))
                .collect(),
        }
    }
}

impl TransactionSource for ScriptedSource {
    fn fetch_transaction(&self, txid: &Hash256) -> Result<Vec<u8>, FetchError> {
        self.raw.get(txid).cloned().ok_or(FetchError::NotFound)
    }
}

/// Fails the first `failures` fetches as a flaky server would.
struct FlakySource {
    inner: ScriptedSource,
    failures: usize,
    calls: AtomicUsize,
}

impl TransactionSource for FlakySource {
    fn fetch_transaction(&self, txid: &Hash256) -> Result<Vec<u8>, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(FetchError::Unavailable("connection reset".to_string()));
        }
        self.inner.fetch_transaction(txid)
    }
}

fn fast_config() -> WalletConfig {
    WalletConfig {
        janitor: JanitorConfig {
            busy_wait: Duration::from_millis(10),
            idle_wait: Duration::from_millis(10),
            min_interval: Duration::ZERO,
            stop_timeout: Duration::from_secs(1),
        },
        ..WalletConfig::default()
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn janitor_discards_spends_of_foreign_outputs() {
    let foreign = funding(3, &[(address(OTHER), 8_000)]);
    let foreign_id = foreign.txid();
    // Funds one of our outputs; the wallet simply has not seen it yet.
    let ours = funding(4, &[(address(MINE), 5_000)]);
    let ours_id = ours.txid();

    let spend = transaction(
        vec![
            (OutPoint::new(foreign_id, 0), Vec::new()),
            (OutPoint::new(ours_id, 0), Vec::new()),
        ],
        vec![(address(OTHER).script_pubkey(), 12_000)],
    );
    let (spend_id, spend_record) = record(spend);

    let source = Arc::new(ScriptedSource::new(&[foreign, ours]));
    let wallet = Wallet::new(
        imported(fast_config(), &[MINE]),
        Collaborators {
            source: Some(source),
            validator: None,
        },
    );
    wallet.add_transaction(spend_record);
    assert_eq!(wallet.read(|state| state.ledger().pruned().len()), 2);

    wallet.set_up_to_date(true);
    wallet.start().expect("start");
    let cleaned = wait_until(|| wallet.read(|state| state.ledger().pruned().len()) == 1);
    wallet.stop();

    assert!(cleaned, "janitor did not discard the foreign spend");
    wallet.read(|state| {
        let pruned = state.ledger().pruned();
        assert!(!pruned.contains(&OutPoint::new(foreign_id, 0)));
        assert_eq!(pruned.get(&OutPoint::new(ours_id, 0)), Some(&spend_id));
        assert!(pruned.is_consistent());
    });
}

#[test]
fn janitor_waits_until_the_wallet_is_up_to_date() {
    let foreign = funding(5, &[(address(OTHER), 1_000)]);
    let foreign_id = foreign.txid();
    let spend = transaction(
        vec![(OutPoint::new(foreign_id, 0), Vec::new())],
        vec![(address(OTHER).script_pubkey(), 900)],
    );
    let (_, spend_record) = record(spend);

    let wallet = Wallet::new(
        imported(fast_config(), &[MINE]),
        Collaborators {
            source: Some(Arc::new(ScriptedSource::new(&[foreign]))),
            validator: None,
        },
    );
    wallet.start().expect("start");
    // Arrives after start, so it reaches the janitor through its queue.
    wallet.add_transaction(spend_record);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(wallet.read(|state| state.ledger().pruned().len()), 1);

    wallet.set_up_to_date(true);
    assert!(wait_until(|| wallet
        .read(|state| state.ledger().pruned().is_empty())));
    wallet.stop();
    // Stopping twice is harmless.
    wallet.stop();
}

#[test]
fn janitor_retries_fetches_that_failed() {
    let foreign = funding(6, &[(address(OTHER), 2_000)]);
    let foreign_id = foreign.txid();
    let spend = transaction(
        vec![(OutPoint::new(foreign_id, 0), Vec::new())],
        vec![(address(OTHER).script_pubkey(), 1_900)],
    );
    let (_, spend_record) = record(spend);

    let source = Arc::new(FlakySource {
        inner: ScriptedSource::new(&[foreign]),
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let wallet = Wallet::new(
        imported(fast_config(), &[MINE]),
        Collaborators {
            source: Some(source.clone()),
            validator: None,
        },
    );
    wallet.add_transaction(spend_record);
    wallet.set_up_to_date(true);
    wallet.start().expect("start");
    let cleaned = wait_until(|| wallet.read(|state| state.ledger().pruned().is_empty()));
    wallet.stop();

    assert!(cleaned, "janitor gave up after a failed fetch");
    assert!(source.calls.load(Ordering::SeqCst) >= 2);
}
