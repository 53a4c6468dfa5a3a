mod common;

use std::collections::HashMap;

use common::{address, funding, imported, record, signed_by, transaction};
use slpwallet::{Balance, Collaborators, VerifiedTx, Wallet, WalletConfig, WalletEvent};
use slpwallet_primitives::OutPoint;

const MINE: u8 = 1;
const CHANGE: u8 = 2;
const OTHER: u8 = 9;

#[test]
fn spend_moves_confirmed_funds_to_unconfirmed_change() {
    let mut state = imported(WalletConfig::default(), &[MINE, CHANGE]);
    let fund = funding(1, &[(address(MINE), 100_000)]);
    let (fund_id, fund_record) = record(fund);
    state.receive_transaction(fund_id, fund_record, 10);
    state.set_local_height(20);
    assert_eq!(state.wallet_balance(None, false, false), Balance::new(100_000, 0, 0));

    let spend = transaction(
        vec![(OutPoint::new(fund_id, 0), signed_by(MINE))],
        vec![
            (address(OTHER).script_pubkey(), 59_000),
            (address(CHANGE).script_pubkey(), 40_000),
        ],
    );
    let (spend_id, spend_record) = record(spend);
    state.receive_transaction(spend_id, spend_record, 0);
    assert_eq!(state.wallet_balance(None, false, false), Balance::new(0, 40_000, 0));
}

#[test]
fn adding_twice_changes_nothing() {
    let mut state = imported(WalletConfig::default(), &[MINE]);
    let fund = funding(1, &[(address(MINE), 7_000), (address(MINE), 3_000)]);
    let (fund_id, fund_record) = record(fund);
    let spend = transaction(
        vec![(OutPoint::new(fund_id, 1), Vec::new())],
        vec![(address(OTHER).script_pubkey(), 2_500)],
    );
    let (spend_id, spend_record) = record(spend);

    state.add_transaction(fund_id, fund_record.clone());
    state.add_transaction(spend_id, spend_record.clone());
    let received = state.ledger().received(&fund_id).cloned();
    let spent = state.ledger().spent(&spend_id).cloned();
    let balance = state.balance(&address(MINE), false);

    state.add_transaction(fund_id, fund_record);
    state.add_transaction(spend_id, spend_record);
    assert_eq!(state.ledger().received(&fund_id).cloned(), received);
    assert_eq!(state.ledger().spent(&spend_id).cloned(), spent);
    assert_eq!(state.balance(&address(MINE), false), balance);
    assert_eq!(balance.total(), 7_000);
    assert!(state.ledger().pruned().is_consistent());
}

#[test]
fn delivery_order_does_not_matter() {
    let fund = funding(1, &[(address(MINE), 50_000), (address(MINE), 20_000)]);
    let (fund_id, fund_record) = record(fund);
    // One input the classifier recognizes, one it cannot parse.
    let spend = transaction(
        vec![
            (OutPoint::new(fund_id, 0), signed_by(MINE)),
            (OutPoint::new(fund_id, 1), vec![0x51]),
        ],
        vec![(address(OTHER).script_pubkey(), 69_000)],
    );
    let (spend_id, spend_record) = record(spend);

    let mut forward = imported(WalletConfig::default(), &[MINE]);
    forward.add_transaction(fund_id, fund_record.clone());
    forward.add_transaction(spend_id, spend_record.clone());

    let mut reverse = imported(WalletConfig::default(), &[MINE]);
    reverse.add_transaction(spend_id, spend_record);
    assert_eq!(reverse.ledger().pruned().len(), 2);
    reverse.add_transaction(fund_id, fund_record);

    assert!(forward.ledger().pruned().is_empty());
    assert!(reverse.ledger().pruned().is_empty());
    let spent_prevouts = |state: &slpwallet::WalletState| {
        let mut prevouts: Vec<OutPoint> = state
            .ledger()
            .spent(&spend_id)
            .into_iter()
            .flat_map(|by_address| by_address.values().flatten())
            .map(|spend| spend.prevout)
            .collect();
        prevouts.sort();
        prevouts
    };
    assert_eq!(spent_prevouts(&forward), spent_prevouts(&reverse));
    assert_eq!(spent_prevouts(&reverse).len(), 2);
    assert_eq!(
        forward.balance(&address(MINE), false),
        reverse.balance(&address(MINE), false)
    );
    assert_eq!(reverse.balance(&address(MINE), false).total(), 0);
}

#[test]
fn cached_balances_match_recomputation() {
    let mut state = imported(WalletConfig::default(), &[MINE, CHANGE]);
    let fund = funding(1, &[(address(MINE), 30_000)]);
    let (fund_id, fund_record) = record(fund);
    state.receive_transaction(fund_id, fund_record, 5);
    state.set_local_height(8);
    let _ = state.balance(&address(MINE), false);

    let spend = transaction(
        vec![(OutPoint::new(fund_id, 0), signed_by(MINE))],
        vec![(address(CHANGE).script_pubkey(), 29_000)],
    );
    let (spend_id, spend_record) = record(spend);
    state.receive_transaction(spend_id, spend_record, 0);
    state.add_verified_tx(
        spend_id,
        VerifiedTx {
            height: 7,
            timestamp: 1_600_000_000,
            position: 2,
        },
    );
    state.remove_transaction(&spend_id);

    for tag in [MINE, CHANGE] {
        let cached = state.balance(&address(tag), false);
        // Excluding frozen coins bypasses the cache; nothing is frozen here.
        assert_eq!(cached, state.balance(&address(tag), true));
    }
    assert_eq!(state.balance(&address(MINE), false).confirmed, 30_000);
}

#[test]
fn a_coin_is_spendable_only_when_neither_freeze_applies() {
    let mut state = imported(WalletConfig::default(), &[MINE]);
    let fund = funding(1, &[(address(MINE), 10_000)]);
    let (fund_id, fund_record) = record(fund);
    state.receive_transaction(fund_id, fund_record, 3);
    state.set_local_height(10);
    let coin = OutPoint::new(fund_id, 0);

    for (address_frozen, coin_frozen) in [(false, false), (true, false), (false, true), (true, true)]
    {
        state
            .set_frozen_state(&[address(MINE)], address_frozen)
            .expect("freeze address");
        state.set_frozen_coin_state(&[coin], coin_frozen);
        let spendable = !state.spendable_coins(None).is_empty();
        assert_eq!(spendable, !address_frozen && !coin_frozen);
        assert_eq!(
            state.frozen_balance().total(),
            if address_frozen || coin_frozen { 10_000 } else { 0 }
        );
    }
}

#[test]
fn reorg_unconfirms_and_history_replacement_forgets() {
    let mut state = imported(WalletConfig::default(), &[MINE]);
    let fund = funding(1, &[(address(MINE), 12_000)]);
    let (fund_id, fund_record) = record(fund);
    state.receive_history(address(MINE), vec![(fund_id, 40)], HashMap::new());
    state.receive_transaction(fund_id, fund_record, 40);
    state.add_verified_tx(
        fund_id,
        VerifiedTx {
            height: 40,
            timestamp: 1_600_000_000,
            position: 0,
        },
    );
    state.set_local_height(45);
    assert_eq!(state.balance(&address(MINE), false).confirmed, 12_000);

    // Header at 40 changed: the verification is gone.
    let undone = state.undo_verifications(40, |_| Some(1));
    assert_eq!(undone, vec![fund_id]);
    assert_eq!(state.balance(&address(MINE), false).unconfirmed, 12_000);

    state.receive_history(address(MINE), Vec::new(), HashMap::new());
    assert_eq!(state.balance(&address(MINE), false).total(), 0);
    assert!(state.ledger().received(&fund_id).is_none());
}

#[test]
fn imported_addresses_come_and_go_through_the_wallet() {
    let wallet = Wallet::new(
        imported(WalletConfig::default(), &[MINE]),
        Collaborators::default(),
    );
    let events = wallet.subscribe();
    assert!(wallet.import_address(address(OTHER)).expect("import"));

    let fund = funding(2, &[(address(OTHER), 4_000)]);
    let (fund_id, fund_record) = record(fund);
    wallet.receive_history(address(OTHER), vec![(fund_id, 0)], HashMap::new());
    wallet.receive_transaction(fund_record, 0);
    assert_eq!(wallet.balance(&address(OTHER), false).total(), 4_000);

    assert!(wallet.delete_address(&address(OTHER)).expect("delete"));
    assert!(wallet.read(|state| !state.ledger().contains(&fund_id)));
    assert_eq!(wallet.wallet_balance(None, false, false).total(), 0);

    let seen: Vec<WalletEvent> = events.try_iter().collect();
    assert_eq!(
        seen.first(),
        Some(&WalletEvent::AddressAdded {
            address: address(OTHER)
        })
    );
    assert_eq!(
        seen.last(),
        Some(&WalletEvent::AddressRemoved {
            address: address(OTHER)
        })
    );
}
