mod common;

use std::collections::HashMap;

use common::{address, funding, imported, record, signed_by, transaction};
use slpwallet::token::slp::{build_genesis, Genesis};
use slpwallet::{AddressBook, Validity, VerifiedTx, WalletConfig, WalletState};
use slpwallet_primitives::OutPoint;
use slpwallet_storage::memory::MemoryStore;
use slpwallet_storage::{Column, KeyValueStore};

const MINE: u8 = 1;
const SPARE: u8 = 2;
const OTHER: u8 = 9;

fn populated() -> (WalletState, OutPoint, OutPoint) {
    let mut state = imported(WalletConfig::default(), &[MINE, SPARE]);

    let fund = funding(1, &[(address(MINE), 25_000), (address(SPARE), 4_000)]);
    let (fund_id, fund_record) = record(fund);
    state.receive_history(address(MINE), vec![(fund_id, 30)], HashMap::from([(fund_id, 500)]));
    state.receive_history(address(SPARE), vec![(fund_id, 30)], HashMap::new());
    state.receive_transaction(fund_id, fund_record, 30);
    state.add_verified_tx(
        fund_id,
        VerifiedTx {
            height: 30,
            timestamp: 1_650_000_000,
            position: 4,
        },
    );

    let script = build_genesis(
        1,
        &Genesis {
            ticker: b"KEEP".to_vec(),
            name: Vec::new(),
            document_url: Vec::new(),
            document_hash: None,
            decimals: 0,
            mint_baton_vout: None,
            initial_quantity: 77,
        },
    )
    .expect("genesis script");
    let genesis = transaction(
        vec![(OutPoint::new(fund_id, 1), signed_by(SPARE))],
        vec![(script, 0), (address(MINE).script_pubkey(), 546)],
    );
    let (genesis_id, genesis_record) = record(genesis);
    state.receive_history(address(MINE), vec![(fund_id, 30), (genesis_id, 0)], HashMap::new());
    state.receive_transaction(genesis_id, genesis_record, 0);
    assert!(state.apply_validity(&genesis_id, Validity::Valid));

    state.set_local_height(36);
    state
        .set_frozen_state(&[address(SPARE)], true)
        .expect("freeze");
    let frozen_coin = OutPoint::new(fund_id, 0);
    state.set_frozen_coin_state(&[frozen_coin], true);
    (state, frozen_coin, OutPoint::new(genesis_id, 1))
}

#[test]
fn saved_wallet_loads_back_identically() {
    let (mut state, frozen_coin, token_coin) = populated();
    let store = MemoryStore::new();
    state.save(&store).expect("save");

    let mut loaded = WalletState::load(
        WalletConfig::default(),
        AddressBook::imported(vec![address(MINE), address(SPARE)]),
        &store,
    )
    .expect("load");

    assert_eq!(loaded.local_height(), 36);
    let token_id = token_coin.hash;
    let fund_id = frozen_coin.hash;
    assert_eq!(loaded.tx_height(&fund_id), state.tx_height(&fund_id));
    assert_eq!(loaded.tx_height(&token_id), state.tx_height(&token_id));
    assert_eq!(loaded.tokens().validity(&token_id), Some(Validity::Valid));
    assert_eq!(loaded.token_balance(&token_id).valid, 77);
    assert!(loaded.is_frozen(&address(SPARE)));
    assert!(loaded.freeze().coins().contains(&frozen_coin));
    assert_eq!(loaded.history_index().fee(&fund_id), Some(500));
    for tag in [MINE, SPARE] {
        assert_eq!(
            loaded.balance(&address(tag), false),
            state.balance(&address(tag), false)
        );
    }
    assert_eq!(loaded.frozen_balance(), state.frozen_balance());
    assert_eq!(
        loaded.wallet_balance(None, false, false),
        state.wallet_balance(None, false, false)
    );
}

#[test]
fn saving_again_rewrites_only_what_changed() {
    let (mut state, frozen_coin, _) = populated();
    let store = MemoryStore::new();
    state.save(&store).expect("first save");
    let transactions = store.column_len(Column::Transaction);
    assert_eq!(transactions, 2);

    state.set_frozen_coin_state(&[frozen_coin], false);
    state.save(&store).expect("second save");
    assert_eq!(store.column_len(Column::Transaction), transactions);
    assert_eq!(store.column_len(Column::FrozenCoin), 0);
    assert_eq!(store.column_len(Column::FrozenAddress), 1);

    let unrelated = funding(7, &[(address(OTHER), 1_000)]);
    let (unrelated_id, _) = record(unrelated);
    assert!(store
        .get(Column::Transaction, &unrelated_id)
        .expect("read")
        .is_none());
}
