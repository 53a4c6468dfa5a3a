#![allow(dead_code)]

use slpwallet::{AddressBook, TransactionRecord, WalletConfig, WalletState};
use slpwallet_consensus::{Amount, Hash256};
use slpwallet_primitives::{hash160, Address, OutPoint, Transaction, TxIn, TxOut};
use slpwallet_script::push_data;

pub fn pubkey(tag: u8) -> Vec<u8> {
    let mut key = vec![0x02];
    key.extend_from_slice(&[tag; 32]);
    key
}

pub fn address(tag: u8) -> Address {
    Address::p2pkh(hash160(&pubkey(tag)))
}

/// A p2pkh spend the input classifier attributes to `address(tag)`.
pub fn signed_by(tag: u8) -> Vec<u8> {
    let mut script = Vec::new();
    push_data(&mut script, &[0x30; 71]);
    push_data(&mut script, &pubkey(tag));
    script
}

pub fn transaction(inputs: Vec<(OutPoint, Vec<u8>)>, outputs: Vec<(Vec<u8>, Amount)>) -> Transaction {
    Transaction {
        version: 1,
        vin: inputs
            .into_iter()
            .map(|(prevout, script_sig)| TxIn {
                prevout,
                script_sig,
                sequence: u32::MAX,
            })
            .collect(),
        vout: outputs
            .into_iter()
            .map(|(script_pubkey, value)| TxOut {
                value,
                script_pubkey,
            })
            .collect(),
        lock_time: 0,
    }
}

/// Pays `outputs` from a single input of an unknown, foreign transaction.
pub fn funding(seed: u8, outputs: &[(Address, Amount)]) -> Transaction {
    transaction(
        vec![(OutPoint::new([seed; 32], 0), signed_by(0xf0))],
        outputs
            .iter()
            .map(|(address, value)| (address.script_pubkey(), *value))
            .collect(),
    )
}

pub fn record(tx: Transaction) -> (Hash256, TransactionRecord) {
    (tx.txid(), TransactionRecord::from_transaction(tx))
}

pub fn imported(config: WalletConfig, tags: &[u8]) -> WalletState {
    WalletState::new(
        config,
        AddressBook::imported(tags.iter().map(|tag| address(*tag)).collect()),
    )
}
