//! Wallet state persistence over the column store.
//!
//! `save` rewrites every column in a single batch and deletes keys that went stale;
//! `load` restores a state and reconciles the pieces that are derived on the fly.

use std::collections::{BTreeMap, HashSet};

use slpwallet_consensus::{Amount, Hash256};
use slpwallet_log::{log_info, log_warn};
use slpwallet_primitives::encoding::{Decoder, Encoder};
use slpwallet_primitives::{Address, OutPoint};
use slpwallet_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::addresses::AddressBook;
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::ledger::{AddressMap, ReceivedOutput, SpentOutput, TransactionRecord};
use crate::state::WalletState;
use crate::token::{TokenOutput, TokenTxInfo, TokenTypeRecord};
use crate::verify::VerifiedTx;

/// Bumped whenever the persisted token columns change meaning.
pub const TOKEN_DATA_VERSION: u32 = 3;

const META_RECEIVING: &[u8] = b"receiving_addresses";
const META_CHANGE: &[u8] = b"change_addresses";
const META_TOKEN_DATA_VERSION: &[u8] = b"token_data_version";
const META_STORED_HEIGHT: &[u8] = b"stored_height";

const PRESENT: [u8; 1] = [1];

type Entries = Vec<(Vec<u8>, Vec<u8>)>;

fn corrupt(column: Column, reason: impl Into<String>) -> WalletError {
    WalletError::Store(StoreError::Corrupt {
        column,
        reason: reason.into(),
    })
}

fn hash_key(column: Column, key: &[u8]) -> Result<Hash256, WalletError> {
    key.try_into()
        .map_err(|_| corrupt(column, format!("key length {}", key.len())))
}

fn read_all<S: KeyValueStore + ?Sized>(store: &S, column: Column) -> Result<Entries, WalletError> {
    Ok(store.scan_prefix(column, &[])?)
}

/// Queues `entries` for `column` and deletes every stored key not among them.
fn sync_column<S: KeyValueStore + ?Sized>(
    store: &S,
    batch: &mut WriteBatch,
    column: Column,
    entries: Entries,
) -> Result<(), WalletError> {
    let stale = {
        let keep: HashSet<&[u8]> = entries.iter().map(|(key, _)| key.as_slice()).collect();
        let mut stale = Vec::new();
        store.for_each_prefix(column, &[], &mut |key, _| {
            if !keep.contains(key) {
                stale.push(key.to_vec());
            }
            Ok(())
        })?;
        stale
    };
    for key in stale {
        batch.delete(column, key);
    }
    for (key, value) in entries {
        batch.put(column, key, value);
    }
    Ok(())
}

fn encode_received(by_address: &AddressMap<ReceivedOutput>) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(by_address.len() as u64);
    for (address, outputs) in by_address {
        encoder.write_bytes(&address.to_key());
        encoder.write_varint(outputs.len() as u64);
        for output in outputs {
            encoder.write_u32_le(output.index);
            encoder.write_i64_le(output.value);
            encoder.write_bool(output.is_coinbase);
        }
    }
    encoder.into_inner()
}

fn decode_received(bytes: &[u8]) -> Result<AddressMap<ReceivedOutput>, WalletError> {
    let mut decoder = Decoder::new(bytes);
    let mut by_address = BTreeMap::new();
    for _ in 0..decoder.read_varint()? {
        let address = Address::from_key(&decoder.read_fixed::<21>()?)?;
        let count = decoder.read_varint()?;
        let mut outputs = Vec::new();
        for _ in 0..count {
            outputs.push(ReceivedOutput {
                index: decoder.read_u32_le()?,
                value: decoder.read_i64_le()?,
                is_coinbase: decoder.read_bool()?,
            });
        }
        by_address.insert(address, outputs);
    }
    Ok(by_address)
}

fn encode_spent(by_address: &AddressMap<SpentOutput>) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(by_address.len() as u64);
    for (address, spends) in by_address {
        encoder.write_bytes(&address.to_key());
        encoder.write_varint(spends.len() as u64);
        for spend in spends {
            encoder.write_bytes(&spend.prevout.to_key());
            encoder.write_i64_le(spend.value);
        }
    }
    encoder.into_inner()
}

fn decode_spent(bytes: &[u8]) -> Result<AddressMap<SpentOutput>, WalletError> {
    let mut decoder = Decoder::new(bytes);
    let mut by_address = BTreeMap::new();
    for _ in 0..decoder.read_varint()? {
        let address = Address::from_key(&decoder.read_fixed::<21>()?)?;
        let count = decoder.read_varint()?;
        let mut spends = Vec::new();
        for _ in 0..count {
            spends.push(SpentOutput {
                prevout: OutPoint::from_key(&decoder.read_fixed::<36>()?)?,
                value: decoder.read_i64_le()?,
            });
        }
        by_address.insert(address, spends);
    }
    Ok(by_address)
}

fn encode_history(history: &[(Hash256, i32)]) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_varint(history.len() as u64);
    for (txid, height) in history {
        encoder.write_hash_le(txid);
        encoder.write_i32_le(*height);
    }
    encoder.into_inner()
}

fn decode_history(bytes: &[u8]) -> Result<Vec<(Hash256, i32)>, WalletError> {
    let mut decoder = Decoder::new(bytes);
    let mut history = Vec::new();
    for _ in 0..decoder.read_varint()? {
        history.push((decoder.read_hash_le()?, decoder.read_i32_le()?));
    }
    Ok(history)
}

fn encode_addresses(addresses: &[Address], config: &WalletConfig) -> Result<Vec<u8>, WalletError> {
    let encoded: Vec<String> = addresses
        .iter()
        .map(|address| address.encode(config.network))
        .collect();
    Ok(serde_json::to_vec(&encoded)?)
}

fn decode_addresses(bytes: &[u8], config: &WalletConfig) -> Result<Vec<Address>, WalletError> {
    let encoded: Vec<String> = serde_json::from_slice(bytes)?;
    encoded
        .iter()
        .map(|address| {
            Address::decode(address, config.network)
                .map_err(|err| corrupt(Column::Meta, format!("address {address}: {err}")))
        })
        .collect()
}

impl WalletState {
    /// Writes the full wallet state as one atomic batch.
    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), WalletError> {
        let mut batch = WriteBatch::new();

        let transactions = self
            .ledger
            .transactions
            .iter()
            .map(|(txid, record)| (txid.to_vec(), record.raw.clone()))
            .collect();
        sync_column(store, &mut batch, Column::Transaction, transactions)?;

        let received = self
            .ledger
            .received
            .iter()
            .map(|(txid, by_address)| (txid.to_vec(), encode_received(by_address)))
            .collect();
        sync_column(store, &mut batch, Column::Received, received)?;

        let spent = self
            .ledger
            .spent
            .iter()
            .map(|(txid, by_address)| (txid.to_vec(), encode_spent(by_address)))
            .collect();
        sync_column(store, &mut batch, Column::Spent, spent)?;

        let pruned = self
            .ledger
            .pruned()
            .iter()
            .map(|(outpoint, spender)| (outpoint.to_key().to_vec(), spender.to_vec()))
            .collect();
        sync_column(store, &mut batch, Column::PrunedSpend, pruned)?;

        let history = self
            .history
            .iter()
            .map(|(address, history)| (address.to_key().to_vec(), encode_history(history)))
            .collect();
        sync_column(store, &mut batch, Column::History, history)?;

        let verified = self
            .verification
            .verified
            .iter()
            .map(|(txid, info)| {
                let mut encoder = Encoder::new();
                encoder.write_i32_le(info.height);
                encoder.write_u32_le(info.timestamp);
                encoder.write_u32_le(info.position);
                (txid.to_vec(), encoder.into_inner())
            })
            .collect();
        sync_column(store, &mut batch, Column::Verified, verified)?;

        let fees = self
            .history
            .fees()
            .map(|(txid, fee)| (txid.to_vec(), fee.to_le_bytes().to_vec()))
            .collect();
        sync_column(store, &mut batch, Column::FeeHint, fees)?;

        let mut token_types = Vec::new();
        for (token_id, record) in &self.tokens.types {
            token_types.push((token_id.to_vec(), serde_json::to_vec(record)?));
        }
        sync_column(store, &mut batch, Column::TokenType, token_types)?;

        let mut token_info = Vec::new();
        for (txid, info) in &self.tokens.tx_info {
            token_info.push((txid.to_vec(), serde_json::to_vec(info)?));
        }
        sync_column(store, &mut batch, Column::TokenTxInfo, token_info)?;

        let mut token_outputs = Vec::new();
        for (address, outpoint, output) in self.tokens.outputs() {
            let mut key = address.to_key().to_vec();
            key.extend_from_slice(&outpoint.to_key());
            token_outputs.push((key, serde_json::to_vec(output)?));
        }
        sync_column(store, &mut batch, Column::TokenOutput, token_outputs)?;

        let frozen_addresses = self
            .freeze
            .addresses
            .iter()
            .map(|address| (address.to_key().to_vec(), PRESENT.to_vec()))
            .collect();
        sync_column(store, &mut batch, Column::FrozenAddress, frozen_addresses)?;

        let frozen_coins = self
            .freeze
            .coins
            .iter()
            .map(|outpoint| (outpoint.to_key().to_vec(), PRESENT.to_vec()))
            .collect();
        sync_column(store, &mut batch, Column::FrozenCoin, frozen_coins)?;

        let meta = vec![
            (
                META_RECEIVING.to_vec(),
                encode_addresses(self.addresses.receiving_addresses(), &self.config)?,
            ),
            (
                META_CHANGE.to_vec(),
                encode_addresses(self.addresses.change_addresses(), &self.config)?,
            ),
            (
                META_TOKEN_DATA_VERSION.to_vec(),
                TOKEN_DATA_VERSION.to_le_bytes().to_vec(),
            ),
            (
                META_STORED_HEIGHT.to_vec(),
                self.local_height().to_le_bytes().to_vec(),
            ),
        ];
        sync_column(store, &mut batch, Column::Meta, meta)?;

        let ops = batch.len();
        store.write_batch(&batch)?;
        log_info!("wallet saved ({ops} store operations)");
        Ok(())
    }

    /// Restores a wallet saved with [`WalletState::save`]. An empty store yields a
    /// fresh wallet.
    pub fn load<S: KeyValueStore + ?Sized>(
        config: WalletConfig,
        mut addresses: AddressBook,
        store: &S,
    ) -> Result<Self, WalletError> {
        if let Some(receiving) = store.get(Column::Meta, META_RECEIVING)? {
            let receiving = decode_addresses(&receiving, &config)?;
            let change = match store.get(Column::Meta, META_CHANGE)? {
                Some(change) => decode_addresses(&change, &config)?,
                None => Vec::new(),
            };
            addresses.restore_lists(receiving, change);
        }
        let mut state = WalletState::new(config, addresses);

        for (key, raw) in read_all(store, Column::Transaction)? {
            let txid = hash_key(Column::Transaction, &key)?;
            let record = TransactionRecord::from_raw(raw)?;
            if record.txid() != txid {
                log_warn!("stored transaction under wrong key; skipping");
                continue;
            }
            state.ledger.insert_record(txid, record);
        }
        for (key, value) in read_all(store, Column::Received)? {
            let txid = hash_key(Column::Received, &key)?;
            state.ledger.received.insert(txid, decode_received(&value)?);
        }
        for (key, value) in read_all(store, Column::Spent)? {
            let txid = hash_key(Column::Spent, &key)?;
            state.ledger.spent.insert(txid, decode_spent(&value)?);
        }
        for (key, value) in read_all(store, Column::PrunedSpend)? {
            let outpoint = OutPoint::from_key(&key)?;
            let spender = hash_key(Column::PrunedSpend, &value)?;
            state.ledger.pruned.put(outpoint, spender);
        }
        for (key, value) in read_all(store, Column::History)? {
            let address = Address::from_key(&key)?;
            state.history.replace(address, decode_history(&value)?);
        }
        for (key, value) in read_all(store, Column::Verified)? {
            let txid = hash_key(Column::Verified, &key)?;
            let mut decoder = Decoder::new(&value);
            let info = VerifiedTx {
                height: decoder.read_i32_le()?,
                timestamp: decoder.read_u32_le()?,
                position: decoder.read_u32_le()?,
            };
            state.verification.add_verified(txid, info);
        }
        for (key, value) in read_all(store, Column::FeeHint)? {
            let txid = hash_key(Column::FeeHint, &key)?;
            let fee: [u8; 8] = value
                .as_slice()
                .try_into()
                .map_err(|_| corrupt(Column::FeeHint, "fee length"))?;
            state.history.fees.insert(txid, Amount::from_le_bytes(fee));
        }

        for (key, value) in read_all(store, Column::TokenType)? {
            let token_id = hash_key(Column::TokenType, &key)?;
            let record: TokenTypeRecord = serde_json::from_slice(&value)?;
            state.tokens.types.insert(token_id, record);
        }
        for (key, value) in read_all(store, Column::TokenTxInfo)? {
            let txid = hash_key(Column::TokenTxInfo, &key)?;
            let info: TokenTxInfo = serde_json::from_slice(&value)?;
            state.tokens.tx_info.insert(txid, info);
        }
        for (key, value) in read_all(store, Column::TokenOutput)? {
            if key.len() != 21 + 36 {
                return Err(corrupt(Column::TokenOutput, "key length"));
            }
            let address = Address::from_key(&key[..21])?;
            let outpoint = OutPoint::from_key(&key[21..])?;
            let output: TokenOutput = serde_json::from_slice(&value)?;
            state
                .tokens
                .outputs
                .entry(address)
                .or_default()
                .insert(outpoint, output);
        }

        for (key, _) in read_all(store, Column::FrozenAddress)? {
            state.freeze.addresses.insert(Address::from_key(&key)?);
        }
        for (key, _) in read_all(store, Column::FrozenCoin)? {
            state.freeze.coins.insert(OutPoint::from_key(&key)?);
        }

        if let Some(height) = store.get(Column::Meta, META_STORED_HEIGHT)? {
            let height: [u8; 4] = height
                .as_slice()
                .try_into()
                .map_err(|_| corrupt(Column::Meta, "stored height length"))?;
            state.set_local_height(i32::from_le_bytes(height));
        }
        let token_data_version = match store.get(Column::Meta, META_TOKEN_DATA_VERSION)? {
            Some(bytes) => bytes
                .as_slice()
                .try_into()
                .map(u32::from_le_bytes)
                .map_err(|_| corrupt(Column::Meta, "token data version length"))?,
            None => 0,
        };

        state.ledger.rebuild_address_index();
        let history = &state.history;
        let verification = &state.verification;
        let pruned = state.ledger.prune_unreferenced(|txid| {
            history.addresses_of(txid).is_some() || verification.is_verified(txid)
        });
        if pruned > 0 {
            log_info!("dropped {pruned} unreferenced stored transactions");
        }
        state.prepare_for_verifier();

        if state.tokens.is_enabled() && token_data_version != TOKEN_DATA_VERSION {
            log_info!(
                "token data version {token_data_version} is stale; rebuilding token state"
            );
            state.rebuild_tokens();
        }
        state.check_history();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{mine, pay};
    use crate::state::tests::record;
    use slpwallet_storage::memory::MemoryStore;

    fn fresh(store: &MemoryStore) -> WalletState {
        WalletState::load(
            WalletConfig::default(),
            AddressBook::imported(vec![mine()]),
            store,
        )
        .expect("load")
    }

    #[test]
    fn empty_store_loads_a_fresh_wallet() {
        let store = MemoryStore::new();
        let state = fresh(&store);
        assert_eq!(state.ledger().transaction_count(), 0);
        assert_eq!(state.addresses().addresses(), vec![mine()]);
    }

    #[test]
    fn save_drops_keys_that_went_stale() {
        let store = MemoryStore::new();
        let mut state = fresh(&store);
        let tx = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let (txid, record) = record(tx);
        state.receive_history(mine(), vec![(txid, 0)], Default::default());
        state.receive_transaction(txid, record, 0);
        state.save(&store).expect("save");
        assert_eq!(store.column_len(Column::Transaction), 1);
        assert_eq!(store.column_len(Column::Received), 1);

        state.receive_history(mine(), Vec::new(), Default::default());
        state.save(&store).expect("save again");
        assert_eq!(store.column_len(Column::Received), 0);
        assert_eq!(store.column_len(Column::Meta), 4);
    }

    #[test]
    fn unreferenced_records_are_dropped_on_load() {
        let store = MemoryStore::new();
        let mut state = fresh(&store);
        let tx = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let (txid, record) = record(tx);
        state.ledger.insert_record(txid, record);
        state.save(&store).expect("save");
        assert_eq!(store.column_len(Column::Transaction), 1);

        let loaded = fresh(&store);
        assert!(!loaded.ledger().contains(&txid));
    }
}
