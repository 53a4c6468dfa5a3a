//! Unsigned transaction construction: change policy, fee estimation, coin choice
//! and the deterministic input/output ordering.

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use slpwallet_consensus::constants::SEQUENCE_FINAL;
use slpwallet_consensus::Amount;
use slpwallet_primitives::{Address, Transaction, TxIn, TxOut};

use crate::coins::Coin;
use crate::error::WalletError;
use crate::state::WalletState;

/// Bytes a signed p2pkh scriptSig adds to an input with an empty one.
pub const ESTIMATED_SCRIPT_SIG_LEN: usize = 107;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputAmount {
    Fixed(Amount),
    /// Everything left after the other outputs and the fee.
    Max,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentOutput {
    pub script_pubkey: Vec<u8>,
    pub amount: OutputAmount,
}

impl PaymentOutput {
    pub fn to_address(address: &Address, amount: OutputAmount) -> Self {
        Self {
            script_pubkey: address.script_pubkey(),
            amount,
        }
    }

    /// A zero-value data carrier, e.g. a token message.
    pub fn op_return(script: Vec<u8>) -> Self {
        Self {
            script_pubkey: script,
            amount: OutputAmount::Fixed(0),
        }
    }

    fn to_tx_out(&self) -> TxOut {
        let value = match self.amount {
            OutputAmount::Fixed(value) => value,
            OutputAmount::Max => 0,
        };
        TxOut {
            value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// An unsigned transaction with the coins its inputs spend, in input order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub inputs: Vec<Coin>,
    pub estimated_size: usize,
}

impl UnsignedTransaction {
    pub fn assemble(inputs: Vec<Coin>, outputs: Vec<TxOut>) -> Self {
        let tx = Transaction {
            version: 1,
            vin: inputs
                .iter()
                .map(|coin| TxIn {
                    prevout: coin.outpoint,
                    script_sig: Vec::new(),
                    sequence: SEQUENCE_FINAL - 1,
                })
                .collect(),
            vout: outputs,
            lock_time: 0,
        };
        let estimated_size = estimated_size(&tx);
        Self {
            tx,
            inputs,
            estimated_size,
        }
    }

    pub fn input_value(&self) -> Amount {
        self.inputs.iter().map(|coin| coin.value).sum()
    }

    pub fn fee(&self) -> Amount {
        self.input_value() - self.tx.output_value()
    }

    /// BIP-LI01 ordering: inputs by displayed prevout hash then index, outputs by
    /// value then script bytes.
    pub fn sort(&mut self) {
        let mut paired: Vec<(Coin, TxIn)> = self
            .inputs
            .drain(..)
            .zip(self.tx.vin.drain(..))
            .collect();
        paired.sort_by(|(a, _), (b, _)| compare_prevouts(a, b));
        for (coin, input) in paired {
            self.inputs.push(coin);
            self.tx.vin.push(input);
        }
        self.tx.vout.sort_by(|a, b| {
            a.value
                .cmp(&b.value)
                .then_with(|| a.script_pubkey.cmp(&b.script_pubkey))
        });
    }
}

fn compare_prevouts(a: &Coin, b: &Coin) -> Ordering {
    a.outpoint
        .hash
        .iter()
        .rev()
        .cmp(b.outpoint.hash.iter().rev())
        .then_with(|| a.outpoint.index.cmp(&b.outpoint.index))
}

/// Serialized size once every empty scriptSig carries a signature and key.
pub fn estimated_size(tx: &Transaction) -> usize {
    let unsigned = tx
        .vin
        .iter()
        .filter(|input| input.script_sig.is_empty())
        .count();
    tx.serialized_size() + unsigned * ESTIMATED_SCRIPT_SIG_LEN
}

/// Selects inputs from `coins` to pay `outputs` and adds change.
pub trait CoinChooser: Send + Sync {
    fn make_tx(
        &self,
        coins: &[Coin],
        outputs: &[TxOut],
        change_addresses: &[Address],
        fee_for_size: &dyn Fn(usize) -> Amount,
        dust_threshold: Amount,
        mandatory: &[Coin],
    ) -> Result<UnsignedTransaction, WalletError>;
}

/// Spends the largest coins first and splits change over the offered change
/// addresses while each piece stays above dust.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleCoinChooser;

impl CoinChooser for SimpleCoinChooser {
    fn make_tx(
        &self,
        coins: &[Coin],
        outputs: &[TxOut],
        change_addresses: &[Address],
        fee_for_size: &dyn Fn(usize) -> Amount,
        dust_threshold: Amount,
        mandatory: &[Coin],
    ) -> Result<UnsignedTransaction, WalletError> {
        let target: Amount = outputs.iter().map(|output| output.value).sum();
        let mut candidates = coins.to_vec();
        candidates.sort_by(|a, b| {
            b.value
                .cmp(&a.value)
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });
        let mut candidates = candidates.into_iter();
        let mut selected = mandatory.to_vec();
        loop {
            let draft = UnsignedTransaction::assemble(selected.clone(), outputs.to_vec());
            let fee = fee_for_size(draft.estimated_size);
            let available = draft.input_value();
            if !selected.is_empty() && available >= target + fee {
                return Ok(add_change(
                    draft,
                    change_addresses,
                    fee_for_size,
                    dust_threshold,
                ));
            }
            match candidates.next() {
                Some(coin) => selected.push(coin),
                None => {
                    return Err(WalletError::NotEnoughFunds {
                        shortfall: Some(target + fee - available),
                    })
                }
            }
        }
    }
}

fn add_change(
    draft: UnsignedTransaction,
    change_addresses: &[Address],
    fee_for_size: &dyn Fn(usize) -> Amount,
    dust_threshold: Amount,
) -> UnsignedTransaction {
    let target = draft.tx.output_value();
    let mut pieces = change_addresses.len();
    while pieces > 0 {
        let mut outputs = draft.tx.vout.clone();
        outputs.extend(change_addresses[..pieces].iter().map(|address| TxOut {
            value: 0,
            script_pubkey: address.script_pubkey(),
        }));
        let mut candidate = UnsignedTransaction::assemble(draft.inputs.clone(), outputs);
        let change = draft.input_value() - target - fee_for_size(candidate.estimated_size);
        let piece = change / pieces as Amount;
        if piece > dust_threshold {
            let first_change = draft.tx.vout.len();
            for output in &mut candidate.tx.vout[first_change..] {
                output.value = piece;
            }
            // Integer division leaves a remainder for the last change output.
            if let Some(last) = candidate.tx.vout.last_mut() {
                last.value += change - piece * pieces as Amount;
            }
            return candidate;
        }
        pieces -= 1;
    }
    draft
}

impl WalletState {
    /// Change destinations for a new transaction.
    fn change_addresses_for(&self, change_address: Option<Address>) -> Result<Vec<Address>, WalletError> {
        if let Some(address) = change_address {
            return Ok(vec![address]);
        }
        let change = self.addresses.change_addresses();
        let recent = &change[change.len().saturating_sub(self.config.gap_limit_for_change)..];
        if self.config.use_change && !recent.is_empty() {
            let unused: Vec<Address> = recent
                .iter()
                .filter(|address| !self.history.is_used(address))
                .copied()
                .collect();
            if !unused.is_empty() {
                return Ok(unused);
            }
            return Ok(recent
                .choose(&mut rand::thread_rng())
                .copied()
                .into_iter()
                .collect());
        }
        self.addresses
            .receiving_addresses()
            .first()
            .map(|address| vec![*address])
            .ok_or(WalletError::InvalidData("wallet has no addresses"))
    }

    /// Builds an unsigned transaction paying `outputs` from `inputs`. A single output
    /// may take whatever remains; otherwise `chooser` picks the inputs and adds change.
    /// `mandatory_coins` are always spent and disable the deterministic sort.
    pub fn make_unsigned_transaction(
        &self,
        inputs: Vec<Coin>,
        outputs: Vec<PaymentOutput>,
        fixed_fee: Option<Amount>,
        change_address: Option<Address>,
        mandatory_coins: Vec<Coin>,
        chooser: &dyn CoinChooser,
    ) -> Result<UnsignedTransaction, WalletError> {
        let mut max_index = None;
        for (index, output) in outputs.iter().enumerate() {
            if output.amount == OutputAmount::Max {
                if max_index.is_some() {
                    return Err(WalletError::MultipleMaxOutputs);
                }
                max_index = Some(index);
            }
        }
        if inputs.is_empty() {
            return Err(WalletError::NotEnoughFunds { shortfall: None });
        }
        if fixed_fee.is_none() && self.config.fee_per_kb.is_none() {
            return Err(WalletError::FeeEstimatesUnavailable);
        }

        let change_addresses = self.change_addresses_for(change_address)?;
        let config = &self.config;
        let fee_for_size = |size: usize| -> Amount {
            fixed_fee
                .or_else(|| config.estimate_fee(size))
                .unwrap_or_default()
        };
        let tx_outputs: Vec<TxOut> = outputs.iter().map(PaymentOutput::to_tx_out).collect();

        let mut unsigned = match max_index {
            None => {
                let max_change = if self.config.multiple_change {
                    self.config.max_change_outputs.max(1)
                } else {
                    1
                };
                let change = &change_addresses[..change_addresses.len().min(max_change)];
                chooser.make_tx(
                    &inputs,
                    &tx_outputs,
                    change,
                    &fee_for_size,
                    self.config.dust_threshold,
                    &mandatory_coins,
                )?
            }
            Some(index) => {
                let mut coins = mandatory_coins.clone();
                coins.extend(inputs);
                let draft = UnsignedTransaction::assemble(coins, tx_outputs);
                let fee = fee_for_size(draft.estimated_size);
                let amount = (draft.input_value() - draft.tx.output_value() - fee).max(0);
                let mut max_tx = draft;
                max_tx.tx.vout[index].value = amount;
                max_tx
            }
        };

        let fee = unsigned.fee();
        if fee > self.config.max_fee_rate * unsigned.estimated_size as Amount {
            return Err(WalletError::ExcessiveFee {
                fee,
                size: unsigned.estimated_size,
            });
        }
        if mandatory_coins.is_empty() {
            unsigned.sort();
        }
        unsigned.tx.lock_time = u32::try_from(self.local_height().max(0)).unwrap_or_default();
        Ok(unsigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::tests::CountingDeriver;
    use crate::addresses::AddressBook;
    use crate::config::WalletConfig;
    use crate::ledger::tests::{mine, other};
    use crate::state::tests::state;
    use slpwallet_primitives::OutPoint;

    fn coin(seed: u8, value: Amount) -> Coin {
        Coin {
            outpoint: OutPoint::new([seed; 32], u32::from(seed)),
            address: mine(),
            value,
            height: 10,
            is_coinbase: false,
            is_frozen_coin: false,
            token: None,
        }
    }

    #[test]
    fn spend_max_takes_everything_but_the_fee() {
        let state = state();
        let unsigned = state
            .make_unsigned_transaction(
                vec![coin(1, 10_000), coin(2, 5_000)],
                vec![PaymentOutput::to_address(&other(), OutputAmount::Max)],
                None,
                None,
                Vec::new(),
                &SimpleCoinChooser,
            )
            .expect("max spend");
        assert_eq!(unsigned.tx.vout.len(), 1);
        assert_eq!(unsigned.fee(), unsigned.estimated_size as Amount);
        assert_eq!(unsigned.tx.vout[0].value, 15_000 - unsigned.fee());
    }

    #[test]
    fn rejects_bad_requests() {
        let state = state();
        let max = || PaymentOutput::to_address(&other(), OutputAmount::Max);
        assert!(matches!(
            state.make_unsigned_transaction(
                vec![coin(1, 10_000)],
                vec![max(), max()],
                None,
                None,
                Vec::new(),
                &SimpleCoinChooser,
            ),
            Err(WalletError::MultipleMaxOutputs)
        ));
        assert!(matches!(
            state.make_unsigned_transaction(
                Vec::new(),
                vec![max()],
                None,
                None,
                Vec::new(),
                &SimpleCoinChooser,
            ),
            Err(WalletError::NotEnoughFunds { shortfall: None })
        ));
        assert!(matches!(
            state.make_unsigned_transaction(
                vec![coin(1, 100_000)],
                vec![PaymentOutput::to_address(&other(), OutputAmount::Fixed(1_000))],
                Some(90_000),
                None,
                Vec::new(),
                &SimpleCoinChooser,
            ),
            Err(WalletError::ExcessiveFee { fee: 90_000, .. })
        ));
        assert!(matches!(
            state.make_unsigned_transaction(
                vec![coin(1, 1_000)],
                vec![PaymentOutput::to_address(&other(), OutputAmount::Fixed(5_000))],
                Some(200),
                None,
                Vec::new(),
                &SimpleCoinChooser,
            ),
            Err(WalletError::NotEnoughFunds { shortfall: Some(4_200) })
        ));

        let mut no_fee = state.config().clone();
        no_fee.fee_per_kb = None;
        let state = WalletState::new(no_fee, AddressBook::imported(vec![mine()]));
        assert!(matches!(
            state.make_unsigned_transaction(
                vec![coin(1, 10_000)],
                vec![max()],
                None,
                None,
                Vec::new(),
                &SimpleCoinChooser,
            ),
            Err(WalletError::FeeEstimatesUnavailable)
        ));
    }

    #[test]
    fn chooser_pays_change_to_an_unused_change_address() {
        let mut state = WalletState::new(
            WalletConfig {
                gap_limit: 2,
                gap_limit_for_change: 2,
                ..WalletConfig::default()
            },
            AddressBook::deterministic(Box::new(CountingDeriver)),
        );
        state.synchronize().expect("sync");
        state.set_local_height(321);
        let change = state.addresses().change_addresses().to_vec();

        let unsigned = state
            .make_unsigned_transaction(
                vec![coin(1, 3_000), coin(2, 50_000), coin(3, 20_000)],
                vec![PaymentOutput::to_address(&other(), OutputAmount::Fixed(30_000))],
                Some(500),
                None,
                Vec::new(),
                &SimpleCoinChooser,
            )
            .expect("payment");
        assert_eq!(unsigned.inputs.len(), 1);
        assert_eq!(unsigned.inputs[0].value, 50_000);
        assert_eq!(unsigned.fee(), 500);
        assert_eq!(unsigned.tx.lock_time, 321);
        let change_out = unsigned
            .tx
            .vout
            .iter()
            .find(|output| output.script_pubkey == change[0].script_pubkey())
            .expect("change output");
        assert_eq!(change_out.value, 19_500);
    }

    #[test]
    fn sort_orders_by_displayed_hash_and_value() {
        let mut low = coin(1, 1_000);
        low.outpoint.hash[31] = 0x01;
        let mut high = coin(2, 1_000);
        high.outpoint.hash[0] = 0xff;
        high.outpoint.hash[31] = 0x00;
        let mut unsigned = UnsignedTransaction::assemble(
            vec![low, high],
            vec![
                TxOut {
                    value: 900,
                    script_pubkey: vec![0x51],
                },
                TxOut {
                    value: 100,
                    script_pubkey: vec![0x52],
                },
            ],
        );
        unsigned.sort();
        assert_eq!(unsigned.inputs[0].outpoint, high.outpoint);
        assert_eq!(unsigned.tx.vin[0].prevout, high.outpoint);
        assert_eq!(unsigned.tx.vout[0].value, 100);
    }
}
