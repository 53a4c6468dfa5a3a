//! Unspent output enumeration and the spendability policy for plain and token coins.

use slpwallet_consensus::{Amount, Hash256};
use slpwallet_primitives::{Address, OutPoint};

use crate::error::WalletError;
use crate::state::WalletState;
use crate::token::slp::{SlpBody, SlpMessage};
use crate::token::{TokenClass, TokenQuantity, Validity};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoinToken {
    pub class: TokenClass,
    pub token_id: Option<Hash256>,
    pub quantity: TokenQuantity,
    pub validity: Validity,
}

impl CoinToken {
    pub fn is_baton(&self) -> bool {
        self.quantity == TokenQuantity::MintBaton
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub address: Address,
    pub value: Amount,
    pub height: i32,
    pub is_coinbase: bool,
    pub is_frozen_coin: bool,
    pub token: Option<CoinToken>,
}

impl Coin {
    pub fn token_amount(&self) -> u64 {
        match self.token.map(|token| token.quantity) {
            Some(TokenQuantity::Amount(amount)) => amount,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoQuery {
    /// All wallet addresses when `None`.
    pub domain: Option<Vec<Address>>,
    /// Skips frozen addresses and frozen coins.
    pub exclude_frozen: bool,
    pub mature_only: bool,
    pub confirmed_only: bool,
    pub exclude_token_outputs: bool,
}

impl Default for UtxoQuery {
    fn default() -> Self {
        Self {
            domain: None,
            exclude_frozen: false,
            mature_only: false,
            confirmed_only: false,
            exclude_token_outputs: true,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUtxoQuery {
    pub domain: Option<Vec<Address>>,
    pub exclude_frozen: bool,
    pub confirmed_only: bool,
    /// Admits outputs of transactions judged invalid, for burning.
    pub include_invalid: bool,
    /// Admits the valid minting baton, for burning.
    pub include_baton: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenBalance {
    pub valid: u128,
    pub unknown: u128,
    pub invalid_message: u128,
    pub invalid_insufficient_inputs: u128,
    pub invalid_type_change: u128,
    /// Valid quantity on coins that are neither coin- nor address-frozen.
    pub unfrozen_valid: u128,
}

impl TokenBalance {
    pub fn invalid(&self) -> u128 {
        self.invalid_message + self.invalid_insufficient_inputs + self.invalid_type_change
    }

    pub fn frozen_valid(&self) -> u128 {
        self.valid - self.unfrozen_valid
    }
}

impl WalletState {
    /// Unspent outputs of `address`. Frozen coin markers of spent outputs are purged.
    fn address_coins(&mut self, address: &Address) -> Vec<Coin> {
        let io = self.ledger.address_io(address);
        let mut coins = Vec::with_capacity(io.received.len());
        for (outpoint, output) in io.received {
            if io.spent.contains_key(&outpoint) {
                self.freeze.coins.remove(&outpoint);
                continue;
            }
            let token = self.tokens.output(address, &outpoint).map(|token| CoinToken {
                class: token.class,
                token_id: token.token_id,
                quantity: token.quantity,
                validity: self.tokens.validity(&outpoint.hash).unwrap_or_default(),
            });
            coins.push(Coin {
                outpoint,
                address: *address,
                value: output.value,
                height: self.verification.tx_height(&outpoint.hash).height,
                is_coinbase: output.is_coinbase,
                is_frozen_coin: self.freeze.coins.contains(&outpoint),
                token,
            });
        }
        coins
    }

    fn query_domain(&self, domain: &Option<Vec<Address>>, exclude_frozen: bool) -> Vec<Address> {
        let mut domain = domain
            .clone()
            .unwrap_or_else(|| self.addresses.addresses());
        if exclude_frozen {
            domain.retain(|address| !self.freeze.addresses.contains(address));
        }
        domain
    }

    pub fn utxos(&mut self, query: &UtxoQuery) -> Vec<Coin> {
        let local_height = self.local_height();
        let maturity = self.config.coinbase_maturity;
        let mut out = Vec::new();
        for address in self.query_domain(&query.domain, query.exclude_frozen) {
            for coin in self.address_coins(&address) {
                if query.exclude_token_outputs && coin.token.is_some() {
                    continue;
                }
                if query.exclude_frozen && coin.is_frozen_coin {
                    continue;
                }
                if query.confirmed_only && coin.height <= 0 {
                    continue;
                }
                if query.mature_only && coin.is_coinbase && coin.height + maturity > local_height
                {
                    continue;
                }
                out.push(coin);
            }
        }
        out
    }

    /// Coins carrying `token_id` that may be spent as that token.
    pub fn token_utxos(&mut self, token_id: &Hash256, query: &TokenUtxoQuery) -> Vec<Coin> {
        let mut out = Vec::new();
        for address in self.query_domain(&query.domain, query.exclude_frozen) {
            for coin in self.address_coins(&address) {
                let Some(token) = coin.token else {
                    continue;
                };
                if token.token_id != Some(*token_id) {
                    continue;
                }
                let admitted = (query.include_baton
                    && token.is_baton()
                    && token.validity == Validity::Valid)
                    || (query.include_invalid && token.validity != Validity::Unknown)
                    || (token.validity == Validity::Valid && !token.is_baton());
                if !admitted {
                    continue;
                }
                if query.exclude_frozen && coin.is_frozen_coin {
                    continue;
                }
                if query.confirmed_only && coin.height <= 0 {
                    continue;
                }
                out.push(coin);
            }
        }
        out
    }

    /// Plain coins a new transaction may spend.
    pub fn spendable_coins(&mut self, domain: Option<Vec<Address>>) -> Vec<Coin> {
        let query = UtxoQuery {
            domain,
            exclude_frozen: true,
            mature_only: true,
            confirmed_only: self.config.confirmed_only,
            exclude_token_outputs: true,
        };
        self.utxos(&query)
    }

    pub fn token_spendable_coins(
        &mut self,
        token_id: &Hash256,
        domain: Option<Vec<Address>>,
    ) -> Vec<Coin> {
        let query = TokenUtxoQuery {
            domain,
            exclude_frozen: true,
            confirmed_only: self.config.confirmed_only,
            ..TokenUtxoQuery::default()
        };
        self.token_utxos(token_id, &query)
    }

    /// Unspent quantity of `token_id` per validity class. Minting batons carry no quantity.
    pub fn token_balance(&mut self, token_id: &Hash256) -> TokenBalance {
        let confirmed_only = self.config.confirmed_only;
        let mut balance = TokenBalance::default();
        for address in self.addresses.addresses() {
            let address_frozen = self.freeze.addresses.contains(&address);
            for coin in self.address_coins(&address) {
                let Some(token) = coin.token else {
                    continue;
                };
                if token.token_id != Some(*token_id) || token.is_baton() {
                    continue;
                }
                if confirmed_only && coin.height <= 0 {
                    continue;
                }
                let quantity = u128::from(coin.token_amount());
                match token.validity {
                    Validity::Valid => {
                        balance.valid += quantity;
                        if !coin.is_frozen_coin && !address_frozen {
                            balance.unfrozen_valid += quantity;
                        }
                    }
                    Validity::Unknown => balance.unknown += quantity,
                    Validity::InvalidMessage => balance.invalid_message += quantity,
                    Validity::InvalidInsufficientInputs => {
                        balance.invalid_insufficient_inputs += quantity
                    }
                    Validity::InvalidTypeChange => balance.invalid_type_change += quantity,
                }
            }
        }
        balance
    }

    /// Base-coin value sitting on unspent token outputs.
    pub fn token_locked_balance(&self) -> Amount {
        let mut locked = 0;
        for (address, outputs) in &self.tokens.outputs {
            let io = self.ledger.address_io(address);
            for outpoint in outputs.keys() {
                if io.spent.contains_key(outpoint) {
                    continue;
                }
                locked += self.ledger.received_value(outpoint, address).unwrap_or(0);
            }
        }
        locked
    }

    /// Rejects a SEND the wallet cannot cover with valid, unfrozen tokens.
    pub fn check_sufficient_token_balance(&mut self, message: &SlpMessage) -> Result<(), WalletError> {
        if !self.config.tokens_enabled {
            return Ok(());
        }
        let SlpBody::Send { token_id, amounts } = &message.body else {
            return Ok(());
        };
        let needed: u128 = amounts.iter().map(|amount| u128::from(*amount)).sum();
        let balance = self.token_balance(token_id);
        if needed > balance.valid {
            return Err(WalletError::NotEnoughTokens {
                needed,
                available: balance.valid,
            });
        }
        if needed > balance.unfrozen_valid {
            return Err(WalletError::NotEnoughUnfrozenTokens {
                needed,
                available: balance.unfrozen_valid,
            });
        }
        Ok(())
    }

    /// The valid, unspent minting baton of `token_id`.
    pub fn token_baton(&mut self, token_id: &Hash256) -> Result<Coin, WalletError> {
        let holders: Vec<Address> = self
            .tokens
            .outputs()
            .filter(|(_, _, output)| output.is_baton() && output.token_id == Some(*token_id))
            .map(|(address, _, _)| *address)
            .collect();
        for address in holders {
            let query = TokenUtxoQuery {
                domain: Some(vec![address]),
                include_baton: true,
                ..TokenUtxoQuery::default()
            };
            let baton = self
                .token_utxos(token_id, &query)
                .into_iter()
                .find(|coin| coin.token.is_some_and(|token| token.is_baton()));
            if let Some(baton) = baton {
                return Ok(baton);
            }
        }
        Err(WalletError::NoMintingBaton)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{mine, pay};
    use crate::state::tests::{record, state};
    use crate::token::tests::{genesis_tx, send_tx};

    #[test]
    fn utxo_filters() {
        let mut state = state();
        let plain = pay(&[OutPoint::new([9; 32], 0)], &[(mine(), 5_000)], 0);
        let (plain_id, plain_record) = record(plain);
        state.receive_transaction(plain_id, plain_record, 0);

        let mut coinbase = pay(&[OutPoint::null()], &[(mine(), 50_000)], 0);
        coinbase.vin[0].script_sig = vec![0x01, 0x07];
        let (coinbase_id, coinbase_record) = record(coinbase);
        state.receive_transaction(coinbase_id, coinbase_record, 100);
        state.set_local_height(150);

        assert_eq!(state.utxos(&UtxoQuery::default()).len(), 2);
        let confirmed = state.utxos(&UtxoQuery {
            confirmed_only: true,
            ..UtxoQuery::default()
        });
        assert_eq!(confirmed.len(), 1);
        assert!(confirmed[0].is_coinbase);
        assert!(state.spendable_coins(None).iter().all(|coin| !coin.is_coinbase));

        state.set_frozen_coin_state(&[OutPoint::new(plain_id, 0)], true);
        assert!(state.spendable_coins(None).is_empty());
        state.set_local_height(200);
        assert_eq!(state.spendable_coins(None).len(), 1);
    }

    #[test]
    fn token_coins_and_balances() {
        let mut state = state();
        let genesis = genesis_tx(0, 1_000);
        let token_id = genesis.txid();
        let (_, genesis_record) = record(genesis);
        state.receive_transaction(token_id, genesis_record, 0);
        let send = send_tx(&token_id, &[700, 300], OutPoint::new(token_id, 1));
        let send_id = send.txid();
        let (_, send_record) = record(send);
        state.receive_transaction(send_id, send_record, 0);

        // Token outputs never appear as plain coins.
        assert!(state.utxos(&UtxoQuery::default()).is_empty());
        assert!(state.token_spendable_coins(&token_id, None).is_empty());
        assert_eq!(state.token_balance(&token_id).unknown, 700);
        assert!(matches!(state.token_baton(&token_id), Err(WalletError::NoMintingBaton)));

        state.apply_validity(&token_id, Validity::Valid);
        state.apply_validity(&send_id, Validity::Valid);
        let coins = state.token_spendable_coins(&token_id, None);
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].token_amount(), 700);
        let baton = state.token_baton(&token_id).expect("baton");
        assert_eq!(baton.outpoint, OutPoint::new(token_id, 2));
        assert_eq!(state.token_locked_balance(), 546 * 2);

        state.set_frozen_state(&[mine()], true).expect("freeze");
        let balance = state.token_balance(&token_id);
        assert_eq!(balance.valid, 700);
        assert_eq!(balance.unfrozen_valid, 0);
        let message = crate::token::slp::parse(
            &crate::token::slp::build_send(1, &token_id, &[500]).expect("script"),
        )
        .expect("parse");
        assert!(matches!(
            state.check_sufficient_token_balance(&message),
            Err(WalletError::NotEnoughUnfrozenTokens { needed: 500, available: 0 })
        ));
        state.set_frozen_state(&[mine()], false).expect("thaw");
        state.check_sufficient_token_balance(&message).expect("enough");
        let too_much = crate::token::slp::parse(
            &crate::token::slp::build_send(1, &token_id, &[800]).expect("script"),
        )
        .expect("parse");
        assert!(matches!(
            state.check_sufficient_token_balance(&too_much),
            Err(WalletError::NotEnoughTokens { needed: 800, available: 700 })
        ));
    }
}
