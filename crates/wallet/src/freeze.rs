use std::collections::BTreeSet;

use slpwallet_log::log_warn;
use slpwallet_primitives::{Address, OutPoint};

use crate::balance::Balance;
use crate::coins::Coin;
use crate::error::WalletError;
use crate::state::WalletState;

/// Address-level and coin-level freezes. They are set independently; a coin is
/// spendable only when neither applies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreezeState {
    pub(crate) addresses: BTreeSet<Address>,
    pub(crate) coins: BTreeSet<OutPoint>,
}

impl FreezeState {
    pub fn addresses(&self) -> &BTreeSet<Address> {
        &self.addresses
    }

    pub fn coins(&self) -> &BTreeSet<OutPoint> {
        &self.coins
    }
}

impl WalletState {
    /// Freezes or thaws `addresses`. Nothing changes unless every address is ours.
    pub fn set_frozen_state(&mut self, addresses: &[Address], freeze: bool) -> Result<(), WalletError> {
        if let Some(foreign) = addresses.iter().find(|address| !self.is_mine(address)) {
            return Err(WalletError::AddressNotMine(*foreign));
        }
        for address in addresses {
            if freeze {
                self.freeze.addresses.insert(*address);
            } else {
                self.freeze.addresses.remove(address);
            }
        }
        Ok(())
    }

    /// Returns how many coins were updated.
    pub fn set_frozen_coin_state(&mut self, coins: &[OutPoint], freeze: bool) -> usize {
        for outpoint in coins {
            if freeze {
                self.freeze.coins.insert(*outpoint);
            } else {
                self.freeze.coins.remove(outpoint);
            }
        }
        coins.len()
    }

    pub fn is_frozen(&self, address: &Address) -> bool {
        self.freeze.addresses.contains(address)
    }

    /// Coin-level freeze of `coin`, correcting its flag if it went stale.
    pub fn is_frozen_coin(&self, coin: &mut Coin) -> bool {
        let frozen = self.freeze.coins.contains(&coin.outpoint);
        if frozen != coin.is_frozen_coin {
            log_warn!("coin {} has stale frozen flag", coin.outpoint);
            coin.is_frozen_coin = frozen;
        }
        frozen
    }

    /// Value locked by either kind of freeze.
    pub fn frozen_balance(&mut self) -> Balance {
        if self.freeze.coins.is_empty() {
            let frozen: Vec<Address> = self.freeze.addresses.iter().copied().collect();
            return self.wallet_balance(Some(&frozen), false, false);
        }
        let unfrozen = self.wallet_balance(None, true, true);
        let all = self.wallet_balance(None, false, false);
        Balance::new(
            all.confirmed - unfrozen.confirmed,
            all.unconfirmed - unfrozen.unconfirmed,
            all.immature - unfrozen.immature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{mine, other, pay};
    use crate::state::tests::{record, state};

    #[test]
    fn only_owned_addresses_freeze() {
        let mut state = state();
        assert!(matches!(
            state.set_frozen_state(&[mine(), other()], true),
            Err(WalletError::AddressNotMine(address)) if address == other()
        ));
        assert!(!state.is_frozen(&mine()));
        state.set_frozen_state(&[mine()], true).expect("freeze");
        assert!(state.is_frozen(&mine()));
        state.set_frozen_state(&[mine()], false).expect("thaw");
        assert!(!state.is_frozen(&mine()));
    }

    #[test]
    fn frozen_balance_uses_either_freeze() {
        let mut state = state();
        let tx = pay(
            &[OutPoint::new([9; 32], 0)],
            &[(mine(), 3_000), (mine(), 7_000)],
            0,
        );
        let (txid, record) = record(tx);
        state.receive_transaction(txid, record, 0);

        state.set_frozen_state(&[mine()], true).expect("freeze");
        assert_eq!(state.frozen_balance().total(), 10_000);
        state.set_frozen_state(&[mine()], false).expect("thaw");
        assert_eq!(state.frozen_balance().total(), 0);

        state.set_frozen_coin_state(&[OutPoint::new(txid, 1)], true);
        assert_eq!(state.frozen_balance(), Balance::new(0, 7_000, 0));
        assert_eq!(state.wallet_balance(None, false, false).total(), 10_000);
    }
}
