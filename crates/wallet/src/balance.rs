//! Per-address balance derivation and its cache.

use std::collections::{BTreeSet, HashMap};

use slpwallet_consensus::{Amount, Hash256};
use slpwallet_primitives::{Address, OutPoint};

use crate::ledger::AddressIo;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    pub confirmed: Amount,
    pub unconfirmed: Amount,
    pub immature: Amount,
}

impl Balance {
    pub fn new(confirmed: Amount, unconfirmed: Amount, immature: Amount) -> Self {
        Self {
            confirmed,
            unconfirmed,
            immature,
        }
    }

    pub fn total(&self) -> Amount {
        self.confirmed + self.unconfirmed + self.immature
    }
}

impl std::ops::AddAssign for Balance {
    fn add_assign(&mut self, other: Self) {
        self.confirmed += other.confirmed;
        self.unconfirmed += other.unconfirmed;
        self.immature += other.immature;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bucket {
    Confirmed,
    Unconfirmed,
    Immature,
}

/// Result of a balance derivation. Addresses that ever received a coinbase output are
/// not cacheable because their immature part moves with the chain tip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Computed {
    pub balance: Balance,
    pub had_coinbase: bool,
}

/// Derives the balance of one address. A spend removes its funding output from the
/// bucket that output was counted in.
pub fn compute_balance(
    io: &AddressIo,
    height_of: impl Fn(&Hash256) -> i32,
    local_height: i32,
    coinbase_maturity: i32,
    frozen_coins: Option<&BTreeSet<OutPoint>>,
) -> Computed {
    let mut balance = Balance::default();
    let mut had_coinbase = false;
    for (outpoint, output) in &io.received {
        if frozen_coins.is_some_and(|frozen| frozen.contains(outpoint)) {
            continue;
        }
        had_coinbase |= output.is_coinbase;
        let height = height_of(&outpoint.hash);
        let bucket = if output.is_coinbase && height + coinbase_maturity > local_height {
            Bucket::Immature
        } else if height > 0 {
            Bucket::Confirmed
        } else {
            Bucket::Unconfirmed
        };
        let value = if io.spent.contains_key(outpoint) {
            0
        } else {
            output.value
        };
        match bucket {
            Bucket::Confirmed => balance.confirmed += value,
            Bucket::Unconfirmed => balance.unconfirmed += value,
            Bucket::Immature => balance.immature += value,
        }
    }
    Computed {
        balance,
        had_coinbase,
    }
}

#[derive(Clone, Debug, Default)]
pub struct BalanceCache {
    entries: HashMap<Address, Balance>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<Balance> {
        self.entries.get(address).copied()
    }

    /// Stores `computed` unless the address holds coinbase history.
    pub fn store(&mut self, address: Address, computed: Computed) {
        if !computed.had_coinbase {
            self.entries.insert(address, computed.balance);
        }
    }

    pub fn invalidate(&mut self, address: &Address) {
        self.entries.remove(address);
    }

    pub fn invalidate_all<'a>(&mut self, addresses: impl IntoIterator<Item = &'a Address>) {
        for address in addresses {
            self.entries.remove(address);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
