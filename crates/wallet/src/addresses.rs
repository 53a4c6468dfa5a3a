//! Wallet address sets and the ownership classifier built over them.

use std::collections::HashSet;

use slpwallet_primitives::Address;

use crate::error::WalletError;

/// Key-derivation collaborator for deterministic wallets. Multisig cosigner sets are
/// expressed as derivers that hand back p2sh addresses.
pub trait AddressDeriver: Send {
    fn derive(&self, for_change: bool, index: u32) -> Result<Address, WalletError>;
}

pub enum WalletKind {
    Imported(Vec<Address>),
    Deterministic {
        deriver: Box<dyn AddressDeriver>,
        receiving: Vec<Address>,
        change: Vec<Address>,
    },
}

/// Owned addresses plus set lookups over them. The sets are rebuilt whenever an address
/// leaves the wallet and extended when one is added.
pub struct AddressBook {
    kind: WalletKind,
    receiving_set: HashSet<Address>,
    change_set: HashSet<Address>,
}

impl AddressBook {
    pub fn imported(addresses: Vec<Address>) -> Self {
        let mut unique = Vec::with_capacity(addresses.len());
        let mut seen = HashSet::new();
        for address in addresses {
            if seen.insert(address) {
                unique.push(address);
            }
        }
        Self::from_kind(WalletKind::Imported(unique))
    }

    pub fn deterministic(deriver: Box<dyn AddressDeriver>) -> Self {
        Self::from_kind(WalletKind::Deterministic {
            deriver,
            receiving: Vec::new(),
            change: Vec::new(),
        })
    }

    pub fn from_kind(kind: WalletKind) -> Self {
        let mut book = Self {
            kind,
            receiving_set: HashSet::new(),
            change_set: HashSet::new(),
        };
        book.invalidate_cache();
        book
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self.kind, WalletKind::Deterministic { .. })
    }

    pub fn receiving_addresses(&self) -> &[Address] {
        match &self.kind {
            WalletKind::Imported(addresses) => addresses,
            WalletKind::Deterministic { receiving, .. } => receiving,
        }
    }

    pub fn change_addresses(&self) -> &[Address] {
        match &self.kind {
            WalletKind::Imported(_) => &[],
            WalletKind::Deterministic { change, .. } => change,
        }
    }

    /// Receiving addresses followed by change addresses.
    pub fn addresses(&self) -> Vec<Address> {
        let mut out = self.receiving_addresses().to_vec();
        out.extend_from_slice(self.change_addresses());
        out
    }

    pub fn len(&self) -> usize {
        self.receiving_set.len() + self.change_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mine(&self, address: &Address) -> bool {
        self.receiving_set.contains(address) || self.change_set.contains(address)
    }

    pub fn is_change(&self, address: &Address) -> bool {
        self.change_set.contains(address)
    }

    pub fn invalidate_cache(&mut self) {
        self.receiving_set = self.receiving_addresses().iter().copied().collect();
        self.change_set = self.change_addresses().iter().copied().collect();
    }

    pub fn create_new_address(&mut self, for_change: bool) -> Result<Address, WalletError> {
        let WalletKind::Deterministic {
            deriver,
            receiving,
            change,
        } = &mut self.kind
        else {
            return Err(WalletError::CannotDeriveAddress(
                "imported wallets cannot derive addresses".to_string(),
            ));
        };
        let list = if for_change { change } else { receiving };
        let index = u32::try_from(list.len()).map_err(|_| {
            WalletError::CannotDeriveAddress("address index overflow".to_string())
        })?;
        let address = deriver.derive(for_change, index)?;
        list.push(address);
        if for_change {
            self.change_set.insert(address);
        } else {
            self.receiving_set.insert(address);
        }
        Ok(address)
    }

    /// A fresh change address, or `None` for wallets that cannot derive one.
    pub fn derive_change_address(&mut self) -> Result<Option<Address>, WalletError> {
        if !self.is_deterministic() {
            return Ok(None);
        }
        self.create_new_address(true).map(Some)
    }

    pub fn import_address(&mut self, address: Address) -> Result<bool, WalletError> {
        let WalletKind::Imported(addresses) = &mut self.kind else {
            return Err(WalletError::InvalidData(
                "deterministic wallets do not import addresses",
            ));
        };
        if self.receiving_set.contains(&address) {
            return Ok(false);
        }
        addresses.push(address);
        self.receiving_set.insert(address);
        Ok(true)
    }

    pub fn delete_address(&mut self, address: &Address) -> Result<bool, WalletError> {
        let WalletKind::Imported(addresses) = &mut self.kind else {
            return Err(WalletError::InvalidData(
                "deterministic wallets do not delete addresses",
            ));
        };
        let before = addresses.len();
        addresses.retain(|candidate| candidate != address);
        let removed = addresses.len() != before;
        if removed {
            self.invalidate_cache();
        }
        Ok(removed)
    }

    /// Replaces the address lists with persisted ones. Imported wallets have no change
    /// branch, so `change` is ignored for them.
    pub fn restore_lists(&mut self, receiving: Vec<Address>, change: Vec<Address>) {
        match &mut self.kind {
            WalletKind::Imported(addresses) => *addresses = receiving,
            WalletKind::Deterministic {
                receiving: current_receiving,
                change: current_change,
                ..
            } => {
                *current_receiving = receiving;
                *current_change = change;
            }
        }
        self.invalidate_cache();
    }

    /// Cuts deterministic lists back to their gap limits.
    pub fn truncate(&mut self, gap_limit: usize, gap_limit_for_change: usize) {
        if let WalletKind::Deterministic {
            receiving, change, ..
        } = &mut self.kind
        {
            receiving.truncate(gap_limit);
            change.truncate(gap_limit_for_change);
        }
        self.invalidate_cache();
    }

    /// Derives addresses until the last `gap_limit` receiving (and `gap_limit_for_change`
    /// change) addresses are all unused. Returns the addresses created.
    pub fn synchronize(
        &mut self,
        gap_limit: usize,
        gap_limit_for_change: usize,
        is_used: impl Fn(&Address) -> bool,
    ) -> Result<Vec<Address>, WalletError> {
        let mut created = Vec::new();
        if !self.is_deterministic() {
            return Ok(created);
        }
        for (for_change, limit) in [(false, gap_limit), (true, gap_limit_for_change)] {
            loop {
                let list = if for_change {
                    self.change_addresses()
                } else {
                    self.receiving_addresses()
                };
                let needs_more = list.len() < limit
                    || list[list.len() - limit..].iter().any(|address| is_used(address));
                if !needs_more {
                    break;
                }
                created.push(self.create_new_address(for_change)?);
            }
        }
        Ok(created)
    }
}
