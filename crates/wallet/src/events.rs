use slpwallet_consensus::Hash256;
use slpwallet_primitives::Address;

use crate::token::Validity;

/// Notifications published to [`crate::Wallet::subscribe`] receivers after the wallet
/// lock is released.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalletEvent {
    TokenValidityChanged {
        txid: Hash256,
        token_id: Hash256,
        validity: Validity,
    },
    Verified {
        txid: Hash256,
        height: i32,
        timestamp: u32,
    },
    HistoryUpdated {
        address: Address,
    },
    /// An imported address the sync source should start following.
    AddressAdded {
        address: Address,
    },
    AddressRemoved {
        address: Address,
    },
}
