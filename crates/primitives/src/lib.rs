//! Transaction types, addresses, and consensus serialization.

pub mod address;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use address::{Address, AddressError, AddressKind};
pub use hash::{hash160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TransactionDecodeError, TxIn, TxOut};
