//! SLP wallet state engine: transaction ledger, balances, token validity tracking,
//! coin selection and history reconciliation.

pub mod addresses;
pub mod balance;
pub mod coins;
pub mod config;
pub mod construct;
pub mod error;
pub mod events;
pub mod freeze;
pub mod history;
pub mod janitor;
pub mod ledger;
pub mod persist;
pub mod pruned;
pub mod source;
pub mod state;
pub mod token;
pub mod verify;
pub mod wallet;

pub use addresses::{AddressBook, AddressDeriver, WalletKind};
pub use balance::Balance;
pub use coins::{Coin, CoinToken, TokenBalance, TokenUtxoQuery, UtxoQuery};
pub use config::WalletConfig;
pub use construct::{CoinChooser, OutputAmount, PaymentOutput, SimpleCoinChooser, UnsignedTransaction};
pub use error::WalletError;
pub use events::WalletEvent;
pub use ledger::TransactionRecord;
pub use source::{FetchError, TransactionSource};
pub use state::WalletState;
pub use token::validator::{DagValidator, JobHandle, ValidationRequest, ValidationSink};
pub use token::{TokenClass, Validity};
pub use verify::{TxHeight, VerifiedTx};
pub use wallet::{Collaborators, Wallet, WalletView};
