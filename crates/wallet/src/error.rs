use slpwallet_consensus::Amount;
use slpwallet_primitives::encoding::DecodeError;
use slpwallet_primitives::{Address, TransactionDecodeError};
use slpwallet_storage::StoreError;

#[derive(Debug)]
pub enum WalletError {
    Io(std::io::Error),
    Store(StoreError),
    Decode(DecodeError),
    Transaction(TransactionDecodeError),
    Json(serde_json::Error),
    Config(String),
    InvalidData(&'static str),
    NotEnoughFunds { shortfall: Option<Amount> },
    NotEnoughTokens { needed: u128, available: u128 },
    NotEnoughUnfrozenTokens { needed: u128, available: u128 },
    ExcessiveFee { fee: Amount, size: usize },
    FeeEstimatesUnavailable,
    MultipleMaxOutputs,
    InvalidTokenId(String),
    TokenAlreadyExists(String),
    NotTokenGenesis,
    UnsupportedTokenType(u16),
    InvalidTokenMessage(&'static str),
    NoMintingBaton,
    AddressNotMine(Address),
    CannotDeriveAddress(String),
    Validator(String),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::Io(err) => write!(f, "{err}"),
            WalletError::Store(err) => write!(f, "{err}"),
            WalletError::Decode(err) => write!(f, "{err}"),
            WalletError::Transaction(err) => write!(f, "{err}"),
            WalletError::Json(err) => write!(f, "{err}"),
            WalletError::Config(message) => write!(f, "{message}"),
            WalletError::InvalidData(message) => write!(f, "{message}"),
            WalletError::NotEnoughFunds {
                shortfall: Some(shortfall),
            } => write!(f, "insufficient funds (short by {shortfall})"),
            WalletError::NotEnoughFunds { shortfall: None } => write!(f, "insufficient funds"),
            WalletError::NotEnoughTokens { needed, available } => write!(
                f,
                "insufficient token balance (needed {needed}, available {available})"
            ),
            WalletError::NotEnoughUnfrozenTokens { needed, available } => write!(
                f,
                "insufficient unfrozen token balance (needed {needed}, available {available})"
            ),
            WalletError::ExcessiveFee { fee, size } => {
                write!(f, "fee {fee} for {size} bytes exceeds the fee rate cap")
            }
            WalletError::FeeEstimatesUnavailable => write!(f, "dynamic fee estimates not available"),
            WalletError::MultipleMaxOutputs => write!(f, "more than one output set to spend max"),
            WalletError::InvalidTokenId(id) => write!(f, "invalid token id '{id}'"),
            WalletError::TokenAlreadyExists(id) => write!(f, "token {id} already in wallet"),
            WalletError::NotTokenGenesis => write!(f, "transaction is not a token genesis"),
            WalletError::UnsupportedTokenType(token_type) => {
                write!(f, "unsupported token type {token_type}")
            }
            WalletError::InvalidTokenMessage(reason) => write!(f, "invalid token message: {reason}"),
            WalletError::NoMintingBaton => write!(f, "no valid minting baton in wallet"),
            WalletError::AddressNotMine(address) => write!(f, "address {address} is not in wallet"),
            WalletError::CannotDeriveAddress(message) => write!(f, "{message}"),
            WalletError::Validator(message) => write!(f, "validator: {message}"),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::Io(err)
    }
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        WalletError::Store(err)
    }
}

impl From<DecodeError> for WalletError {
    fn from(err: DecodeError) -> Self {
        WalletError::Decode(err)
    }
}

impl From<TransactionDecodeError> for WalletError {
    fn from(err: TransactionDecodeError) -> Self {
        WalletError::Transaction(err)
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::Json(err)
    }
}
