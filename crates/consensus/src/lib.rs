//! Chain constants, monetary units, and network parameters.

pub mod constants;
pub mod money;
pub mod params;

pub use money::Amount;
pub use params::{hash256_from_hex, hash256_to_hex, HexError, Network};

pub type Hash256 = [u8; 32];
