//! Chain and relay policy constants enforced locally by the wallet.

use crate::money::Amount;

/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Highest fee rate, in satoshis per byte, a constructed transaction may pay.
pub const MAX_FEE_RATE_SATS_PER_BYTE: Amount = 50;
/// Outputs below this value are not relayed by standard nodes.
pub const DUST_THRESHOLD: Amount = 546;
/// Fee per kilobyte used when no estimate is configured.
pub const DEFAULT_FEE_PER_KB: Amount = 1_000;
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
