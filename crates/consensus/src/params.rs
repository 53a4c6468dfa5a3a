//! Network selection, address prefixes, and hash display helpers.

use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }

    /// Base58 version bytes for (pay-to-pubkey-hash, pay-to-script-hash).
    pub fn address_prefixes(self) -> (u8, u8) {
        match self {
            Network::Mainnet => (0x00, 0x05),
            Network::Testnet | Network::Regtest => (0x6f, 0xc4),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "hash hex must be 64 characters"),
            HexError::InvalidHex => write!(f, "invalid hex digit"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order (byte reversed) 64 character hex hash.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HexError::InvalidHex);
    }
    let mut bytes = [0u8; 32];
    for (i, byte_out) in bytes.iter_mut().enumerate() {
        let start = i * 2;
        *byte_out =
            u8::from_str_radix(&hex[start..start + 2], 16).map_err(|_| HexError::InvalidHex)?;
    }
    bytes.reverse();
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_is_display_order() {
        let mut hash = [0u8; 32];
        hash[0] = 0xab;
        let hex = hash256_to_hex(&hash);
        assert!(hex.ends_with("ab"));
        assert_eq!(hash256_from_hex(&hex), Ok(hash));
    }

    #[test]
    fn hash_hex_rejects_short_and_non_hex() {
        assert_eq!(hash256_from_hex("abcd"), Err(HexError::InvalidLength));
        let bad = "zz".repeat(32);
        assert_eq!(hash256_from_hex(&bad), Err(HexError::InvalidHex));
    }

    #[test]
    fn parse_network() {
        assert_eq!(Network::parse("MAINNET"), Some(Network::Mainnet));
        assert_eq!(Network::parse("regtest"), Some(Network::Regtest));
        assert_eq!(Network::parse("mainnet2"), None);
    }
}
