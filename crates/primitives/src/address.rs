//! Legacy base58 addresses and the output scripts they pay to.

use std::fmt;

use slpwallet_consensus::Network;

use crate::encoding::DecodeError;
use crate::hash::sha256d;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid address checksum"),
            AddressError::UnknownPrefix => write!(f, "address prefix does not match network"),
        }
    }
}

impl std::error::Error for AddressError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum AddressKind {
    PubKeyHash,
    ScriptHash,
}

/// A payment destination. Ordering is by kind then hash so maps keyed by address iterate stably.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Address {
    pub kind: AddressKind,
    pub hash: [u8; 20],
}

pub const ADDRESS_KEY_LEN: usize = 21;

impl Address {
    pub fn p2pkh(hash: [u8; 20]) -> Self {
        Self {
            kind: AddressKind::PubKeyHash,
            hash,
        }
    }

    pub fn p2sh(hash: [u8; 20]) -> Self {
        Self {
            kind: AddressKind::ScriptHash,
            hash,
        }
    }

    pub fn from_script_pubkey(script: &[u8]) -> Option<Self> {
        if is_p2pkh(script) {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[3..23]);
            return Some(Self::p2pkh(hash));
        }
        if is_p2sh(script) {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[2..22]);
            return Some(Self::p2sh(hash));
        }
        None
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::PubKeyHash => {
                let mut script = Vec::with_capacity(25);
                script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
                script.extend_from_slice(&self.hash);
                script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
                script
            }
            AddressKind::ScriptHash => {
                let mut script = Vec::with_capacity(23);
                script.extend_from_slice(&[OP_HASH160, 0x14]);
                script.extend_from_slice(&self.hash);
                script.push(OP_EQUAL);
                script
            }
        }
    }

    pub fn encode(&self, network: Network) -> String {
        let (pubkey_prefix, script_prefix) = network.address_prefixes();
        let prefix = match self.kind {
            AddressKind::PubKeyHash => pubkey_prefix,
            AddressKind::ScriptHash => script_prefix,
        };
        let mut payload = Vec::with_capacity(21);
        payload.push(prefix);
        payload.extend_from_slice(&self.hash);
        base58check_encode(&payload)
    }

    pub fn decode(address: &str, network: Network) -> Result<Self, AddressError> {
        let payload = base58check_decode(address)?;
        if payload.len() != 21 {
            return Err(AddressError::InvalidLength);
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        let (pubkey_prefix, script_prefix) = network.address_prefixes();
        match payload[0] {
            prefix if prefix == pubkey_prefix => Ok(Self::p2pkh(hash)),
            prefix if prefix == script_prefix => Ok(Self::p2sh(hash)),
            _ => Err(AddressError::UnknownPrefix),
        }
    }

    pub fn to_key(&self) -> [u8; ADDRESS_KEY_LEN] {
        let mut key = [0u8; ADDRESS_KEY_LEN];
        key[0] = match self.kind {
            AddressKind::PubKeyHash => 0,
            AddressKind::ScriptHash => 1,
        };
        key[1..].copy_from_slice(&self.hash);
        key
    }

    pub fn from_key(key: &[u8]) -> Result<Self, DecodeError> {
        if key.len() != ADDRESS_KEY_LEN {
            return Err(DecodeError::InvalidData("address key length"));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&key[1..]);
        match key[0] {
            0 => Ok(Self::p2pkh(hash)),
            1 => Ok(Self::p2sh(hash)),
            _ => Err(DecodeError::InvalidData("address key kind")),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode(Network::Mainnet))
    }
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    data.extend_from_slice(&sha256d(payload)[..4]);
    base58_encode(&data)
}

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes: Vec<u8> = Vec::new();
    for ch in input.bytes() {
        let mut carry = ALPHABET
            .iter()
            .position(|c| *c == ch)
            .ok_or(AddressError::InvalidCharacter)? as u32;
        for byte in bytes.iter_mut().rev() {
            let val = u32::from(*byte) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    let mut digits: Vec<u8> = Vec::new();
    for byte in data {
        let mut carry = u32::from(*byte);
        for digit in digits.iter_mut().rev() {
            let value = u32::from(*digit) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    out.extend(std::iter::repeat('1').take(leading_zeros));
    out.extend(digits.iter().map(|digit| ALPHABET[*digit as usize] as char));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_roundtrip_for_both_kinds() {
        for address in [Address::p2pkh([0x11; 20]), Address::p2sh([0x22; 20])] {
            let script = address.script_pubkey();
            assert_eq!(Address::from_script_pubkey(&script), Some(address));
        }
        assert_eq!(Address::from_script_pubkey(&[0x6a, 0x00]), None);
    }

    #[test]
    fn known_mainnet_encoding() {
        // hash160 of the generator point's compressed encoding.
        let hash = [
            0x75, 0x1e, 0x76, 0xe8, 0x19, 0x91, 0x96, 0xd4, 0x54, 0x94, 0x1c, 0x45, 0xd1, 0xb3,
            0xa3, 0x23, 0xf1, 0x43, 0x3b, 0xd6,
        ];
        let address = Address::p2pkh(hash);
        let text = address.encode(Network::Mainnet);
        assert_eq!(text, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(Address::decode(&text, Network::Mainnet), Ok(address));
        assert_eq!(
            Address::decode(&text, Network::Testnet),
            Err(AddressError::UnknownPrefix)
        );
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        assert_eq!(
            Address::decode("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMJ", Network::Mainnet),
            Err(AddressError::InvalidChecksum)
        );
    }
}
