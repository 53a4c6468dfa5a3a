//! Transaction outpoint type.

use std::fmt;
use std::str::FromStr;

use slpwallet_consensus::{hash256_from_hex, hash256_to_hex, Hash256};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

/// Reference to output `index` of transaction `hash`. Text form is `txid:index`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

pub const OUTPOINT_KEY_LEN: usize = 36;

impl OutPoint {
    pub fn new(hash: Hash256, index: u32) -> Self {
        Self { hash, index }
    }

    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == [0u8; 32]
    }

    pub fn to_key(&self) -> [u8; OUTPOINT_KEY_LEN] {
        let mut key = [0u8; OUTPOINT_KEY_LEN];
        key[..32].copy_from_slice(&self.hash);
        key[32..].copy_from_slice(&self.index.to_be_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Result<Self, DecodeError> {
        if key.len() != OUTPOINT_KEY_LEN {
            return Err(DecodeError::InvalidData("outpoint key length"));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&key[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&key[32..]);
        Ok(Self {
            hash,
            index: u32::from_be_bytes(index),
        })
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hash256_to_hex(&self.hash), self.index)
    }
}

impl FromStr for OutPoint {
    type Err = DecodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (hash, index) = raw
            .split_once(':')
            .ok_or(DecodeError::InvalidData("outpoint missing ':'"))?;
        let hash =
            hash256_from_hex(hash).map_err(|_| DecodeError::InvalidData("outpoint txid hex"))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| DecodeError::InvalidData("outpoint index"))?;
        Ok(Self { hash, index })
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.hash);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}
