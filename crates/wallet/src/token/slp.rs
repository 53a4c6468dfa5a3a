//! SLP token messages carried in an OP_RETURN output.
//!
//! A message is `OP_RETURN <"SLP\0"> <token_type> <transaction_type> <fields...>` where every
//! field is a data push. Empty fields must use `OP_PUSHDATA1 0x00`; `OP_0` and the small
//! integer opcodes make the whole message invalid.

use std::fmt;

use slpwallet_consensus::Hash256;
use slpwallet_script::instruction::{OP_0, OP_PUSHDATA1, OP_RETURN};
use slpwallet_script::{push_data, Instruction, Instructions};

use crate::error::WalletError;

pub const LOKAD_ID: &[u8; 4] = b"SLP\0";

pub const TOKEN_TYPE_FUNGIBLE: u16 = 1;
pub const TOKEN_TYPE_NFT1_CHILD: u16 = 0x41;
pub const TOKEN_TYPE_NFT1_GROUP: u16 = 0x81;

const MAX_SEND_OUTPUTS: usize = 19;
const MAX_DECIMALS: u8 = 9;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlpParseError {
    /// The script is not an SLP message at all.
    NotSlp,
    UnsupportedTokenType(u16),
    Invalid(&'static str),
}

impl fmt::Display for SlpParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlpParseError::NotSlp => write!(f, "not an SLP message"),
            SlpParseError::UnsupportedTokenType(token_type) => {
                write!(f, "unsupported token type {token_type}")
            }
            SlpParseError::Invalid(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for SlpParseError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genesis {
    pub ticker: Vec<u8>,
    pub name: Vec<u8>,
    pub document_url: Vec<u8>,
    pub document_hash: Option<[u8; 32]>,
    pub decimals: u8,
    pub mint_baton_vout: Option<u8>,
    pub initial_quantity: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlpBody {
    Genesis(Genesis),
    Mint {
        token_id: Hash256,
        mint_baton_vout: Option<u8>,
        additional_quantity: u64,
    },
    /// `amounts[i]` is the quantity sent to output `i + 1`.
    Send {
        token_id: Hash256,
        amounts: Vec<u64>,
    },
    Commit {
        token_id: Hash256,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlpMessage {
    pub token_type: u16,
    pub body: SlpBody,
}

pub fn parse(script: &[u8]) -> Result<SlpMessage, SlpParseError> {
    let chunks = split_chunks(script)?;
    if chunks.first().map(|chunk| chunk.as_slice()) != Some(&LOKAD_ID[..]) {
        return Err(SlpParseError::NotSlp);
    }
    let token_type = match chunks.get(1).map(|chunk| chunk.as_slice()) {
        Some([byte]) => u16::from(*byte),
        Some([high, low]) => u16::from_be_bytes([*high, *low]),
        Some(_) => return Err(SlpParseError::Invalid("token_type bad length")),
        None => return Err(SlpParseError::Invalid("missing token_type")),
    };
    if !matches!(
        token_type,
        TOKEN_TYPE_FUNGIBLE | TOKEN_TYPE_NFT1_CHILD | TOKEN_TYPE_NFT1_GROUP
    ) {
        return Err(SlpParseError::UnsupportedTokenType(token_type));
    }
    let transaction_type = chunks
        .get(2)
        .ok_or(SlpParseError::Invalid("missing transaction_type"))?;
    let fields = &chunks[3..];
    let body = match transaction_type.as_slice() {
        b"GENESIS" => parse_genesis(token_type, fields)?,
        b"MINT" => parse_mint(token_type, fields)?,
        b"SEND" => parse_send(fields)?,
        b"COMMIT" => parse_commit(fields)?,
        _ => return Err(SlpParseError::Invalid("bad transaction type")),
    };
    Ok(SlpMessage { token_type, body })
}

fn split_chunks(script: &[u8]) -> Result<Vec<Vec<u8>>, SlpParseError> {
    if script.first() != Some(&OP_RETURN) {
        return Err(SlpParseError::NotSlp);
    }
    let mut instructions = Instructions::new(&script[1..]);
    let mut chunks = Vec::new();
    loop {
        let opcode = script.get(1 + instructions.position()).copied();
        let Some(item) = instructions.next() else {
            break;
        };
        match item {
            Ok(Instruction::Push(_)) if opcode == Some(OP_0) => {
                return Err(SlpParseError::Invalid("OP_0 push"));
            }
            Ok(Instruction::Push(data)) => chunks.push(data.to_vec()),
            Ok(Instruction::Op(_)) => return Err(SlpParseError::Invalid("non-push opcode")),
            Err(_) => return Err(SlpParseError::Invalid("truncated push")),
        }
    }
    if chunks.is_empty() {
        return Err(SlpParseError::NotSlp);
    }
    Ok(chunks)
}

fn parse_genesis(token_type: u16, fields: &[Vec<u8>]) -> Result<SlpBody, SlpParseError> {
    let [ticker, name, document_url, document_hash, decimals, baton, quantity] = fields else {
        return Err(SlpParseError::Invalid("GENESIS with incorrect number of parameters"));
    };
    let document_hash = match document_hash.len() {
        0 => None,
        32 => {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(document_hash);
            Some(hash)
        }
        _ => return Err(SlpParseError::Invalid("token_doc_hash bad length")),
    };
    let decimals = match decimals.as_slice() {
        [value] if *value <= MAX_DECIMALS => *value,
        [_] => return Err(SlpParseError::Invalid("decimals too high")),
        _ => return Err(SlpParseError::Invalid("decimals bad length")),
    };
    let mint_baton_vout = parse_baton(baton)?;
    let initial_quantity = parse_amount(quantity)?;
    if token_type == TOKEN_TYPE_NFT1_CHILD {
        if decimals != 0 {
            return Err(SlpParseError::Invalid("NFT1 child token must have divisibility 0"));
        }
        if mint_baton_vout.is_some() {
            return Err(SlpParseError::Invalid("NFT1 child token must not have a minting baton"));
        }
        if initial_quantity != 1 {
            return Err(SlpParseError::Invalid("NFT1 child token must have quantity of 1"));
        }
    }
    Ok(SlpBody::Genesis(Genesis {
        ticker: ticker.clone(),
        name: name.clone(),
        document_url: document_url.clone(),
        document_hash,
        decimals,
        mint_baton_vout,
        initial_quantity,
    }))
}

fn parse_mint(token_type: u16, fields: &[Vec<u8>]) -> Result<SlpBody, SlpParseError> {
    if token_type == TOKEN_TYPE_NFT1_CHILD {
        return Err(SlpParseError::Invalid("NFT1 child tokens cannot be minted"));
    }
    let [token_id, baton, quantity] = fields else {
        return Err(SlpParseError::Invalid("MINT with incorrect number of parameters"));
    };
    Ok(SlpBody::Mint {
        token_id: parse_token_id(token_id)?,
        mint_baton_vout: parse_baton(baton)?,
        additional_quantity: parse_amount(quantity)?,
    })
}

fn parse_send(fields: &[Vec<u8>]) -> Result<SlpBody, SlpParseError> {
    let Some((token_id, amounts)) = fields.split_first() else {
        return Err(SlpParseError::Invalid("SEND missing token_id"));
    };
    let token_id = parse_token_id(token_id)?;
    if amounts.is_empty() {
        return Err(SlpParseError::Invalid("SEND with no token outputs"));
    }
    if amounts.len() > MAX_SEND_OUTPUTS {
        return Err(SlpParseError::Invalid("SEND with too many token outputs"));
    }
    let amounts = amounts
        .iter()
        .map(|amount| parse_amount(amount))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SlpBody::Send { token_id, amounts })
}

fn parse_commit(fields: &[Vec<u8>]) -> Result<SlpBody, SlpParseError> {
    if fields.len() < 4 {
        return Err(SlpParseError::Invalid("COMMIT with too few parameters"));
    }
    Ok(SlpBody::Commit {
        token_id: parse_token_id(&fields[0])?,
    })
}

/// Token ids are pushed in display byte order.
fn parse_token_id(bytes: &[u8]) -> Result<Hash256, SlpParseError> {
    if bytes.len() != 32 {
        return Err(SlpParseError::Invalid("token_id bad length"));
    }
    let mut token_id = [0u8; 32];
    token_id.copy_from_slice(bytes);
    token_id.reverse();
    Ok(token_id)
}

fn parse_baton(bytes: &[u8]) -> Result<Option<u8>, SlpParseError> {
    match bytes {
        [] => Ok(None),
        [vout] if *vout >= 2 => Ok(Some(*vout)),
        [_] => Err(SlpParseError::Invalid("mint_baton_vout must be at least 2")),
        _ => Err(SlpParseError::Invalid("mint_baton_vout bad length")),
    }
}

fn parse_amount(bytes: &[u8]) -> Result<u64, SlpParseError> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| SlpParseError::Invalid("amount bad length"))?;
    Ok(u64::from_be_bytes(bytes))
}

fn push_chunk(script: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        script.extend_from_slice(&[OP_PUSHDATA1, 0x00]);
    } else {
        push_data(script, data);
    }
}

fn header(token_type: u16, transaction_type: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_RETURN];
    push_chunk(&mut script, LOKAD_ID);
    match u8::try_from(token_type) {
        Ok(byte) => push_chunk(&mut script, &[byte]),
        Err(_) => push_chunk(&mut script, &token_type.to_be_bytes()),
    }
    push_chunk(&mut script, transaction_type);
    script
}

fn display_order(token_id: &Hash256) -> [u8; 32] {
    let mut bytes = *token_id;
    bytes.reverse();
    bytes
}

fn check_baton(mint_baton_vout: Option<u8>) -> Result<(), WalletError> {
    match mint_baton_vout {
        Some(vout) if vout < 2 => Err(WalletError::InvalidTokenMessage(
            "mint_baton_vout must be at least 2",
        )),
        _ => Ok(()),
    }
}

pub fn build_genesis(token_type: u16, genesis: &Genesis) -> Result<Vec<u8>, WalletError> {
    if genesis.decimals > MAX_DECIMALS {
        return Err(WalletError::InvalidTokenMessage("decimals too high"));
    }
    check_baton(genesis.mint_baton_vout)?;
    let mut script = header(token_type, b"GENESIS");
    push_chunk(&mut script, &genesis.ticker);
    push_chunk(&mut script, &genesis.name);
    push_chunk(&mut script, &genesis.document_url);
    push_chunk(
        &mut script,
        genesis.document_hash.as_ref().map_or(&[][..], |hash| &hash[..]),
    );
    push_chunk(&mut script, &[genesis.decimals]);
    match genesis.mint_baton_vout {
        Some(vout) => push_chunk(&mut script, &[vout]),
        None => push_chunk(&mut script, &[]),
    }
    push_chunk(&mut script, &genesis.initial_quantity.to_be_bytes());
    Ok(script)
}

pub fn build_mint(
    token_type: u16,
    token_id: &Hash256,
    mint_baton_vout: Option<u8>,
    quantity: u64,
) -> Result<Vec<u8>, WalletError> {
    if token_type == TOKEN_TYPE_NFT1_CHILD {
        return Err(WalletError::InvalidTokenMessage("NFT1 child tokens cannot be minted"));
    }
    check_baton(mint_baton_vout)?;
    let mut script = header(token_type, b"MINT");
    push_chunk(&mut script, &display_order(token_id));
    match mint_baton_vout {
        Some(vout) => push_chunk(&mut script, &[vout]),
        None => push_chunk(&mut script, &[]),
    }
    push_chunk(&mut script, &quantity.to_be_bytes());
    Ok(script)
}

pub fn build_send(
    token_type: u16,
    token_id: &Hash256,
    amounts: &[u64],
) -> Result<Vec<u8>, WalletError> {
    if amounts.is_empty() || amounts.len() > MAX_SEND_OUTPUTS {
        return Err(WalletError::InvalidTokenMessage(
            "SEND needs between 1 and 19 token outputs",
        ));
    }
    let mut script = header(token_type, b"SEND");
    push_chunk(&mut script, &display_order(token_id));
    for amount in amounts {
        push_chunk(&mut script, &amount.to_be_bytes());
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_id() -> Hash256 {
        std::array::from_fn(|i| i as u8)
    }

    #[test]
    fn send_roundtrip_keeps_display_order() {
        let script = build_send(1, &token_id(), &[5, 0, 7]).expect("build");
        // Display order puts the last internal byte first.
        assert_eq!(script[script.len() - 9 - 9 - 9 - 32], 31);
        let message = parse(&script).expect("parse");
        assert_eq!(message.token_type, 1);
        assert_eq!(
            message.body,
            SlpBody::Send {
                token_id: token_id(),
                amounts: vec![5, 0, 7],
            }
        );
    }

    #[test]
    fn genesis_with_empty_fields() {
        let genesis = Genesis {
            ticker: b"TOK".to_vec(),
            name: Vec::new(),
            document_url: Vec::new(),
            document_hash: None,
            decimals: 2,
            mint_baton_vout: Some(2),
            initial_quantity: 1_000,
        };
        let script = build_genesis(1, &genesis).expect("build");
        assert_eq!(parse(&script).expect("parse").body, SlpBody::Genesis(genesis));
    }

    #[test]
    fn mint_keeps_baton() {
        let script = build_mint(0x81, &token_id(), Some(3), 42).expect("build");
        let message = parse(&script).expect("parse");
        assert_eq!(message.token_type, 0x81);
        assert_eq!(
            message.body,
            SlpBody::Mint {
                token_id: token_id(),
                mint_baton_vout: Some(3),
                additional_quantity: 42,
            }
        );
    }

    #[test]
    fn unsupported_token_type_is_reported() {
        let mut script = header(2, b"SEND");
        push_chunk(&mut script, &[0u8; 32]);
        push_chunk(&mut script, &1u64.to_be_bytes());
        assert_eq!(parse(&script), Err(SlpParseError::UnsupportedTokenType(2)));
    }

    #[test]
    fn op_0_push_invalidates_message() {
        let mut script = header(1, b"MINT");
        push_chunk(&mut script, &[0u8; 32]);
        script.push(OP_0);
        push_chunk(&mut script, &1u64.to_be_bytes());
        assert_eq!(parse(&script), Err(SlpParseError::Invalid("OP_0 push")));
    }

    #[test]
    fn non_slp_scripts() {
        assert_eq!(parse(&[0x76, 0xa9]), Err(SlpParseError::NotSlp));
        let mut script = vec![OP_RETURN];
        push_data(&mut script, b"EXAM");
        assert_eq!(parse(&script), Err(SlpParseError::NotSlp));
        assert_eq!(parse(&[OP_RETURN]), Err(SlpParseError::NotSlp));
    }

    #[test]
    fn malformed_fields_are_invalid() {
        let genesis = Genesis {
            ticker: Vec::new(),
            name: Vec::new(),
            document_url: Vec::new(),
            document_hash: None,
            decimals: 0,
            mint_baton_vout: Some(2),
            initial_quantity: 1,
        };
        let script = build_genesis(TOKEN_TYPE_NFT1_CHILD, &genesis).expect("build");
        assert!(matches!(parse(&script), Err(SlpParseError::Invalid(_))));

        let mut script = header(1, b"BURN");
        push_chunk(&mut script, &[0u8; 32]);
        assert_eq!(
            parse(&script),
            Err(SlpParseError::Invalid("bad transaction type"))
        );
        assert!(build_send(1, &token_id(), &[]).is_err());
    }
}
