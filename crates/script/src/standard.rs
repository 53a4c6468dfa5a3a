//! Standard output script classification.

use crate::instruction::{Instruction, Instructions, OP_CHECKMULTISIG, OP_RETURN};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Multisig,
    NullData,
    Unknown,
}

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_null_data(script) {
        ScriptType::NullData
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else if is_multisig(script) {
        ScriptType::Multisig
    } else {
        ScriptType::Unknown
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

fn is_null_data(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) | Some(len @ 65) => len,
        _ => return false,
    };
    script.len() == key_len as usize + 2 && script[script.len() - 1] == OP_CHECKSIG
}

/// Bare `m <keys...> n OP_CHECKMULTISIG`.
pub(crate) fn is_multisig(script: &[u8]) -> bool {
    if script.last() != Some(&OP_CHECKMULTISIG) {
        return false;
    }
    let Ok(items) = Instructions::new(script).collect::<Result<Vec<_>, _>>() else {
        return false;
    };
    if items.len() < 4 {
        return false;
    }
    let small_int = |item: &Instruction| match item {
        Instruction::Op(op @ 0x51..=0x60) => Some(usize::from(op - 0x50)),
        _ => None,
    };
    let (Some(m), Some(n)) = (small_int(&items[0]), small_int(&items[items.len() - 2])) else {
        return false;
    };
    let keys = &items[1..items.len() - 2];
    m <= n
        && keys.len() == n
        && keys
            .iter()
            .all(|item| matches!(item, Instruction::Push(key) if key.len() == 33 || key.len() == 65))
}
