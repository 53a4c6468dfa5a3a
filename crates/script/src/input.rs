//! Recovers the paying address from a spending input's scriptSig.

use slpwallet_primitives::{hash160, Address};

use crate::instruction::{Instruction, Instructions};
use crate::standard::is_multisig;

/// Address whose output this scriptSig spends, when the script is a recognizable
/// pay-to-pubkey-hash or pay-to-script-hash multisig spend. `None` for anything else.
pub fn input_address(script_sig: &[u8]) -> Option<Address> {
    let items = Instructions::new(script_sig)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let pushes: Vec<&[u8]> = items
        .iter()
        .map(|item| match item {
            Instruction::Push(data) => Some(*data),
            Instruction::Op(_) => None,
        })
        .collect::<Option<_>>()?;

    match pushes.as_slice() {
        [sig, pubkey] if is_signature(sig) && is_pubkey(pubkey) => {
            Some(Address::p2pkh(hash160(pubkey)))
        }
        [first, sigs @ .., redeem]
            if first.is_empty()
                && !sigs.is_empty()
                && sigs.iter().all(|sig| is_signature(sig))
                && is_multisig(redeem) =>
        {
            Some(Address::p2sh(hash160(redeem)))
        }
        _ => None,
    }
}

fn is_pubkey(data: &[u8]) -> bool {
    match data.first() {
        Some(0x02) | Some(0x03) => data.len() == 33,
        Some(0x04) => data.len() == 65,
        _ => false,
    }
}

// DER signatures are 9..=73 bytes with the hash type; Schnorr signatures are 65.
fn is_signature(data: &[u8]) -> bool {
    (9..=73).contains(&data.len())
}
