use slpwallet_script::standard::{classify_script_pubkey, ScriptType};

#[test]
fn classify_p2pkh() {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[0x11; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pkh);
}

#[test]
fn classify_p2sh() {
    let mut script = vec![0xa9, 0x14];
    script.extend_from_slice(&[0x22; 20]);
    script.push(0x87);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Sh);
}

#[test]
fn classify_p2pk() {
    let mut script = vec![33];
    script.extend_from_slice(&[0x02; 33]);
    script.push(0xac);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pk);
}

#[test]
fn classify_null_data() {
    let script = vec![0x6a, 0x04, b'S', b'L', b'P', 0x00];
    assert_eq!(classify_script_pubkey(&script), ScriptType::NullData);
}

#[test]
fn classify_bare_multisig() {
    let mut script = vec![0x51, 33];
    script.extend_from_slice(&[0x03; 33]);
    script.extend_from_slice(&[0x51, 0xae]);
    assert_eq!(classify_script_pubkey(&script), ScriptType::Multisig);
}

#[test]
fn classify_unknown() {
    let script = vec![0x51, 0x87];
    assert_eq!(classify_script_pubkey(&script), ScriptType::Unknown);
}
