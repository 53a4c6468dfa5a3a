use slpwallet_primitives::outpoint::OutPoint;
use slpwallet_primitives::transaction::{Transaction, TransactionDecodeError, TxIn, TxOut};

fn seq_hash(start: u8) -> [u8; 32] {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

fn sample_tx() -> Transaction {
    Transaction {
        version: 2,
        vin: vec![TxIn {
            prevout: OutPoint::new(seq_hash(0x10), 1),
            script_sig: vec![0x51],
            sequence: 0xffff_fffe,
        }],
        vout: vec![
            TxOut {
                value: 1_000,
                script_pubkey: vec![0x76, 0xa9],
            },
            TxOut {
                value: 0,
                script_pubkey: vec![0x6a],
            },
        ],
        lock_time: 700_000,
    }
}

#[test]
fn serialize_legacy_layout() {
    let tx = sample_tx();
    let encoded = tx.consensus_encode();

    let mut expected = Vec::new();
    expected.extend_from_slice(&2i32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&seq_hash(0x10));
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&[1, 0x51]);
    expected.extend_from_slice(&0xffff_fffeu32.to_le_bytes());
    expected.push(2);
    expected.extend_from_slice(&1_000i64.to_le_bytes());
    expected.extend_from_slice(&[2, 0x76, 0xa9]);
    expected.extend_from_slice(&0i64.to_le_bytes());
    expected.extend_from_slice(&[1, 0x6a]);
    expected.extend_from_slice(&700_000u32.to_le_bytes());

    assert_eq!(encoded, expected);
    assert_eq!(tx.serialized_size(), expected.len());
    assert_eq!(Transaction::consensus_decode(&encoded).expect("decode"), tx);
}

#[test]
fn decode_rejects_trailing_bytes() {
    let mut encoded = sample_tx().consensus_encode();
    encoded.push(0);
    assert!(matches!(
        Transaction::consensus_decode(&encoded),
        Err(TransactionDecodeError::Decode(_))
    ));
}

#[test]
fn decode_rejects_negative_output_value() {
    let mut tx = sample_tx();
    tx.vout[1].value = -1;
    let encoded = tx.consensus_encode();
    assert_eq!(
        Transaction::consensus_decode(&encoded),
        Err(TransactionDecodeError::ValueOutOfRange {
            index: 1,
            value: -1
        })
    );
}

#[test]
fn coinbase_detection() {
    let mut tx = sample_tx();
    assert!(!tx.is_coinbase());
    tx.vin[0].prevout = OutPoint::null();
    assert!(tx.is_coinbase());
    assert_ne!(tx.txid(), sample_tx().txid());
}
