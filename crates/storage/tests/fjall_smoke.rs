#![cfg(feature = "fjall")]

use std::collections::HashSet;

use slpwallet_storage::fjall::FjallStore;
use slpwallet_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_smoke_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");

    let store = FjallStore::open(dir.path()).expect("open fjall");
    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    store
        .put(Column::History, b"prefix:1", b"a")
        .expect("put prefix");
    store
        .put(Column::History, b"prefix:2", b"b")
        .expect("put prefix");
    let keys: HashSet<_> = store
        .scan_prefix(Column::History, b"prefix:")
        .expect("scan")
        .into_iter()
        .collect();
    assert_eq!(
        keys,
        HashSet::from([
            (b"prefix:1".to_vec(), b"a".to_vec()),
            (b"prefix:2".to_vec(), b"b".to_vec()),
        ])
    );

    let mut batch = WriteBatch::new();
    batch.put(Column::Meta, b"batch", b"ok");
    batch.delete(Column::Meta, b"key");
    store.write_batch(&batch).expect("batch commit");

    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
    assert_eq!(
        store.get(Column::Meta, b"batch").expect("get"),
        Some(b"ok".to_vec())
    );
    drop(store);

    let reopened = FjallStore::open(dir.path()).expect("reopen fjall");
    assert_eq!(
        reopened.get(Column::Meta, b"batch").expect("get"),
        Some(b"ok".to_vec())
    );
}
