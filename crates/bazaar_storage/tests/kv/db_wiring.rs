#![forbid(unsafe_code)]

use std::path::PathBuf;

use bazaar_storage::{FileKeyValueStore, KeyValueStore, KvError, MemoryKeyValueStore};

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "bazaar_kv_{}_{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("state.json")
}

#[test]
fn at_kv_db_01_file_store_survives_reopen() {
    let path = temp_path("reopen");
    let mut kv = FileKeyValueStore::open(&path).unwrap();
    assert_eq!(kv.get("offline").unwrap(), None);
    kv.set("offline", "{\"count\":2}".to_string()).unwrap();

    let reopened = FileKeyValueStore::open(&path).unwrap();
    assert_eq!(
        reopened.get("offline").unwrap().as_deref(),
        Some("{\"count\":2}")
    );

    let mut reopened = reopened;
    reopened.remove("offline").unwrap();
    assert_eq!(FileKeyValueStore::open(&path).unwrap().get("offline").unwrap(), None);
}

#[test]
fn at_kv_db_02_corrupt_file_is_reported() {
    let path = temp_path("corrupt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"[1, 2").unwrap();
    assert!(matches!(
        FileKeyValueStore::open(&path),
        Err(KvError::Corrupt { .. })
    ));
}

#[test]
fn at_kv_db_03_memory_store() {
    let mut kv = MemoryKeyValueStore::new();
    kv.set("a", "1".to_string()).unwrap();
    assert_eq!(kv.get("a").unwrap().as_deref(), Some("1"));
    kv.remove("a").unwrap();
    assert_eq!(kv.get("a").unwrap(), None);
}
