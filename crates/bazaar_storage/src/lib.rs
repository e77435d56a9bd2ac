#![forbid(unsafe_code)]

pub mod gateway;
pub mod kv;
pub mod memory;
pub mod postgrest;

pub use gateway::{OwnerStats, RecordGateway, StoreError};
pub use kv::{FileKeyValueStore, KeyValueStore, KvError, MemoryKeyValueStore};
pub use memory::InMemoryRecordStore;
pub use postgrest::{PostgrestConfig, PostgrestRecordStore};
