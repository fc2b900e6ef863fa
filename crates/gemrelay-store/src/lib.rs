pub mod config;
pub mod credentials;
mod entities;
pub mod kv;
pub mod records;
pub mod sqlite;

pub use config::ConfigStore;
pub use credentials::CredentialStore;
pub use kv::{KvStore, MemoryKv, StoreError, StoreResult};
pub use sqlite::SqliteKv;
