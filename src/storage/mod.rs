//! Keyed persistence for per-network wallet state

pub mod store;

pub use store::{keys, StorageError, StoreConfig, WalletStore};
