//! Wallet state persistence
//!
//! A simple keyed get/set contract over JSON files. Every entry is scoped by
//! network identifier so a network switch never mixes cached state.

use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Persisted key layout. Each key is additionally scoped by network id.
pub mod keys {
    /// Confirmed multisig accounts
    pub const MULTISIG: &str = "multisig";
    /// Locally created, not yet discovered multisig accounts
    pub const MULTISIG_PENDING: &str = "multisig-pending";
    /// Per-address transaction ledger map
    pub const TRANSACTIONS: &str = "transactions";
    /// Pointer to the active multisig account
    pub const ACTIVE_MULTISIG_ACCOUNT: &str = "active-multisig-account";
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".wallet_data"),
        }
    }
}

/// Wallet state store
pub struct WalletStore {
    config: StoreConfig,
}

impl WalletStore {
    /// Create a new store, creating the data directory if needed
    pub fn new(config: StoreConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    /// Create with default configuration
    pub fn with_defaults() -> Result<Self, StorageError> {
        Self::new(StoreConfig::default())
    }

    fn entry_path(&self, key: &str, network_id: &str) -> Result<PathBuf, StorageError> {
        for part in [key, network_id] {
            if part.is_empty()
                || !part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            {
                return Err(StorageError::InvalidKey(part.to_string()));
            }
        }
        Ok(self
            .config
            .data_dir
            .join(format!("{}.{}.json", key, network_id)))
    }

    /// Read the value stored under `key` for the given network.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        network_id: &str,
    ) -> Result<Option<T>, StorageError> {
        let path = self.entry_path(key, network_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path)?;
        let reader = BufReader::new(file);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Replace the value stored under `key` for the given network. The entire
    /// next state is written in one pass via a temporary file and an atomic
    /// rename, never interleaving partial writes.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        network_id: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let path = self.entry_path(key, network_id)?;
        let temp_path = path.with_extension("json.tmp");

        let file = fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, value)?;

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Delete the entry stored under `key` for the given network.
    pub fn remove(&self, key: &str, network_id: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key, network_id)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Check whether an entry exists.
    pub fn exists(&self, key: &str, network_id: &str) -> bool {
        self.entry_path(key, network_id)
            .map(|path| path.exists())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, WalletStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::new(StoreConfig {
            data_dir: dir.path().to_path_buf(),
        })
        .unwrap();
        (dir, store)
    }

    #[test]
    fn get_returns_none_for_missing_entry() {
        let (_dir, store) = temp_store();
        let value: Option<Vec<String>> = store.get(keys::MULTISIG, "ae_mainnet").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let (_dir, store) = temp_store();
        let accounts = vec!["ak_a".to_string(), "ak_b".to_string()];

        store.set(keys::MULTISIG, "ae_mainnet", &accounts).unwrap();
        assert!(store.exists(keys::MULTISIG, "ae_mainnet"));

        let loaded: Option<Vec<String>> = store.get(keys::MULTISIG, "ae_mainnet").unwrap();
        assert_eq!(loaded.unwrap(), accounts);
    }

    #[test]
    fn entries_are_scoped_by_network() {
        let (_dir, store) = temp_store();
        store
            .set(keys::MULTISIG, "ae_mainnet", &vec!["ak_main".to_string()])
            .unwrap();
        store
            .set(keys::MULTISIG, "ae_uat", &vec!["ak_test".to_string()])
            .unwrap();

        let mainnet: Option<Vec<String>> = store.get(keys::MULTISIG, "ae_mainnet").unwrap();
        let testnet: Option<Vec<String>> = store.get(keys::MULTISIG, "ae_uat").unwrap();
        assert_eq!(mainnet.unwrap(), vec!["ak_main".to_string()]);
        assert_eq!(testnet.unwrap(), vec!["ak_test".to_string()]);
    }

    #[test]
    fn remove_deletes_entry() {
        let (_dir, store) = temp_store();
        store
            .set(keys::ACTIVE_MULTISIG_ACCOUNT, "ae_uat", &"ak_a".to_string())
            .unwrap();
        store.remove(keys::ACTIVE_MULTISIG_ACCOUNT, "ae_uat").unwrap();
        assert!(!store.exists(keys::ACTIVE_MULTISIG_ACCOUNT, "ae_uat"));
    }

    #[test]
    fn rejects_path_like_keys() {
        let (_dir, store) = temp_store();
        let result = store.set("../escape", "ae_uat", &1u32);
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
