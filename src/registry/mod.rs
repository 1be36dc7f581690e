//! Multisig account registry
//!
//! Per-network source of truth for every multisig account a local signer can
//! act on. Merges discovered (confirmed) accounts with locally created
//! (pending) ones and keeps both persisted.

pub mod accounts;

pub use accounts::{MultisigRegistry, RegistryError, MULTISIG_REFRESH_INTERVAL};
