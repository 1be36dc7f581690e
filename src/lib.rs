//! Vault-Sync: a wallet synchronization engine for multisig accounts
//!
//! This crate keeps a local wallet's view of shared-custody (multisig)
//! accounts and per-address transaction histories in sync with a chain
//! node and an account-discovery indexer:
//! - Multisig account discovery, live-state refresh and display ordering
//! - Two-phase multisig account creation (ephemeral attach + sponsored fee)
//! - Paginated per-address transaction ledger with optimistic local entries
//! - Observer-gated background polling with debounced balance triggers
//! - Per-network JSON persistence with atomic replacement
//!
//! All chain and indexer I/O goes through the [`chain::ChainClient`],
//! [`chain::DiscoveryClient`] and [`chain::TransactionSource`] traits, so
//! the transport lives outside this crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vault_sync::chain::NetworkContext;
//! use vault_sync::registry::MultisigRegistry;
//! use vault_sync::scheduler::{RefreshMode, SyncScheduler};
//!
//! let context = Arc::new(NetworkContext::new("ae_mainnet"));
//! let registry = Arc::new(MultisigRegistry::new(
//!     Arc::clone(&context),
//!     chain_client,
//!     discovery_client,
//!     store,
//!     local_accounts,
//! ));
//! let scheduler = SyncScheduler::new(context, registry, ledger, RefreshMode::Continuous);
//!
//! // Polling runs while the guard is alive.
//! let _guard = Arc::clone(&scheduler).observe();
//! ```

pub mod chain;
pub mod creation;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
mod testutil;

pub use chain::{ChainClient, ChainError, DiscoveryClient, NetworkContext, TransactionSource};
pub use creation::{CreationError, CreationPhase, MultisigCreationCoordinator};
pub use ledger::{LedgerError, TransactionLedger};
pub use model::{MultisigAccount, Transaction, TransactionKind};
pub use registry::{MultisigRegistry, RegistryError};
pub use scheduler::{ObserverGuard, RefreshMode, SyncScheduler};
pub use storage::{StorageError, StoreConfig, WalletStore};
