//! External chain interfaces
//!
//! The engine never talks to a node or indexer directly. Everything goes
//! through the [`ChainClient`] and [`DiscoveryClient`] traits so the RPC
//! transport stays outside the crate and tests can inject mocks.

pub mod adapter;
pub mod artifact;
pub mod client;
pub mod context;
pub mod discovery;

pub use adapter::{LocalAccount, Protocol, ProtocolAdapter, TransactionSource};
pub use artifact::{ContractArtifact, SIMPLE_MULTISIG_ARTIFACT};
pub use client::{AttachTxParams, ChainAccount, ChainClient, TxEnvelope, TxTag};
pub use context::NetworkContext;
pub use discovery::DiscoveryClient;

use thiserror::Error;

/// Number of key blocks to wait when polling for transaction inclusion
pub const DEFAULT_WAITING_HEIGHT: u64 = 3;

/// Errors surfaced by chain and discovery clients.
#[derive(Error, Debug)]
pub enum ChainError {
    /// A dry-run call was rejected by the node, e.g. on a nonce race.
    /// Registry refresh swallows these per account.
    #[error("dry-run failed: {0}")]
    DryRun(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("transaction {hash} not included within {blocks} blocks")]
    InclusionTimeout { hash: String, blocks: u64 },
    #[error("transaction decode failed: {0}")]
    Decode(String),
}
