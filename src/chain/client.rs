//! Chain node client capability set
//!
//! The trait covers exactly what the sync engine consumes: dry-run contract
//! calls, transaction build/sign/broadcast, bounded inclusion polling,
//! account and balance lookup, and single-transaction fetch from an indexer.

use async_trait::async_trait;
use serde_json::Value;

use crate::chain::artifact::ContractArtifact;
use crate::chain::ChainError;
use crate::model::Transaction;

/// On-chain account record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainAccount {
    pub address: String,
    /// Balance in base units
    pub balance: u128,
    /// Contract backing the account, present for generalized accounts
    pub contract_id: Option<String>,
}

/// Parameters for building an attach transaction that deploys generalized
/// account logic for an address.
#[derive(Debug, Clone)]
pub struct AttachTxParams {
    pub owner_id: String,
    pub code: Vec<u8>,
    pub call_data: Vec<u8>,
    /// Digest of the contract's authorization entrypoint
    pub auth_fun: [u8; 32],
    pub gas_limit: u64,
    pub nonce: u64,
}

/// Transaction envelope tags the engine needs to recognize when validating
/// the sponsor-wraps-attach shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTag {
    SignedTx,
    PayingForTx,
    GaAttachTx,
    SpendTx,
}

/// Decoded transaction envelope, one node per wrapping layer.
#[derive(Debug, Clone)]
pub struct TxEnvelope {
    pub tag: TxTag,
    /// Fee in base units carried by this layer (zero for signature layers)
    pub fee: u128,
    pub inner: Option<Box<TxEnvelope>>,
}

impl TxEnvelope {
    pub fn inner(&self) -> Option<&TxEnvelope> {
        self.inner.as_deref()
    }
}

/// Capability set of a chain node plus its indexer.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Read-only simulated contract call. The decoded result comes back as
    /// JSON; callers deserialize the shape they expect.
    async fn dry_run(
        &self,
        contract_id: &str,
        entrypoint: &str,
        args: &[Value],
    ) -> Result<Value, ChainError>;

    /// Gas estimate for deploying a contract with the given init arguments.
    async fn estimate_init_gas(
        &self,
        artifact: &ContractArtifact,
        args: &[Value],
        sender_id: &str,
    ) -> Result<u64, ChainError>;

    /// Encode a contract call into call data. Pure codec work, no I/O.
    fn encode_call_data(
        &self,
        artifact: &ContractArtifact,
        entrypoint: &str,
        args: &[Value],
    ) -> Result<Vec<u8>, ChainError>;

    /// Decode a signed transaction into its envelope tree. Pure codec work.
    fn unpack(&self, raw_tx: &[u8]) -> Result<TxEnvelope, ChainError>;

    async fn build_attach_tx(&self, params: AttachTxParams) -> Result<Vec<u8>, ChainError>;

    /// Wrap an already-signed inner transaction in a fee-sponsoring one.
    async fn build_sponsor_tx(
        &self,
        payer_id: &str,
        inner_signed_tx: &[u8],
    ) -> Result<Vec<u8>, ChainError>;

    /// Sign as an inner transaction with a one-off key held by the caller.
    async fn sign_with_ephemeral(
        &self,
        secret_key: &[u8],
        tx: &[u8],
    ) -> Result<Vec<u8>, ChainError>;

    /// Sign with a wallet-managed account.
    async fn sign(&self, address: &str, tx: &[u8]) -> Result<Vec<u8>, ChainError>;

    /// Broadcast a raw transaction, returning its hash.
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ChainError>;

    /// Poll until the transaction is included, giving up after the given
    /// number of key blocks. Returns the inclusion height.
    async fn wait_for_inclusion(&self, tx_hash: &str, blocks: u64) -> Result<u64, ChainError>;

    async fn account(&self, address: &str) -> Result<ChainAccount, ChainError>;

    async fn balance(&self, address: &str) -> Result<u128, ChainError>;

    /// Fetch a single transaction by hash from the indexer.
    async fn transaction_by_hash(&self, hash: &str) -> Result<Transaction, ChainError>;
}
