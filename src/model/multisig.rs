//! Multisig account records
//!
//! The registry works with three representations of a shared-custody account:
//! the raw record returned by the discovery service, the fully materialized
//! account enriched with live chain data, and the in-flight creation state
//! accumulated by the creation coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contract version the engine understands. Discovery records with any other
/// version are skipped during refresh.
pub const SUPPORTED_CONTRACT_VERSION: u32 = 2;

/// Raw multisig account record as returned by the discovery service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMultisigRecord {
    /// Generalized account address (`ak_…`)
    pub ga_account_id: String,
    /// Address of the deployed multisig contract (`ct_…`)
    pub contract_id: String,
    /// Contract version reported by the discovery service
    pub version: u32,
    /// Local signer address the record was discovered through
    pub signer_id: String,
    /// Block height of the deployment, `-1` when unknown
    pub height: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// On-chain consensus state of a multisig account, read via dry-run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsensusInfo {
    /// Hash of the currently proposed transaction, if any
    pub tx_hash: Option<Vec<u8>>,
    pub confirmations_required: u32,
    pub confirmed_by: Vec<String>,
    pub refused_by: Vec<String>,
    pub proposed_by: String,
    pub expiration_height: u64,
    pub expired: bool,
}

/// A fully materialized multisig account.
///
/// Exactly one record exists per `contract_id`; `confirmed_by` is always a
/// subset of `signers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultisigAccount {
    /// Generalized account address, primary key
    pub ga_account_id: String,
    pub contract_id: String,
    /// Ordered list of signer addresses
    pub signers: Vec<String>,
    pub confirmations_required: u32,
    pub confirmed_by: Vec<String>,
    pub refused_by: Vec<String>,
    pub proposed_by: String,
    /// Monotonically non-decreasing contract nonce
    pub nonce: u64,
    /// Balance in base units
    pub balance: u128,
    /// A proposal exists and has not expired
    pub has_pending_transaction: bool,
    /// Hash of the current proposal (hex), if any
    pub tx_hash: Option<String>,
    pub expiration_height: u64,
    pub expired: bool,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True until the registry's discovery pass confirms the account
    pub pending: bool,
}

impl MultisigAccount {
    /// Whether any of the given local signers is asked to confirm the current
    /// proposal and has not done so yet.
    pub fn signature_requested(&self, local_addresses: &[String]) -> bool {
        self.has_pending_transaction
            && self.signers.iter().any(|signer| {
                local_addresses.contains(signer) && !self.confirmed_by.contains(signer)
            })
    }
}

/// Transactions accumulated while creating a multisig account, keyed by the
/// ephemeral account address in the coordinator. Each field is populated by a
/// successive protocol phase; the whole entry is deleted once the account is
/// deployed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingMultisigCreation {
    /// Encoded contract init call data
    pub encoded_call_data: Option<Vec<u8>>,
    /// Attach transaction signed with the ephemeral key
    pub signed_attach_tx: Option<Vec<u8>>,
    /// Sponsor transaction signed by the payer, ready to broadcast
    pub raw_tx: Option<Vec<u8>>,
}
