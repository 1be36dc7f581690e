//! Transaction records and the per-address ledger state

use serde::{Deserialize, Serialize};

/// Wire type of a transaction entry. Used for internal-entry filtering and to
/// detect partial multi-leg transfer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Spend,
    ContractCall,
    ContractCreate,
    GaAttach,
    PayingFor,
    /// One leg of a multi-leg token transfer event stream. A batch ending in
    /// one of these may have been truncated at a page boundary.
    TokenTransferEvent,
    /// Synthetic bookkeeping entry emitted by the indexer, never displayed.
    Internal,
}

impl TransactionKind {
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

/// A single transaction as tracked by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    /// Unique key within an address's store
    pub hash: String,
    /// Chain timestamp in milliseconds, the ordering key
    pub micro_time: u64,
    pub kind: TransactionKind,
    /// Known to the chain but not yet included in a block
    pub pending: bool,
    /// Local optimistic entry whose inclusion has been observed
    pub sent: bool,
    /// Marks a partially resolved multi-leg event
    pub incomplete: bool,
    /// Address whose ledger this entry belongs to
    pub transaction_owner: Option<String>,
    /// For multi-leg event entries, hash of the enclosing transaction
    pub related_tx_hash: Option<String>,
    /// Opaque protocol payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Transaction {
    /// Minimal entry used as a starting point; callers fill in the rest.
    pub fn new(hash: impl Into<String>, micro_time: u64, kind: TransactionKind) -> Self {
        Self {
            hash: hash.into(),
            micro_time,
            kind,
            pending: false,
            sent: false,
            incomplete: false,
            transaction_owner: None,
            related_tx_hash: None,
            payload: serde_json::Value::Null,
        }
    }
}

/// One page of transactions as returned by a protocol transaction source.
#[derive(Debug, Clone, Default)]
pub struct TransactionsPage {
    /// Entries known to the chain but not yet included
    pub pending_transactions: Vec<Transaction>,
    /// Confirmed entries
    pub regular_transactions: Vec<Transaction>,
    /// Tip-withdrawal entries delivered out of band
    pub tip_withdrawn_transactions: Vec<Transaction>,
    /// Cursor for the next page, `None` when exhausted
    pub next_page_cursor: Option<String>,
}

/// Cached transaction state for a single address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccountTransactionsState {
    /// Ordered sequence of transactions, unique by hash
    pub loaded: Vec<Transaction>,
    /// Cursor for the next page, `None` when exhausted
    pub next_page_cursor: Option<String>,
    /// At most one optimistic local entry, cleared once the same hash shows
    /// up confirmed in `loaded`
    pub local_pending_transaction: Option<Transaction>,
    pub tip_withdrawn_transactions: Vec<Transaction>,
}
