//! Per-address transaction ledger
//!
//! Paginated cache of confirmed, pending and locally-optimistic transactions
//! for every known address, persisted per network.

pub mod transactions;

pub use transactions::{
    LedgerError, TransactionLedger, BALANCE_TRIGGER_DEBOUNCE, TXS_PER_PAGE,
};
