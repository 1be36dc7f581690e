//! Data model shared across the sync engine

pub mod multisig;
pub mod transaction;

pub use multisig::{
    ConsensusInfo, MultisigAccount, PendingMultisigCreation, RawMultisigRecord,
    SUPPORTED_CONTRACT_VERSION,
};
pub use transaction::{
    AccountTransactionsState, Transaction, TransactionKind, TransactionsPage,
};
