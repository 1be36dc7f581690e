//! Protocol dispatch
//!
//! Transaction fetching is protocol specific. Instead of dynamic dispatch by
//! string tags, the supported protocols form a fixed enum and each one is
//! paired with its transaction source behind a [`ProtocolAdapter`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chain::ChainError;
use crate::model::TransactionsPage;

/// Supported ledger protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Native coin protocol, contract version line 2
    Aeternity,
}

/// A locally managed signer account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAccount {
    pub address: String,
    pub protocol: Protocol,
}

/// Paginated transaction feed for one protocol.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Fetch a page of transactions for `address`. A `None` cursor requests
    /// the newest page.
    async fn fetch_transactions(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, ChainError>;
}

/// A protocol tag bound to its transaction source.
#[derive(Clone)]
pub struct ProtocolAdapter {
    protocol: Protocol,
    source: Arc<dyn TransactionSource>,
}

impl ProtocolAdapter {
    pub fn new(protocol: Protocol, source: Arc<dyn TransactionSource>) -> Self {
        Self { protocol, source }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Ticker of the protocol's default coin.
    pub fn default_coin(&self) -> &'static str {
        match self.protocol {
            Protocol::Aeternity => "AE",
        }
    }

    /// Number of decimal places of the default coin.
    pub fn coin_precision(&self) -> u32 {
        match self.protocol {
            Protocol::Aeternity => 18,
        }
    }

    pub async fn fetch_transactions(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, ChainError> {
        self.source.fetch_transactions(address, cursor).await
    }
}
