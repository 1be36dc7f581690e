//! Multisig discovery service client
//!
//! The discovery service indexes deployed multisig contracts and answers
//! "which multisig accounts can this address sign for". Transport is left to
//! the implementor (`GET /multisig/{address}` in the reference deployment).

use async_trait::async_trait;

use crate::chain::ChainError;
use crate::model::RawMultisigRecord;

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// All multisig account records whose signer set includes `address`.
    async fn accounts_for_signer(
        &self,
        address: &str,
    ) -> Result<Vec<RawMultisigRecord>, ChainError>;
}
