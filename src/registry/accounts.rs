//! Registry refresh, ordering and persistence

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::chain::{ChainClient, ChainError, DiscoveryClient, LocalAccount, NetworkContext};
use crate::model::{ConsensusInfo, MultisigAccount, RawMultisigRecord, SUPPORTED_CONTRACT_VERSION};
use crate::storage::{keys, StorageError, WalletStore};

/// Polling cadence for continuous registry refresh
pub const MULTISIG_REFRESH_INTERVAL: Duration = Duration::from_secs(12);

/// Accounts whose live state is fetched concurrently in one dry-run batch.
/// Batches themselves run one after another to bound load on the node.
const DRY_RUN_BATCH_SIZE: usize = 5;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

#[derive(Default)]
struct RegistryState {
    confirmed: Vec<MultisigAccount>,
    pending: Vec<MultisigAccount>,
    active_account_id: Option<String>,
    /// Network the active pointer belongs to
    active_network_id: Option<String>,
    /// When set, the active account's nonce is re-queried instead of reused
    fresh_nonce_requested: bool,
}

/// Per-network registry of multisig accounts owned by local signers.
pub struct MultisigRegistry {
    context: Arc<NetworkContext>,
    chain: Arc<dyn ChainClient>,
    discovery: Arc<dyn DiscoveryClient>,
    store: Arc<WalletStore>,
    local_accounts: RwLock<Vec<LocalAccount>>,
    state: RwLock<RegistryState>,
}

impl MultisigRegistry {
    pub fn new(
        context: Arc<NetworkContext>,
        chain: Arc<dyn ChainClient>,
        discovery: Arc<dyn DiscoveryClient>,
        store: Arc<WalletStore>,
        local_accounts: Vec<LocalAccount>,
    ) -> Self {
        Self {
            context,
            chain,
            discovery,
            store,
            local_accounts: RwLock::new(local_accounts),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub async fn set_local_accounts(&self, accounts: Vec<LocalAccount>) {
        *self.local_accounts.write().await = accounts;
    }

    /// Load cached lists and the active pointer for the current network,
    /// discarding anything held for a previous network.
    pub async fn load_network(&self) -> Result<(), RegistryError> {
        let network_id = self.context.network_id().await;
        let confirmed: Vec<MultisigAccount> = self
            .store
            .get(keys::MULTISIG, &network_id)?
            .unwrap_or_default();
        let pending: Vec<MultisigAccount> = self
            .store
            .get(keys::MULTISIG_PENDING, &network_id)?
            .unwrap_or_default();
        let active: Option<String> = self
            .store
            .get(keys::ACTIVE_MULTISIG_ACCOUNT, &network_id)?
            .unwrap_or_default();

        let mut state = self.state.write().await;
        state.confirmed = confirmed;
        state.pending = pending;
        state.active_account_id = active;
        state.active_network_id = Some(network_id);
        Ok(())
    }

    /// Whether any confirmed accounts are cached for the current network.
    pub async fn has_cached_accounts(&self) -> bool {
        let network_id = self.context.network_id().await;
        self.store
            .get::<Vec<MultisigAccount>>(keys::MULTISIG, &network_id)
            .ok()
            .flatten()
            .map(|accounts| !accounts.is_empty())
            .unwrap_or(false)
    }

    /// Refresh the list of multisig accounts from discovery and the chain.
    ///
    /// Failures are degraded locally: a discovery fetch failure contributes
    /// nothing for this cycle, a per-account dry-run failure keeps that
    /// account's previous cached value. If the active network changes while
    /// the refresh is in flight, the result is discarded.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let (network_id, generation) = self.context.snapshot().await;
        let local_addresses: Vec<String> = self
            .local_accounts
            .read()
            .await
            .iter()
            .map(|account| account.address.clone())
            .collect();

        let mut raw_records: Vec<RawMultisigRecord> = Vec::new();
        let fetched = join_all(
            local_addresses
                .iter()
                .map(|address| self.discovery.accounts_for_signer(address)),
        )
        .await;
        for (address, result) in local_addresses.iter().zip(fetched) {
            match result {
                Ok(records) => raw_records.extend(records),
                Err(error) => {
                    log::warn!("Failed to fetch multisig accounts for {}: {}", address, error);
                }
            }
        }

        let mut seen = HashSet::new();
        raw_records.retain(|record| seen.insert(record.contract_id.clone()));
        raw_records.retain(|record| record.version == SUPPORTED_CONTRACT_VERSION);

        let (priors, active_id, fresh_nonce) = {
            let state = self.state.read().await;
            (
                state.confirmed.clone(),
                state.active_account_id.clone(),
                state.fresh_nonce_requested,
            )
        };

        let mut accounts: Vec<MultisigAccount> = Vec::with_capacity(raw_records.len());
        for batch in raw_records.chunks(DRY_RUN_BATCH_SIZE) {
            if !self.context.is_current(generation).await {
                log::info!("Network changed during multisig refresh, abandoning result");
                return Ok(());
            }
            let results = join_all(batch.iter().map(|raw| {
                let prior = priors
                    .iter()
                    .find(|account| account.contract_id == raw.contract_id)
                    .cloned();
                let force_nonce =
                    fresh_nonce && active_id.as_deref() == Some(raw.ga_account_id.as_str());
                self.materialize_account(raw, prior, force_nonce)
            }))
            .await;
            accounts.extend(results.into_iter().flatten());
        }

        accounts.sort_by(|a, b| compare_accounts(a, b, &local_addresses));

        if !self.context.is_current(generation).await {
            log::info!("Network changed during multisig refresh, abandoning result");
            return Ok(());
        }

        let mut state = self.state.write().await;
        state.confirmed = accounts;
        self.store.set(keys::MULTISIG, &network_id, &state.confirmed)?;

        if state.active_account_id.is_none()
            || state.active_network_id.as_deref() != Some(network_id.as_str())
        {
            if let Some(first) = state.confirmed.first() {
                state.active_account_id = Some(first.ga_account_id.clone());
                state.active_network_id = Some(network_id.clone());
                self.store.set(
                    keys::ACTIVE_MULTISIG_ACCOUNT,
                    &network_id,
                    &state.active_account_id,
                )?;
            }
        }

        let confirmed_ids: HashSet<String> = state
            .confirmed
            .iter()
            .map(|account| account.contract_id.clone())
            .collect();
        let pending_before = state.pending.len();
        state
            .pending
            .retain(|account| !confirmed_ids.contains(&account.contract_id));
        if state.pending.len() != pending_before {
            self.store
                .set(keys::MULTISIG_PENDING, &network_id, &state.pending)?;
        }

        log::debug!(
            "Multisig refresh done: {} confirmed, {} pending",
            state.confirmed.len(),
            state.pending.len()
        );
        Ok(())
    }

    /// Materialize one account, falling back to its previous cached value
    /// when the node rejects the dry-run (e.g. a nonce race).
    async fn materialize_account(
        &self,
        raw: &RawMultisigRecord,
        prior: Option<MultisigAccount>,
        force_nonce: bool,
    ) -> Option<MultisigAccount> {
        match self.query_account(raw, prior.as_ref(), force_nonce).await {
            Ok(account) => Some(account),
            Err(ChainError::DryRun(reason)) => {
                log::debug!(
                    "Dry-run failed for {}: {}, keeping cached value",
                    raw.contract_id,
                    reason
                );
                prior
            }
            Err(error) => {
                log::warn!(
                    "Failed to refresh multisig account {}: {}",
                    raw.contract_id,
                    error
                );
                prior
            }
        }
    }

    async fn query_account(
        &self,
        raw: &RawMultisigRecord,
        prior: Option<&MultisigAccount>,
        force_nonce: bool,
    ) -> Result<MultisigAccount, ChainError> {
        // Nonce and signers can be reused from the previous refresh; bounded
        // staleness in exchange for fewer dry-run calls.
        let nonce = match prior {
            Some(previous) if !force_nonce => previous.nonce,
            _ => {
                let value = self
                    .chain
                    .dry_run(&raw.contract_id, "get_nonce", &[])
                    .await?;
                value_to_u64(&value)
                    .ok_or_else(|| ChainError::Decode(format!("nonce: {}", value)))?
            }
        };

        let signers = match prior {
            Some(previous) if !previous.signers.is_empty() => previous.signers.clone(),
            _ => {
                let value = self
                    .chain
                    .dry_run(&raw.contract_id, "get_signers", &[])
                    .await?;
                serde_json::from_value(value)
                    .map_err(|error| ChainError::Decode(format!("signers: {}", error)))?
            }
        };

        let consensus_value = self
            .chain
            .dry_run(&raw.contract_id, "get_consensus_info", &[])
            .await?;
        let consensus = decode_consensus(consensus_value)?;

        let balance = self.chain.balance(&raw.ga_account_id).await?;

        let tx_hash = consensus.tx_hash.as_ref().map(hex::encode);
        let has_pending_transaction = tx_hash.is_some() && !consensus.expired;

        Ok(MultisigAccount {
            ga_account_id: raw.ga_account_id.clone(),
            contract_id: raw.contract_id.clone(),
            signers,
            confirmations_required: consensus.confirmations_required,
            confirmed_by: consensus.confirmed_by,
            refused_by: consensus.refused_by,
            proposed_by: consensus.proposed_by,
            nonce,
            balance,
            has_pending_transaction,
            tx_hash,
            expiration_height: consensus.expiration_height,
            expired: consensus.expired,
            version: raw.version,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            pending: false,
        })
    }

    /// Merged view for display: locally pending accounts first, then
    /// confirmed ones, with pending duplicates of confirmed accounts dropped.
    pub async fn accounts(&self) -> Vec<MultisigAccount> {
        let state = self.state.read().await;
        let confirmed_ids: HashSet<&str> = state
            .confirmed
            .iter()
            .map(|account| account.contract_id.as_str())
            .collect();
        state
            .pending
            .iter()
            .filter(|account| !confirmed_ids.contains(account.contract_id.as_str()))
            .cloned()
            .chain(state.confirmed.iter().cloned())
            .collect()
    }

    pub async fn confirmed_accounts(&self) -> Vec<MultisigAccount> {
        self.state.read().await.confirmed.clone()
    }

    pub async fn pending_accounts(&self) -> Vec<MultisigAccount> {
        self.state.read().await.pending.clone()
    }

    /// Look up an account in the merged view by its contract id.
    pub async fn account_by_contract_id(&self, contract_id: &str) -> Option<MultisigAccount> {
        self.accounts()
            .await
            .into_iter()
            .find(|account| account.contract_id == contract_id)
    }

    /// Look up an account among confirmed (discovered) accounts only.
    pub async fn confirmed_by_contract_id(&self, contract_id: &str) -> Option<MultisigAccount> {
        self.state
            .read()
            .await
            .confirmed
            .iter()
            .find(|account| account.contract_id == contract_id)
            .cloned()
    }

    pub async fn active_account(&self) -> Option<MultisigAccount> {
        let active_id = self.state.read().await.active_account_id.clone()?;
        self.accounts()
            .await
            .into_iter()
            .find(|account| account.ga_account_id == active_id)
    }

    /// Point the active-account pointer at one of the known accounts.
    /// Unknown ids are ignored.
    pub async fn set_active_account(&self, ga_account_id: &str) -> Result<(), RegistryError> {
        let known = self
            .accounts()
            .await
            .iter()
            .any(|account| account.ga_account_id == ga_account_id);
        if !known {
            return Ok(());
        }
        let network_id = self.context.network_id().await;
        let mut state = self.state.write().await;
        state.active_account_id = Some(ga_account_id.to_string());
        state.active_network_id = Some(network_id.clone());
        self.store.set(
            keys::ACTIVE_MULTISIG_ACCOUNT,
            &network_id,
            &state.active_account_id,
        )?;
        Ok(())
    }

    /// Register a locally created account that discovery has not seen yet.
    pub async fn add_pending_account(
        &self,
        account: MultisigAccount,
    ) -> Result<(), RegistryError> {
        let network_id = self.context.network_id().await;
        let mut state = self.state.write().await;
        state.pending.push(account);
        self.store
            .set(keys::MULTISIG_PENDING, &network_id, &state.pending)?;
        Ok(())
    }

    /// Attach a freshly proposed transaction to a pending account.
    pub async fn record_proposed_transaction(
        &self,
        ga_account_id: &str,
        tx_hash: &str,
        proposed_by: &str,
    ) -> Result<(), RegistryError> {
        let network_id = self.context.network_id().await;
        let mut state = self.state.write().await;
        for account in state
            .pending
            .iter_mut()
            .filter(|account| account.ga_account_id == ga_account_id)
        {
            account.tx_hash = Some(tx_hash.to_string());
            account.has_pending_transaction = true;
            account.proposed_by = proposed_by.to_string();
        }
        self.store
            .set(keys::MULTISIG_PENDING, &network_id, &state.pending)?;
        Ok(())
    }

    /// Re-query the active account's nonce instead of reusing the cached
    /// value, starting with an immediate refresh. Stays in effect for
    /// subsequent refreshes until [`Self::stop_fresh_nonce`].
    pub async fn request_fresh_nonce(&self) -> Result<(), RegistryError> {
        self.state.write().await.fresh_nonce_requested = true;
        self.refresh().await
    }

    pub async fn stop_fresh_nonce(&self) {
        self.state.write().await.fresh_nonce_requested = false;
    }

    /// React to a network switch: reload both lists and the active pointer
    /// for the new network. Cached per-contract state from the previous
    /// network is dropped wholesale.
    pub async fn handle_network_change(&self) -> Result<(), RegistryError> {
        self.load_network().await
    }
}

/// Total order over refreshed accounts, stable on ties:
/// pending transaction first, then "local signature requested", then by
/// confirmation count, balance, and finally oldest creation date.
fn compare_accounts(
    a: &MultisigAccount,
    b: &MultisigAccount,
    local_addresses: &[String],
) -> Ordering {
    b.has_pending_transaction
        .cmp(&a.has_pending_transaction)
        .then_with(|| {
            b.signature_requested(local_addresses)
                .cmp(&a.signature_requested(local_addresses))
        })
        .then_with(|| b.confirmed_by.len().cmp(&a.confirmed_by.len()))
        .then_with(|| b.balance.cmp(&a.balance))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Decode the consensus dry-run result, normalizing numeric fields the node
/// may deliver as strings.
fn decode_consensus(value: Value) -> Result<ConsensusInfo, ChainError> {
    let object = value
        .as_object()
        .ok_or_else(|| ChainError::Decode(format!("consensus info: {}", value)))?;

    let tx_hash = match object.get("tx_hash") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            serde_json::from_value::<Vec<u8>>(raw.clone())
                .map_err(|error| ChainError::Decode(format!("tx_hash: {}", error)))?,
        ),
    };

    let confirmations_required = object
        .get("confirmations_required")
        .and_then(value_to_u64)
        .ok_or_else(|| ChainError::Decode("confirmations_required".into()))?
        as u32;
    let expiration_height = object
        .get("expiration_height")
        .and_then(value_to_u64)
        .ok_or_else(|| ChainError::Decode("expiration_height".into()))?;

    let string_list = |field: &str| -> Result<Vec<String>, ChainError> {
        match object.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|error| ChainError::Decode(format!("{}: {}", field, error))),
        }
    };

    Ok(ConsensusInfo {
        tx_hash,
        confirmations_required,
        confirmed_by: string_list("confirmed_by")?,
        refused_by: string_list("refused_by")?,
        proposed_by: object
            .get("proposed_by")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        expiration_height,
        expired: object
            .get("expired")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
