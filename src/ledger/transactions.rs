//! Transaction fetching, merging and the optimistic-transaction lifecycle

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::chain::{
    ChainClient, ChainError, LocalAccount, NetworkContext, Protocol, ProtocolAdapter,
    DEFAULT_WAITING_HEIGHT,
};
use crate::model::{AccountTransactionsState, Transaction, TransactionKind};
use crate::registry::MultisigRegistry;
use crate::storage::{keys, StorageError, WalletStore};

/// Page size applied to newest-page fetches and exhausted feeds
pub const TXS_PER_PAGE: usize = 30;

/// Delay between a balance change and the triggered refresh, tolerating the
/// indexer lagging behind the node
pub const BALANCE_TRIGGER_DEBOUNCE: Duration = Duration::from_secs(5);

/// A local pending transaction older than this is dropped instead of resumed
/// after a network switch
const LOCAL_PENDING_MAX_AGE_MS: u64 = 600_000;

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Per-address paginated transaction cache.
pub struct TransactionLedger {
    context: Arc<NetworkContext>,
    chain: Arc<dyn ChainClient>,
    store: Arc<WalletStore>,
    local_accounts: RwLock<Vec<LocalAccount>>,
    adapters: HashMap<Protocol, ProtocolAdapter>,
    /// Used only to resolve protocol dispatch for multisig-owned addresses
    registry: OnceLock<Arc<MultisigRegistry>>,
    state: RwLock<HashMap<String, AccountTransactionsState>>,
    /// In-flight inclusion waits keyed by `address:hash`
    waits: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TransactionLedger {
    pub fn new(
        context: Arc<NetworkContext>,
        chain: Arc<dyn ChainClient>,
        store: Arc<WalletStore>,
        local_accounts: Vec<LocalAccount>,
        adapters: Vec<ProtocolAdapter>,
    ) -> Self {
        Self {
            context,
            chain,
            store,
            local_accounts: RwLock::new(local_accounts),
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.protocol(), adapter))
                .collect(),
            registry: OnceLock::new(),
            state: RwLock::new(HashMap::new()),
            waits: Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the registry so multisig account addresses resolve to their
    /// protocol adapter. Later calls are ignored.
    pub fn attach_registry(&self, registry: Arc<MultisigRegistry>) {
        let _ = self.registry.set(registry);
    }

    pub async fn set_local_accounts(&self, accounts: Vec<LocalAccount>) {
        *self.local_accounts.write().await = accounts;
    }

    /// Load the cached ledger map for the current network.
    pub async fn load_network(&self) -> Result<(), LedgerError> {
        let network_id = self.context.network_id().await;
        let loaded: HashMap<String, AccountTransactionsState> = self
            .store
            .get(keys::TRANSACTIONS, &network_id)?
            .unwrap_or_default();
        *self.state.write().await = loaded;
        Ok(())
    }

    async fn adapter_for(&self, address: &str) -> Option<ProtocolAdapter> {
        let protocol = {
            let accounts = self.local_accounts.read().await;
            accounts
                .iter()
                .find(|account| account.address == address)
                .map(|account| account.protocol)
        };
        let protocol = match protocol {
            Some(protocol) => Some(protocol),
            None => match self.registry.get() {
                Some(registry) => registry
                    .accounts()
                    .await
                    .iter()
                    .any(|account| account.ga_account_id == address)
                    .then_some(Protocol::Aeternity),
                None => None,
            },
        };
        protocol.and_then(|protocol| self.adapters.get(&protocol).cloned())
    }

    /// Fetch the next page (or the newest page, discarding the cursor) for
    /// an address and merge it into the cache. Returns the fetched slice.
    pub async fn fetch_page(
        &self,
        address: &str,
        reset_to_newest: bool,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let adapter = match self.adapter_for(address).await {
            Some(adapter) => adapter,
            None => return Ok(Vec::new()),
        };
        let network_id = self.context.network_id().await;

        let (cursor, local_pending_hash) = {
            let mut state = self.state.write().await;
            let entry = state.entry(address.to_string()).or_default();
            let cursor = if reset_to_newest {
                None
            } else {
                entry.next_page_cursor.clone()
            };
            (
                cursor,
                entry
                    .local_pending_transaction
                    .as_ref()
                    .map(|transaction| transaction.hash.clone()),
            )
        };

        let page = adapter.fetch_transactions(address, cursor.as_deref()).await?;

        let mut pending = page.pending_transactions;
        if let Some(hash) = &local_pending_hash {
            pending.retain(|transaction| &transaction.hash != hash);
        }

        // A multi-leg transfer is delivered as several event entries and the
        // batch may be cut at a page boundary. When the batch ends in such an
        // event, swap in the fully resolved transaction from the indexer.
        if let Some(last) = pending.last() {
            if last.kind == TransactionKind::TokenTransferEvent {
                if let Some(related) = last.related_tx_hash.clone() {
                    let resolved = self.chain.transaction_by_hash(&related).await?;
                    let last_index = pending.len() - 1;
                    pending[last_index] = resolved;
                }
            }
        }

        let mut merged: Vec<Transaction> = pending
            .into_iter()
            .chain(page.regular_transactions)
            .filter(|transaction| !transaction.kind.is_internal())
            .collect();
        for transaction in merged.iter_mut() {
            transaction.transaction_owner = Some(address.to_string());
            if transaction.kind == TransactionKind::TokenTransferEvent {
                transaction.incomplete = true;
                if let Some(related) = &transaction.related_tx_hash {
                    transaction.hash = related.clone();
                }
            }
        }
        dedup_by_hash(&mut merged);

        let min_micro_time = merged.iter().map(|t| t.micro_time).min();
        for tip in &page.tip_withdrawn_transactions {
            if tip.micro_time == 0 {
                continue;
            }
            let within_loaded_range = match min_micro_time {
                Some(min) => min < tip.micro_time,
                None => true,
            };
            if within_loaded_range {
                let mut tip = tip.clone();
                tip.transaction_owner = Some(address.to_string());
                merged.push(tip);
            }
        }

        merged.sort_by(|a, b| b.micro_time.cmp(&a.micro_time));

        let slice = {
            let mut state = self.state.write().await;
            let entry = state.entry(address.to_string()).or_default();
            if !reset_to_newest {
                entry.next_page_cursor = page.next_page_cursor.clone();
            }

            if let Some(local) = &entry.local_pending_transaction {
                if merged
                    .iter()
                    .any(|transaction| transaction.hash == local.hash && !transaction.pending)
                {
                    log::debug!("Local pending transaction {} confirmed", local.hash);
                    entry.local_pending_transaction = None;
                }
            }

            // Cached entries that were pending and have now confirmed are
            // updated in place.
            for cached in entry
                .loaded
                .iter_mut()
                .filter(|transaction| transaction.pending)
            {
                if let Some(confirmed) = merged
                    .iter()
                    .find(|transaction| transaction.hash == cached.hash && !transaction.pending)
                {
                    *cached = confirmed.clone();
                }
            }

            let mut slice = merged;
            if reset_to_newest || entry.next_page_cursor.is_none() {
                slice.truncate(TXS_PER_PAGE);
            }

            let mut combined = entry.loaded.clone();
            combined.extend(slice.iter().cloned());
            dedup_by_hash(&mut combined);
            combined.sort_by(|a, b| b.micro_time.cmp(&a.micro_time));
            entry.loaded = combined;
            slice
        };

        self.persist(&network_id).await?;
        Ok(slice)
    }

    /// Fetch the newest page for every known address. Per-address failures
    /// are logged and do not abort the pass.
    pub async fn refresh_all(&self) {
        let addresses: Vec<String> = self
            .local_accounts
            .read()
            .await
            .iter()
            .map(|account| account.address.clone())
            .collect();
        let results = join_all(
            addresses
                .iter()
                .map(|address| self.fetch_page(address, true)),
        )
        .await;
        for (address, result) in addresses.iter().zip(results) {
            if let Err(error) = result {
                log::warn!("Failed to refresh transactions for {}: {}", address, error);
            }
        }
    }

    /// Loaded transactions plus the optimistic local entry, if any.
    pub async fn all_transactions_for(&self, address: &str) -> Vec<Transaction> {
        let state = self.state.read().await;
        match state.get(address) {
            Some(entry) => {
                let mut all = entry.loaded.clone();
                if let Some(local) = &entry.local_pending_transaction {
                    all.push(local.clone());
                }
                all
            }
            None => Vec::new(),
        }
    }

    /// Search every account's merged view for a transaction hash.
    pub async fn transaction_by_hash(&self, hash: &str) -> Option<Transaction> {
        let state = self.state.read().await;
        for entry in state.values() {
            if let Some(found) = entry
                .loaded
                .iter()
                .chain(entry.local_pending_transaction.iter())
                .find(|transaction| transaction.hash == hash)
            {
                return Some(found.clone());
            }
        }
        None
    }

    pub async fn account_state(&self, address: &str) -> AccountTransactionsState {
        self.state
            .read()
            .await
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Record an optimistic transaction for an address and start waiting for
    /// its inclusion in the background. An address holds at most one such
    /// entry; a newer one replaces it.
    pub async fn upsert_local_pending(
        self: Arc<Self>,
        address: &str,
        transaction: Transaction,
    ) -> Result<(), LedgerError> {
        let network_id = self.context.network_id().await;
        let hash = transaction.hash.clone();
        {
            let mut state = self.state.write().await;
            state
                .entry(address.to_string())
                .or_default()
                .local_pending_transaction = Some(transaction);
        }
        self.persist(&network_id).await?;
        Arc::clone(&self).spawn_inclusion_wait(address.to_string(), hash);
        Ok(())
    }

    fn spawn_inclusion_wait(self: Arc<Self>, address: String, hash: String) {
        let key = format!("{}:{}", address, hash);
        let this = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            match this
                .chain
                .wait_for_inclusion(&hash, DEFAULT_WAITING_HEIGHT)
                .await
            {
                Ok(height) => {
                    log::debug!("Transaction {} included at height {}", hash, height);
                    if let Err(error) = this.mark_pending_sent(&address, &hash).await {
                        log::warn!("Failed to mark {} as sent: {}", hash, error);
                    }
                }
                Err(error) => {
                    log::debug!("Transaction {} not included: {}", hash, error);
                    if let Err(error) = this.remove_local_pending(&address, &hash).await {
                        log::warn!("Failed to remove pending {}: {}", hash, error);
                    }
                }
            }
        });
        let mut waits = self.waits.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = waits.insert(key, handle) {
            previous.abort();
        }
    }

    /// Mark the address's optimistic entry as observed on chain.
    pub async fn mark_pending_sent(&self, address: &str, hash: &str) -> Result<(), LedgerError> {
        let network_id = self.context.network_id().await;
        {
            let mut state = self.state.write().await;
            if let Some(local) = state
                .get_mut(address)
                .and_then(|entry| entry.local_pending_transaction.as_mut())
            {
                if local.hash == hash {
                    local.sent = true;
                }
            }
        }
        self.persist(&network_id).await
    }

    /// Drop the address's optimistic entry; the next confirmed-state refresh
    /// supersedes it.
    pub async fn remove_local_pending(
        &self,
        address: &str,
        hash: &str,
    ) -> Result<(), LedgerError> {
        let network_id = self.context.network_id().await;
        {
            let mut state = self.state.write().await;
            if let Some(entry) = state.get_mut(address) {
                if entry
                    .local_pending_transaction
                    .as_ref()
                    .map(|local| local.hash == hash)
                    .unwrap_or(false)
                {
                    entry.local_pending_transaction = None;
                }
            }
        }
        self.persist(&network_id).await
    }

    /// React to a network switch: snapshot the outgoing network's state,
    /// load the incoming network's cache, cancel all inclusion waits from
    /// the old network and resume or drop local pending entries.
    pub async fn handle_network_change(
        self: Arc<Self>,
        previous_network_id: &str,
    ) -> Result<(), LedgerError> {
        {
            let mut waits = self.waits.lock().unwrap_or_else(|e| e.into_inner());
            for (_, handle) in waits.drain() {
                handle.abort();
            }
        }

        let network_id = self.context.network_id().await;
        {
            let state = self.state.read().await;
            self.store
                .set(keys::TRANSACTIONS, previous_network_id, &*state)?;
        }
        let loaded: HashMap<String, AccountTransactionsState> = self
            .store
            .get(keys::TRANSACTIONS, &network_id)?
            .unwrap_or_default();
        *self.state.write().await = loaded;

        let now_ms = Utc::now().timestamp_millis() as u64;
        let mut to_resume = Vec::new();
        {
            let mut state = self.state.write().await;
            for (address, entry) in state.iter_mut() {
                let local = match &entry.local_pending_transaction {
                    Some(local) if !local.sent => local.clone(),
                    _ => continue,
                };
                if now_ms.saturating_sub(local.micro_time) > LOCAL_PENDING_MAX_AGE_MS {
                    log::debug!("Dropping stale local pending transaction {}", local.hash);
                    entry.local_pending_transaction = None;
                } else {
                    to_resume.push((address.clone(), local.hash));
                }
            }
        }
        self.persist(&network_id).await?;

        for (address, hash) in to_resume {
            Arc::clone(&self).spawn_inclusion_wait(address, hash);
        }
        Ok(())
    }

    async fn persist(&self, network_id: &str) -> Result<(), LedgerError> {
        let state = self.state.read().await;
        self.store.set(keys::TRANSACTIONS, network_id, &*state)?;
        Ok(())
    }
}

/// Keep the first occurrence of every hash.
fn dedup_by_hash(transactions: &mut Vec<Transaction>) {
    let mut seen = HashSet::new();
    transactions.retain(|transaction| seen.insert(transaction.hash.clone()));
}
