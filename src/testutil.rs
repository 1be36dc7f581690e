//! Shared mocks and fixtures for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::chain::{
    AttachTxParams, ChainAccount, ChainClient, ChainError, ContractArtifact, DiscoveryClient,
    LocalAccount, NetworkContext, Protocol, TransactionSource, TxEnvelope, TxTag,
};
use crate::ledger::TransactionLedger;
use crate::model::{
    MultisigAccount, RawMultisigRecord, Transaction, TransactionKind, TransactionsPage,
    SUPPORTED_CONTRACT_VERSION,
};
use crate::registry::MultisigRegistry;
use crate::storage::{StoreConfig, WalletStore};

/// Fixed timestamp so persisted fixtures are byte-stable across runs.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
}

pub fn local_account(address: &str) -> LocalAccount {
    LocalAccount {
        address: address.to_string(),
        protocol: Protocol::Aeternity,
    }
}

pub fn raw_record(contract_id: &str, ga_account_id: &str) -> RawMultisigRecord {
    RawMultisigRecord {
        ga_account_id: ga_account_id.to_string(),
        contract_id: contract_id.to_string(),
        version: SUPPORTED_CONTRACT_VERSION,
        signer_id: "ak_me".to_string(),
        height: 100,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

pub fn test_account(contract_id: &str, ga_account_id: &str) -> MultisigAccount {
    MultisigAccount {
        ga_account_id: ga_account_id.to_string(),
        contract_id: contract_id.to_string(),
        signers: vec!["ak_me".to_string()],
        confirmations_required: 1,
        confirmed_by: vec![],
        refused_by: vec![],
        proposed_by: String::new(),
        nonce: 1,
        balance: 0,
        has_pending_transaction: false,
        tx_hash: None,
        expiration_height: 0,
        expired: false,
        version: SUPPORTED_CONTRACT_VERSION,
        created_at: fixed_time(),
        updated_at: fixed_time(),
        pending: false,
    }
}

pub fn consensus_json(
    tx_hash: Option<&[u8]>,
    confirmations_required: u32,
    confirmed_by: &[&str],
    expiration_height: u64,
    expired: bool,
) -> Value {
    json!({
        "tx_hash": tx_hash,
        "confirmations_required": confirmations_required,
        "confirmed_by": confirmed_by,
        "refused_by": [],
        "proposed_by": confirmed_by.first().copied().unwrap_or(""),
        "expiration_height": expiration_height,
        "expired": expired,
    })
}

pub fn tx(hash: &str, micro_time: u64) -> Transaction {
    Transaction::new(hash, micro_time, TransactionKind::Spend)
}

/// Sponsor-wraps-attach envelope as produced by a correct payment build.
pub fn sponsor_envelope(outer_fee: u128, inner_fee: u128) -> TxEnvelope {
    TxEnvelope {
        tag: TxTag::SignedTx,
        fee: 0,
        inner: Some(Box::new(TxEnvelope {
            tag: TxTag::PayingForTx,
            fee: outer_fee,
            inner: Some(Box::new(TxEnvelope {
                tag: TxTag::GaAttachTx,
                fee: inner_fee,
                inner: None,
            })),
        })),
    }
}

// =============================================================================
// Mock chain client
// =============================================================================

#[derive(Default)]
pub struct MockChain {
    pub nonces: Mutex<HashMap<String, u64>>,
    pub signers: Mutex<HashMap<String, Vec<String>>>,
    pub consensus: Mutex<HashMap<String, Value>>,
    pub balances: Mutex<HashMap<String, u128>>,
    pub accounts: Mutex<HashMap<String, ChainAccount>>,
    pub transactions: Mutex<HashMap<String, Transaction>>,
    pub dry_run_failures: Mutex<HashSet<String>>,
    /// Transaction hashes that confirm when polled for inclusion
    pub included: Mutex<HashSet<String>>,
    /// When set, the next dry-run switches the network before answering,
    /// simulating a switch racing an in-flight refresh
    pub switch_on_dry_run: Mutex<Option<(Arc<NetworkContext>, String)>>,
    pub broadcasts: Mutex<Vec<Vec<u8>>>,
    pub envelope: Mutex<Option<TxEnvelope>>,
    /// Total number of I/O calls made against the mock
    pub io_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_nonce(&self, contract_id: &str, nonce: u64) {
        self.nonces
            .lock()
            .unwrap()
            .insert(contract_id.to_string(), nonce);
    }

    pub fn set_signers(&self, contract_id: &str, signers: &[&str]) {
        self.signers.lock().unwrap().insert(
            contract_id.to_string(),
            signers.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_consensus(&self, contract_id: &str, value: Value) {
        self.consensus
            .lock()
            .unwrap()
            .insert(contract_id.to_string(), value);
    }

    pub fn set_balance(&self, address: &str, balance: u128) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), balance);
    }

    pub fn set_account(&self, account: ChainAccount) {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.address.clone(), account);
    }

    pub fn set_transaction(&self, transaction: Transaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(transaction.hash.clone(), transaction);
    }

    pub fn fail_dry_run(&self, contract_id: &str) {
        self.dry_run_failures
            .lock()
            .unwrap()
            .insert(contract_id.to_string());
    }

    pub fn mark_included(&self, tx_hash: &str) {
        self.included.lock().unwrap().insert(tx_hash.to_string());
    }

    pub fn set_envelope(&self, envelope: TxEnvelope) {
        *self.envelope.lock().unwrap() = Some(envelope);
    }

    pub fn switch_network_on_dry_run(&self, context: Arc<NetworkContext>, network_id: &str) {
        *self.switch_on_dry_run.lock().unwrap() = Some((context, network_id.to_string()));
    }

    pub fn io_call_count(&self) -> usize {
        self.io_calls.load(Ordering::SeqCst)
    }

    fn record_io(&self) {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn dry_run(
        &self,
        contract_id: &str,
        entrypoint: &str,
        _args: &[Value],
    ) -> Result<Value, ChainError> {
        self.record_io();
        let switch = self.switch_on_dry_run.lock().unwrap().take();
        if let Some((context, network_id)) = switch {
            context.switch(network_id).await;
        }
        if self.dry_run_failures.lock().unwrap().contains(contract_id) {
            return Err(ChainError::DryRun("nonce mismatch".into()));
        }
        match entrypoint {
            "get_nonce" => Ok(json!(self
                .nonces
                .lock()
                .unwrap()
                .get(contract_id)
                .copied()
                .unwrap_or(1))),
            "get_signers" => Ok(json!(self
                .signers
                .lock()
                .unwrap()
                .get(contract_id)
                .cloned()
                .unwrap_or_default())),
            "get_consensus_info" => Ok(self
                .consensus
                .lock()
                .unwrap()
                .get(contract_id)
                .cloned()
                .unwrap_or_else(|| consensus_json(None, 1, &[], 0, false))),
            other => Err(ChainError::Rpc(format!("unknown entrypoint {}", other))),
        }
    }

    async fn estimate_init_gas(
        &self,
        _artifact: &ContractArtifact,
        _args: &[Value],
        _sender_id: &str,
    ) -> Result<u64, ChainError> {
        self.record_io();
        Ok(5_000)
    }

    fn encode_call_data(
        &self,
        artifact: &ContractArtifact,
        entrypoint: &str,
        _args: &[Value],
    ) -> Result<Vec<u8>, ChainError> {
        Ok(format!("cb_{}_{}", artifact.name, entrypoint).into_bytes())
    }

    fn unpack(&self, _raw_tx: &[u8]) -> Result<TxEnvelope, ChainError> {
        Ok(self
            .envelope
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| sponsor_envelope(200, 300)))
    }

    async fn build_attach_tx(&self, params: AttachTxParams) -> Result<Vec<u8>, ChainError> {
        self.record_io();
        Ok(format!("attach:{}:{}", params.owner_id, params.nonce).into_bytes())
    }

    async fn build_sponsor_tx(
        &self,
        payer_id: &str,
        inner_signed_tx: &[u8],
    ) -> Result<Vec<u8>, ChainError> {
        self.record_io();
        let mut tx = format!("paidby:{}:", payer_id).into_bytes();
        tx.extend_from_slice(inner_signed_tx);
        Ok(tx)
    }

    async fn sign_with_ephemeral(
        &self,
        _secret_key: &[u8],
        tx: &[u8],
    ) -> Result<Vec<u8>, ChainError> {
        self.record_io();
        let mut signed = b"esig:".to_vec();
        signed.extend_from_slice(tx);
        Ok(signed)
    }

    async fn sign(&self, address: &str, tx: &[u8]) -> Result<Vec<u8>, ChainError> {
        self.record_io();
        let mut signed = format!("sig:{}:", address).into_bytes();
        signed.extend_from_slice(tx);
        Ok(signed)
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, ChainError> {
        self.record_io();
        let mut broadcasts = self.broadcasts.lock().unwrap();
        broadcasts.push(raw_tx.to_vec());
        Ok(format!("th_broadcast_{}", broadcasts.len()))
    }

    async fn wait_for_inclusion(&self, tx_hash: &str, blocks: u64) -> Result<u64, ChainError> {
        self.record_io();
        if self.included.lock().unwrap().contains(tx_hash) {
            Ok(1)
        } else {
            Err(ChainError::InclusionTimeout {
                hash: tx_hash.to_string(),
                blocks,
            })
        }
    }

    async fn account(&self, address: &str) -> Result<ChainAccount, ChainError> {
        self.record_io();
        self.accounts
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| ChainError::AccountNotFound(address.to_string()))
    }

    async fn balance(&self, address: &str) -> Result<u128, ChainError> {
        self.record_io();
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0))
    }

    async fn transaction_by_hash(&self, hash: &str) -> Result<Transaction, ChainError> {
        self.record_io();
        self.transactions
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| ChainError::TransactionNotFound(hash.to_string()))
    }
}

// =============================================================================
// Mock discovery service
// =============================================================================

#[derive(Default)]
pub struct MockDiscovery {
    pub records: Mutex<HashMap<String, Vec<RawMultisigRecord>>>,
    pub failing: AtomicBool,
}

impl MockDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_record(&self, signer: &str, record: RawMultisigRecord) {
        self.records
            .lock()
            .unwrap()
            .entry(signer.to_string())
            .or_default()
            .push(record);
    }

    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DiscoveryClient for MockDiscovery {
    async fn accounts_for_signer(
        &self,
        address: &str,
    ) -> Result<Vec<RawMultisigRecord>, ChainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("discovery unavailable".into()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Mock transaction source
// =============================================================================

#[derive(Default)]
pub struct MockSource {
    pub pages: Mutex<HashMap<String, VecDeque<TransactionsPage>>>,
    /// Cursor passed on each fetch, for asserting reset behavior
    pub cursors: Mutex<Vec<Option<String>>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_page(&self, address: &str, page: TransactionsPage) {
        self.pages
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push_back(page);
    }
}

#[async_trait]
impl TransactionSource for MockSource {
    async fn fetch_transactions(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, ChainError> {
        self.cursors
            .lock()
            .unwrap()
            .push(cursor.map(|c| c.to_string()));
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub struct RegistryFixture {
    pub context: Arc<NetworkContext>,
    pub chain: Arc<MockChain>,
    pub discovery: Arc<MockDiscovery>,
    pub store: Arc<WalletStore>,
    pub registry: Arc<MultisigRegistry>,
    data_dir: tempfile::TempDir,
}

impl RegistryFixture {
    /// Raw persisted bytes for a key under the current network.
    pub async fn store_bytes(&self, key: &str) -> Vec<u8> {
        let network_id = self.context.network_id().await;
        std::fs::read(
            self.data_dir
                .path()
                .join(format!("{}.{}.json", key, network_id)),
        )
        .unwrap()
    }
}

pub async fn registry_fixture(local_accounts: Vec<LocalAccount>) -> RegistryFixture {
    let data_dir = tempfile::tempdir().unwrap();
    let context = Arc::new(NetworkContext::new("ae_mainnet"));
    let chain = MockChain::new();
    let discovery = MockDiscovery::new();
    let store = Arc::new(
        WalletStore::new(StoreConfig {
            data_dir: data_dir.path().to_path_buf(),
        })
        .unwrap(),
    );
    let registry = Arc::new(MultisigRegistry::new(
        Arc::clone(&context),
        chain.clone() as Arc<dyn ChainClient>,
        discovery.clone() as Arc<dyn DiscoveryClient>,
        Arc::clone(&store),
        local_accounts,
    ));
    RegistryFixture {
        context,
        chain,
        discovery,
        store,
        registry,
        data_dir,
    }
}

pub struct LedgerFixture {
    pub context: Arc<NetworkContext>,
    pub chain: Arc<MockChain>,
    pub source: Arc<MockSource>,
    pub store: Arc<WalletStore>,
    pub ledger: Arc<TransactionLedger>,
    _data_dir: tempfile::TempDir,
}

/// Registry and ledger wired over one shared context and store, for tests
/// exercising cross-component flows.
pub struct StackFixture {
    pub context: Arc<NetworkContext>,
    pub chain: Arc<MockChain>,
    pub discovery: Arc<MockDiscovery>,
    pub source: Arc<MockSource>,
    pub store: Arc<WalletStore>,
    pub registry: Arc<MultisigRegistry>,
    pub ledger: Arc<TransactionLedger>,
    _data_dir: tempfile::TempDir,
}

pub async fn stack_fixture(local_accounts: Vec<LocalAccount>) -> StackFixture {
    let data_dir = tempfile::tempdir().unwrap();
    let context = Arc::new(NetworkContext::new("ae_mainnet"));
    let chain = MockChain::new();
    let discovery = MockDiscovery::new();
    let source = MockSource::new();
    let store = Arc::new(
        WalletStore::new(StoreConfig {
            data_dir: data_dir.path().to_path_buf(),
        })
        .unwrap(),
    );
    let registry = Arc::new(MultisigRegistry::new(
        Arc::clone(&context),
        chain.clone() as Arc<dyn ChainClient>,
        discovery.clone() as Arc<dyn DiscoveryClient>,
        Arc::clone(&store),
        local_accounts.clone(),
    ));
    let ledger = Arc::new(TransactionLedger::new(
        Arc::clone(&context),
        chain.clone() as Arc<dyn ChainClient>,
        Arc::clone(&store),
        local_accounts,
        vec![crate::chain::ProtocolAdapter::new(
            Protocol::Aeternity,
            source.clone() as Arc<dyn TransactionSource>,
        )],
    ));
    ledger.attach_registry(Arc::clone(&registry));
    StackFixture {
        context,
        chain,
        discovery,
        source,
        store,
        registry,
        ledger,
        _data_dir: data_dir,
    }
}

pub async fn ledger_fixture(local_accounts: Vec<LocalAccount>) -> LedgerFixture {
    let data_dir = tempfile::tempdir().unwrap();
    let context = Arc::new(NetworkContext::new("ae_mainnet"));
    let chain = MockChain::new();
    let source = MockSource::new();
    let store = Arc::new(
        WalletStore::new(StoreConfig {
            data_dir: data_dir.path().to_path_buf(),
        })
        .unwrap(),
    );
    let ledger = Arc::new(TransactionLedger::new(
        Arc::clone(&context),
        chain.clone() as Arc<dyn ChainClient>,
        Arc::clone(&store),
        local_accounts,
        vec![crate::chain::ProtocolAdapter::new(
            Protocol::Aeternity,
            source.clone() as Arc<dyn TransactionSource>,
        )],
    ));
    LedgerFixture {
        context,
        chain,
        source,
        store,
        ledger,
        _data_dir: data_dir,
    }
}
