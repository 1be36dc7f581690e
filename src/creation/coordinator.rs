//! Creation protocol state machine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use secp256k1::Secp256k1;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::chain::{
    AttachTxParams, ChainClient, ChainError, TxTag, DEFAULT_WAITING_HEIGHT,
    SIMPLE_MULTISIG_ARTIFACT,
};
use crate::model::{MultisigAccount, PendingMultisigCreation, SUPPORTED_CONTRACT_VERSION};
use crate::registry::{MultisigRegistry, RegistryError};

/// Cadence of the final wait for the account to show up among the registry's
/// confirmed accounts
const ACCESSIBLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on accessible-wait polls. The wait used to be unbounded,
/// which is a hang when discovery never indexes the contract.
const ACCESSIBLE_POLL_ATTEMPTS: u32 = 60;

/// Phases of the creation protocol, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPhase {
    Idle,
    /// Attach transaction built and signed with the ephemeral key
    Prepared,
    /// Sponsor transaction signed by the payer
    Signed,
    /// Raw transaction broadcast to the chain
    Submitted,
    /// Inclusion observed
    Deployed,
    /// Account materialized and registered as pending
    Created,
    /// Registry reports the account among confirmed accounts (terminal)
    Accessible,
}

/// Creation errors. All of these are terminal for the attempt; nothing is
/// retried automatically.
#[derive(Error, Debug)]
pub enum CreationError {
    #[error("confirmations required ({required}) exceeds signer count ({signers})")]
    InvalidConfiguration { required: u32, signers: usize },
    #[error("no pending creation for account {0}, prepare the attach transaction first")]
    AccountNotFound(String),
    #[error("no raw transaction for account {0}, prepare the payment first")]
    MissingRawTransaction(String),
    #[error("signed transaction does not have the sponsor-wraps-attach shape")]
    TransactionBuildFailed,
    #[error("creation transaction not included within {0} blocks")]
    DeploymentTimeout(u64),
    #[error("account not visible in registry after {0} polls")]
    AccessibleTimeout(u32),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Default)]
struct CoordinatorState {
    phase: Option<CreationPhase>,
    pending: HashMap<String, PendingMultisigCreation>,
    creation_fee: u128,
    insufficient_balance: bool,
    account: Option<MultisigAccount>,
}

/// Drives the two-phase multisig account creation protocol.
pub struct MultisigCreationCoordinator {
    chain: Arc<dyn ChainClient>,
    registry: Arc<MultisigRegistry>,
    state: RwLock<CoordinatorState>,
}

impl MultisigCreationCoordinator {
    pub fn new(chain: Arc<dyn ChainClient>, registry: Arc<MultisigRegistry>) -> Self {
        Self {
            chain,
            registry,
            state: RwLock::new(CoordinatorState::default()),
        }
    }

    pub async fn phase(&self) -> CreationPhase {
        self.state.read().await.phase.unwrap_or(CreationPhase::Idle)
    }

    /// Combined outer + inner fee of the creation transaction, in base units.
    pub async fn creation_fee(&self) -> u128 {
        self.state.read().await.creation_fee
    }

    /// Whether the payer's balance was below the computed fee.
    pub async fn insufficient_balance(&self) -> bool {
        self.state.read().await.insufficient_balance
    }

    pub async fn account(&self) -> Option<MultisigAccount> {
        self.state.read().await.account.clone()
    }

    pub async fn is_created(&self) -> bool {
        let state = self.state.read().await;
        state.account.is_some() && state.phase == Some(CreationPhase::Created)
    }

    pub async fn is_accessible(&self) -> bool {
        let state = self.state.read().await;
        state.account.is_some() && state.phase == Some(CreationPhase::Accessible)
    }

    /// First phase: generate an ephemeral account, build the contract init
    /// call data, estimate deployment gas via dry-run and sign the attach
    /// transaction with the ephemeral key. Returns the ephemeral address.
    pub async fn prepare_attach(
        &self,
        confirmations_required: u32,
        signer_addresses: &[String],
    ) -> Result<String, CreationError> {
        if confirmations_required as usize > signer_addresses.len() {
            return Err(CreationError::InvalidConfiguration {
                required: confirmations_required,
                signers: signer_addresses.len(),
            });
        }

        let args = vec![json!(confirmations_required), json!(signer_addresses)];
        let (address, secret_key) = ephemeral_account();

        let call_data = self
            .chain
            .encode_call_data(&SIMPLE_MULTISIG_ARTIFACT, "init", &args)?;
        let gas_limit = self
            .chain
            .estimate_init_gas(&SIMPLE_MULTISIG_ARTIFACT, &args, &address)
            .await?;
        let attach_tx = self
            .chain
            .build_attach_tx(AttachTxParams {
                owner_id: address.clone(),
                code: SIMPLE_MULTISIG_ARTIFACT.bytecode.to_vec(),
                call_data: call_data.clone(),
                auth_fun: auth_fun_digest(),
                gas_limit,
                // First transaction of a fresh account
                nonce: 1,
            })
            .await?;
        let signed_attach_tx = self.chain.sign_with_ephemeral(&secret_key, &attach_tx).await?;

        let mut state = self.state.write().await;
        state.pending.insert(
            address.clone(),
            PendingMultisigCreation {
                encoded_call_data: Some(call_data),
                signed_attach_tx: Some(signed_attach_tx),
                raw_tx: None,
            },
        );
        state.phase = Some(CreationPhase::Prepared);
        log::debug!("Prepared attach transaction for {}", address);
        Ok(address)
    }

    /// Second phase: wrap the signed attach transaction in a fee-sponsoring
    /// transaction signed by the payer, and decode the combined fee from the
    /// result. Returns the fee in base units.
    pub async fn prepare_payment(
        &self,
        payer_id: &str,
        temp_address: &str,
    ) -> Result<u128, CreationError> {
        let signed_attach_tx = {
            let state = self.state.read().await;
            state
                .pending
                .get(temp_address)
                .and_then(|pending| pending.signed_attach_tx.clone())
                .ok_or_else(|| CreationError::AccountNotFound(temp_address.to_string()))?
        };

        let sponsor_tx = self
            .chain
            .build_sponsor_tx(payer_id, &signed_attach_tx)
            .await?;
        let raw_tx = self.chain.sign(payer_id, &sponsor_tx).await?;

        let envelope = self.chain.unpack(&raw_tx)?;
        let fee = sponsor_fee(&envelope)?;
        let payer_balance = self.chain.balance(payer_id).await?;

        let mut state = self.state.write().await;
        if let Some(pending) = state.pending.get_mut(temp_address) {
            pending.raw_tx = Some(raw_tx);
        }
        state.creation_fee = fee;
        state.insufficient_balance = payer_balance < fee;
        state.phase = Some(CreationPhase::Signed);
        log::debug!(
            "Prepared sponsor transaction for {} (fee {}, payer balance {})",
            temp_address,
            fee,
            payer_balance
        );
        Ok(fee)
    }

    /// Final phase: broadcast the raw transaction, wait for inclusion, read
    /// the deployed account and register it with the registry as pending,
    /// then wait (bounded) until discovery confirms it.
    pub async fn deploy(
        &self,
        temp_address: &str,
        confirmations_required: u32,
        signers: &[String],
    ) -> Result<MultisigAccount, CreationError> {
        let raw_tx = {
            let state = self.state.read().await;
            let pending = state
                .pending
                .get(temp_address)
                .ok_or_else(|| CreationError::AccountNotFound(temp_address.to_string()))?;
            pending
                .raw_tx
                .clone()
                .ok_or_else(|| CreationError::MissingRawTransaction(temp_address.to_string()))?
        };

        let tx_hash = self.chain.broadcast(&raw_tx).await?;
        self.set_phase(CreationPhase::Submitted).await;

        self.chain
            .wait_for_inclusion(&tx_hash, DEFAULT_WAITING_HEIGHT)
            .await
            .map_err(|error| match error {
                ChainError::InclusionTimeout { blocks, .. } => {
                    CreationError::DeploymentTimeout(blocks)
                }
                other => CreationError::Chain(other),
            })?;
        self.set_phase(CreationPhase::Deployed).await;

        let chain_account = self.chain.account(temp_address).await?;
        let contract_id = chain_account.contract_id.ok_or_else(|| {
            CreationError::Chain(ChainError::Rpc(format!(
                "deployed account {} has no contract",
                temp_address
            )))
        })?;

        let now = Utc::now();
        let account = MultisigAccount {
            ga_account_id: temp_address.to_string(),
            contract_id: contract_id.clone(),
            signers: signers.to_vec(),
            confirmations_required,
            confirmed_by: vec![],
            refused_by: vec![],
            proposed_by: String::new(),
            // Default for a freshly created account
            nonce: 1,
            balance: chain_account.balance,
            has_pending_transaction: false,
            tx_hash: None,
            expiration_height: 0,
            expired: false,
            version: SUPPORTED_CONTRACT_VERSION,
            created_at: now,
            updated_at: now,
            pending: true,
        };

        {
            let mut state = self.state.write().await;
            state.pending.remove(temp_address);
            state.account = Some(account.clone());
            state.phase = Some(CreationPhase::Created);
        }
        self.registry.add_pending_account(account.clone()).await?;
        log::info!("Multisig account {} deployed as {}", temp_address, contract_id);

        for _ in 0..ACCESSIBLE_POLL_ATTEMPTS {
            if self
                .registry
                .confirmed_by_contract_id(&contract_id)
                .await
                .is_some()
            {
                self.set_phase(CreationPhase::Accessible).await;
                return Ok(account);
            }
            tokio::time::sleep(ACCESSIBLE_POLL_INTERVAL).await;
        }
        Err(CreationError::AccessibleTimeout(ACCESSIBLE_POLL_ATTEMPTS))
    }

    async fn set_phase(&self, phase: CreationPhase) {
        self.state.write().await.phase = Some(phase);
    }
}

/// Validate the sponsor-wraps-attach shape and return the combined
/// outer + inner fee.
fn sponsor_fee(envelope: &crate::chain::TxEnvelope) -> Result<u128, CreationError> {
    let paying_for = envelope
        .inner()
        .filter(|_| envelope.tag == TxTag::SignedTx)
        .filter(|inner| inner.tag == TxTag::PayingForTx)
        .ok_or(CreationError::TransactionBuildFailed)?;
    let attach = paying_for
        .inner()
        .filter(|inner| inner.tag == TxTag::GaAttachTx)
        .ok_or(CreationError::TransactionBuildFailed)?;
    Ok(paying_for.fee + attach.fee)
}

/// Digest identifying the contract's authorization entrypoint.
fn auth_fun_digest() -> [u8; 32] {
    Sha256::digest(b"authorize").into()
}

/// Generate a one-off key pair and render its account address.
fn ephemeral_account() -> (String, [u8; 32]) {
    let secp = Secp256k1::new();
    let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);

    // Address = "ak_" + Base58Check(pubkey)
    let payload = public_key.serialize();
    let checksum = {
        let first = Sha256::digest(payload);
        let second = Sha256::digest(first);
        second[..4].to_vec()
    };
    let mut bytes = payload.to_vec();
    bytes.extend_from_slice(&checksum);
    let address = format!("ak_{}", bs58::encode(bytes).into_string());

    (address, secret_key.secret_bytes())
}
