//! Sync orchestration
//!
//! Ties the registry and ledger to their refresh triggers: a polling loop
//! gated on observer refcounts, a debounced balance watcher and the network
//! switch sequence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::chain::NetworkContext;
use crate::ledger::{LedgerError, TransactionLedger, BALANCE_TRIGGER_DEBOUNCE};
use crate::registry::{MultisigRegistry, RegistryError, MULTISIG_REFRESH_INTERVAL};
use crate::scheduler::task::{Debouncer, PollTask};

/// How the registry poll behaves once the first observer arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Poll the registry on an interval while observed
    Continuous,
    /// Refresh once when first observed, then stay idle
    Once,
    /// Never refresh on observation
    Disabled,
}

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Keeps the registry and ledger fresh while anyone is looking at them.
///
/// Consumers register interest through [`SyncScheduler::observe`]; polling
/// runs while at least one [`ObserverGuard`] is alive and stops when the
/// last one drops.
pub struct SyncScheduler {
    context: Arc<NetworkContext>,
    registry: Arc<MultisigRegistry>,
    ledger: Arc<TransactionLedger>,
    mode: RefreshMode,
    registry_task: PollTask,
    balance_debounce: Debouncer,
    observers: AtomicUsize,
    last_total_balance: Mutex<Option<u128>>,
    token_snapshot: Mutex<Option<Value>>,
}

/// Keeps the scheduler's polling alive. Dropping the last guard stops it.
pub struct ObserverGuard {
    scheduler: Arc<SyncScheduler>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if self.scheduler.observers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.scheduler.registry_task.stop();
            self.scheduler.balance_debounce.cancel();
        }
    }
}

impl SyncScheduler {
    pub fn new(
        context: Arc<NetworkContext>,
        registry: Arc<MultisigRegistry>,
        ledger: Arc<TransactionLedger>,
        mode: RefreshMode,
    ) -> Arc<Self> {
        let registry_task = PollTask::new(
            "multisig-refresh",
            MULTISIG_REFRESH_INTERVAL,
            registry_refresh_task(Arc::clone(&registry)),
        );
        let balance_debounce = Debouncer::new(
            BALANCE_TRIGGER_DEBOUNCE,
            ledger_refresh_task(Arc::clone(&ledger)),
        );
        Arc::new(Self {
            context,
            registry,
            ledger,
            mode,
            registry_task,
            balance_debounce,
            observers: AtomicUsize::new(0),
            last_total_balance: Mutex::new(None),
            token_snapshot: Mutex::new(None),
        })
    }

    /// Register interest in fresh data. The first observer starts the
    /// refresh behavior selected by the mode.
    pub fn observe(self: Arc<Self>) -> ObserverGuard {
        if self.observers.fetch_add(1, Ordering::SeqCst) == 0 {
            match self.mode {
                RefreshMode::Continuous => self.registry_task.start(),
                RefreshMode::Once => {
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        // The one-shot mode only fills an empty cache.
                        if registry.has_cached_accounts().await {
                            return;
                        }
                        if let Err(error) = registry.refresh().await {
                            log::warn!("One-shot multisig refresh failed: {}", error);
                        }
                    });
                }
                RefreshMode::Disabled => {}
            }
        }
        ObserverGuard { scheduler: self }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self) -> bool {
        self.registry_task.is_running()
    }

    /// Note a change of the wallet's total coin balance. Any balance
    /// movement implies transactions to pick up, so a full newest-page
    /// refresh is scheduled, debounced to coalesce bursts.
    pub fn balance_changed(&self, total: u128) {
        let mut last = self
            .last_total_balance
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *last == Some(total) {
            return;
        }
        *last = Some(total);
        self.balance_debounce.trigger();
    }

    /// Note a new token-balance snapshot. Refreshes immediately, but only
    /// when the snapshot actually differs from the previous one.
    pub async fn token_balances_changed(&self, snapshot: Value) {
        {
            let mut previous = self
                .token_snapshot
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if previous.as_ref() == Some(&snapshot) {
                return;
            }
            *previous = Some(snapshot);
        }
        self.ledger.refresh_all().await;
    }

    /// Switch the active network. Cancels pending triggers, reloads both
    /// components for the new network and restarts polling when observed.
    pub async fn network_changed(&self, network_id: &str) -> Result<(), SchedulerError> {
        if self.context.network_id().await == network_id {
            return Ok(());
        }
        let previous = self.context.switch(network_id).await;

        self.balance_debounce.cancel();
        *self
            .last_total_balance
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        *self
            .token_snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;

        self.registry.handle_network_change().await?;
        Arc::clone(&self.ledger)
            .handle_network_change(&previous)
            .await?;

        if self.observer_count() > 0 && self.mode == RefreshMode::Continuous {
            self.registry_task.restart();
        }
        Ok(())
    }
}

fn registry_refresh_task(
    registry: Arc<MultisigRegistry>,
) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync {
    move || {
        let registry = Arc::clone(&registry);
        Box::pin(async move {
            if let Err(error) = registry.refresh().await {
                log::warn!("Multisig refresh failed: {}", error);
            }
        })
    }
}

fn ledger_refresh_task(
    ledger: Arc<TransactionLedger>,
) -> impl Fn() -> BoxFuture<'static, ()> + Send + Sync {
    move || {
        let ledger = Arc::clone(&ledger);
        Box::pin(async move {
            ledger.refresh_all().await;
        })
    }
}
