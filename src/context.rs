// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Application context.
//!
//! Everything the service layer needs lives in one [`AppContext`] shared
//! behind an `Arc`: configuration, storage, the wallet lock, chain and
//! explorer registries, the notification ticker, rates, alerts, funding
//! wallets and the background task supervisor.

use std::sync::Arc;

use tracing::info;

use crate::background::{ChainMonitor, Supervisor};
use crate::chain::ChainRegistry;
use crate::config::ServiceConfig;
use crate::crypto::CryptoError;
use crate::explorer::{ExplorerError, ExplorerRegistry};
use crate::lock::WalletLock;
use crate::models::OrderKind;
use crate::service::Notifier;
use crate::storage::{RedbStorage, Storage, StorageError};
use crate::swap::rates::RateError;
use crate::swap::{
    AlertDispatcher, AlertSink, FundingWallets, HttpRateProvider, LogAlertSink, OrderProcessor, RateProvider,
    RateService,
};

const DATABASE_FILE: &str = "wallets.redb";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("explorer: {0}")]
    Explorer(#[from] ExplorerError),

    #[error("rate provider: {0}")]
    Rates(#[from] RateError),

    #[error("funding wallet key: {0}")]
    FundingKey(#[from] CryptoError),
}

pub struct AppContext {
    pub config: ServiceConfig,
    pub storage: Arc<dyn Storage>,
    pub lock: WalletLock,
    pub chains: ChainRegistry,
    pub explorers: ExplorerRegistry,
    pub notifier: Notifier,
    pub rates: RateService,
    pub alerts: AlertDispatcher,
    pub funding: FundingWallets,
    pub supervisor: Supervisor,
}

impl AppContext {
    /// Assemble a context from already-built collaborators.
    pub fn new(
        config: ServiceConfig,
        storage: Arc<dyn Storage>,
        explorers: ExplorerRegistry,
        rate_provider: Arc<dyn RateProvider>,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Result<Self, ContextError> {
        let policy = &config.policy;
        let funding = FundingWallets::from_config(&config.swap.funding_wallets)?;
        Ok(Self {
            lock: WalletLock::new(storage.clone(), policy.lock_exe_time),
            chains: ChainRegistry::default(),
            explorers,
            notifier: Notifier::new(storage.clone()),
            rates: RateService::new(rate_provider, policy.rate_cache_ttl),
            alerts: AlertDispatcher::new(alert_sink, policy.alert_cooldown),
            funding,
            supervisor: Supervisor::new(),
            storage,
            config,
        })
    }

    /// Production wiring: redb under `data_dir`, V8 explorers, HTTP rates and
    /// log alerts.
    pub fn from_config(config: ServiceConfig) -> Result<Self, ContextError> {
        let storage = RedbStorage::open(&config.data_dir.join(DATABASE_FILE))?;
        let explorers = ExplorerRegistry::from_config(&config.explorer_url, &config.chains)?;
        let rates = HttpRateProvider::new(&config.rates_url)?;
        info!(
            data_dir = %config.data_dir.display(),
            chains = explorers.chains().len(),
            pairs = config.swap.pairs.len(),
            "Application context ready"
        );
        Self::new(
            config,
            Arc::new(storage),
            explorers,
            Arc::new(rates),
            Arc::new(LogAlertSink),
        )
    }

    /// Launch the order processors and the chain monitor.
    pub fn start(self: &Arc<Self>) {
        if self.funding.is_empty() {
            info!("No funding wallets configured, order processors disabled");
        } else {
            for kind in OrderKind::ALL {
                self.supervisor
                    .start(Arc::new(OrderProcessor::new(self.clone(), kind)));
            }
        }
        self.supervisor.start(Arc::new(ChainMonitor::new(self.clone())));
    }

    /// Stop every background task and wait for them.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
