// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Tasks
//!
//! Periodic jobs run under a [`Supervisor`] that can start, stop and restart
//! them by name. Every job runs the same loop: `tick()`, then sleep for
//! `interval()` or exit as soon as its cancellation token fires.
//!
//! | Job | Interval | Purpose |
//! |-----|----------|---------|
//! | `orders:<kind>` | `ORDER_POLL_SECS` | Drain one order queue ([`OrderProcessor`](crate::swap::OrderProcessor)) |
//! | `chain-monitor` | `MONITOR_POLL_SECS` | Block heights, `NewBlock` and `TxConfirmation` |
//!
//! ## Shutdown
//!
//! Each task gets a child of the supervisor's root `CancellationToken`, so
//! [`Supervisor::shutdown`] cancels everything at once and then joins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::error::ServiceResult;
use crate::models::NotificationType;
use crate::service::notifications::chain_feed_id;

/// A unit of recurring work.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> String;
    fn interval(&self) -> Duration;
    async fn tick(&self) -> ServiceResult<()>;
}

// =============================================================================
// Supervisor
// =============================================================================

struct Task {
    job: Arc<dyn PeriodicJob>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    root: CancellationToken,
    tasks: Mutex<HashMap<String, Task>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn `job` unless a task with the same name is already running.
    pub fn start(&self, job: Arc<dyn PeriodicJob>) -> bool {
        let name = job.name();
        let Ok(mut tasks) = self.tasks.lock() else {
            return false;
        };
        if tasks.get(&name).is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }
        let token = self.root.child_token();
        let handle = tokio::spawn(run_job(job.clone(), token.clone()));
        tasks.insert(name, Task { job, token, handle });
        true
    }

    /// Cancel a task and wait for it to exit. Returns whether it existed.
    pub async fn stop(&self, name: &str) -> bool {
        let task = match self.tasks.lock() {
            Ok(mut tasks) => tasks.remove(name),
            Err(_) => None,
        };
        let Some(task) = task else {
            return false;
        };
        task.token.cancel();
        if let Err(e) = task.handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
        true
    }

    pub async fn restart(&self, name: &str) -> bool {
        let job = match self.tasks.lock() {
            Ok(tasks) => tasks.get(name).map(|t| t.job.clone()),
            Err(_) => None,
        };
        let Some(job) = job else {
            return false;
        };
        self.stop(name).await;
        self.start(job)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .map(|tasks| tasks.get(name).is_some_and(|t| !t.handle.is_finished()))
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .lock()
            .map(|tasks| tasks.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Cancel every task and wait for all of them.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let tasks: Vec<(String, Task)> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (name, task) in tasks {
            if let Err(e) = task.handle.await {
                warn!(task = %name, error = %e, "Background task ended abnormally");
            }
        }
        info!("Background tasks stopped");
    }
}

async fn run_job(job: Arc<dyn PeriodicJob>, shutdown: CancellationToken) {
    let name = job.name();
    info!(task = %name, interval_secs = job.interval().as_secs(), "Background task starting");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if let Err(e) = job.tick().await {
            warn!(task = %name, error = %e, "Background task tick failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(job.interval()) => {},
            _ = shutdown.cancelled() => break,
        }
    }
    info!(task = %name, "Background task shutting down");
}

// =============================================================================
// Chain monitor
// =============================================================================

/// Polls every configured chain for new blocks.
///
/// On a height change it refreshes the `blockHeight` cache, emits `NewBlock`
/// on the chain's feed, and checks active confirmation subscriptions for that
/// chain. A subscription fires once and is then deactivated.
pub struct ChainMonitor {
    ctx: Arc<AppContext>,
    heights: Mutex<HashMap<(String, String), u64>>,
}

impl ChainMonitor {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            heights: Mutex::new(HashMap::new()),
        }
    }

    fn last_height(&self, coin: &str, network: &str) -> Option<u64> {
        self.heights
            .lock()
            .ok()?
            .get(&(coin.to_string(), network.to_string()))
            .copied()
    }

    fn set_height(&self, coin: &str, network: &str, height: u64) {
        if let Ok(mut heights) = self.heights.lock() {
            heights.insert((coin.to_string(), network.to_string()), height);
        }
    }

    async fn poll_chain(&self, coin: &str, network: &str) -> ServiceResult<()> {
        let Some(explorer) = self.ctx.explorers.get(coin, network) else {
            return Ok(());
        };
        let tip = explorer.get_blockchain_height().await?;
        let previous = self.last_height(coin, network);
        if previous == Some(tip.height) {
            return Ok(());
        }

        self.set_height(coin, network, tip.height);
        self.ctx
            .storage
            .store_global_cache(&format!("blockHeight:{coin}:{network}"), &Value::from(tip.height))
            .await?;
        debug!(coin, network, height = tip.height, "New block");

        // The first observation only establishes the baseline.
        if previous.is_none() {
            return Ok(());
        }
        self.ctx
            .notifier
            .notify(
                NotificationType::NewBlock,
                &chain_feed_id(coin, network),
                None,
                json!({ "coin": coin, "network": network, "height": tip.height, "hash": tip.hash }),
            )
            .await;

        self.check_confirmations(coin, network, tip.height).await
    }

    async fn check_confirmations(&self, coin: &str, network: &str, height: u64) -> ServiceResult<()> {
        let Some(explorer) = self.ctx.explorers.get(coin, network) else {
            return Ok(());
        };
        let subs = self.ctx.storage.fetch_active_tx_confirmation_subs().await?;
        for mut sub in subs.into_iter().filter(|s| s.coin == coin && s.network == network) {
            let confirmations = match explorer.get_transaction(&sub.txid).await {
                Ok(Some(tx)) => tx.confirmations(height),
                Ok(None) => continue,
                Err(e) => {
                    warn!(txid = %sub.txid, error = %e, "Confirmation check failed");
                    continue;
                }
            };
            if confirmations == 0 {
                continue;
            }

            self.ctx
                .notifier
                .notify(
                    NotificationType::TxConfirmation,
                    &sub.wallet_id,
                    Some(&sub.copayer_id),
                    json!({ "txid": sub.txid, "coin": coin, "network": network, "confirmations": confirmations }),
                )
                .await;
            sub.is_active = false;
            self.ctx.storage.store_tx_confirmation_sub(&sub).await?;
            info!(wallet_id = %sub.wallet_id, txid = %sub.txid, "Transaction confirmed");
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicJob for ChainMonitor {
    fn name(&self) -> String {
        "chain-monitor".to_string()
    }

    fn interval(&self) -> Duration {
        self.ctx.config.policy.monitor_poll_interval
    }

    async fn tick(&self) -> ServiceResult<()> {
        for (coin, network) in self.ctx.explorers.chains() {
            if let Err(e) = self.poll_chain(&coin, &network).await {
                warn!(coin = %coin, network = %network, error = %e, "Chain poll failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NotificationQuery;
    use crate::testing::{setup_wallet, test_context};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicJob for Counter {
        fn name(&self) -> String {
            "counter".to_string()
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn tick(&self) -> ServiceResult<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn supervisor_controls_named_tasks() {
        let supervisor = Supervisor::new();
        let job = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
        });

        assert!(supervisor.start(job.clone()));
        assert!(!supervisor.start(job.clone()));
        assert!(supervisor.is_running("counter"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(job.ticks.load(Ordering::SeqCst) > 1);

        assert!(supervisor.stop("counter").await);
        assert!(!supervisor.is_running("counter"));
        assert!(!supervisor.restart("counter").await);

        assert!(supervisor.start(job.clone()));
        assert!(supervisor.restart("counter").await);
        assert!(supervisor.is_running("counter"));
        assert_eq!(supervisor.names(), vec!["counter".to_string()]);

        supervisor.shutdown().await;
        assert!(!supervisor.is_running("counter"));
    }

    #[tokio::test]
    async fn monitor_emits_blocks_and_confirmations() {
        let (_dir, ctx, explorer) = test_context();
        let (wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        copayers[0]
            .service(&ctx)
            .tx_confirmation_subscribe("abc")
            .await
            .unwrap();

        let monitor = ChainMonitor::new(ctx.clone());
        explorer.set_height(100);
        monitor.tick().await.unwrap();

        let feed = chain_feed_id("btc", "livenet");
        let blocks = ctx
            .storage
            .fetch_notifications(&feed, &NotificationQuery::default())
            .await
            .unwrap();
        assert!(blocks.is_empty());

        explorer.set_height(101);
        explorer.set_known_tx("abc", 101);
        monitor.tick().await.unwrap();

        let blocks = ctx
            .storage
            .fetch_notifications(&feed, &NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data["height"], 101);

        let wallet_feed = ctx
            .storage
            .fetch_notifications(&wallet_id, &NotificationQuery::default())
            .await
            .unwrap();
        let confirmations: Vec<_> = wallet_feed
            .iter()
            .filter(|n| n.notification_type == NotificationType::TxConfirmation)
            .collect();
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].data["txid"], "abc");
        assert!(ctx.storage.fetch_active_tx_confirmation_subs().await.unwrap().is_empty());

        // Fires once.
        explorer.set_height(102);
        monitor.tick().await.unwrap();
        let wallet_feed = ctx
            .storage
            .fetch_notifications(&wallet_id, &NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(
            wallet_feed
                .iter()
                .filter(|n| n.notification_type == NotificationType::TxConfirmation)
                .count(),
            1
        );
    }
}
