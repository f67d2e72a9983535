// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Explorer Sync Engine
//!
//! Keeps the explorer's view of a wallet (registration and address set) in
//! line with storage, and rebuilds the address set from on-chain activity.
//!
//! ## Sync
//!
//! 1. Register the wallet if the explorer does not know it yet.
//! 2. Cheap check: the number of addresses already verified (wallet cache)
//!    equals the wallet's address count. If so, and the wallet was not just
//!    registered, nothing to do.
//! 3. Push unsynced addresses.
//! 4. Full check: the address checksum in storage equals the explorer's. On
//!    mismatch, deregister and sync once more; a second mismatch is logged
//!    and accepted.
//!
//! ## Scan
//!
//! Coarse-to-fine: each pass derives addresses `step` indexes apart until
//! `gap` consecutive inactive ones are seen, then rewinds past them. Passes
//! run with steps `starting_step, starting_step / 10, …` and always end
//! with a step of 1.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::WalletService;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::{Address, NotificationType, ScanStatus, Wallet};

const SYNC_CACHE: &str = "sync";
const ADDRESSES_CHECKED: &str = "addressesChecked";
const DEFAULT_STARTING_STEP: u32 = 1000;
/// Gap used while stepping over more than one index.
const COARSE_SCAN_GAP: usize = 3;
const MAX_RESYNCS: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanOpts {
    /// Estimated magnitude of the address count.
    #[serde(default)]
    pub starting_step: Option<u32>,
}

impl WalletService {
    /// Register the wallet with its explorer. Returns whether it was
    /// registered by this call.
    pub(crate) async fn register_wallet(&self, wallet: &Wallet) -> ServiceResult<bool> {
        let stored = self
            .ctx
            .storage
            .fetch_wallet(&wallet.id)
            .await?
            .ok_or_else(|| ServiceError::client(ErrorCode::WalletNotFound))?;
        if stored.be_registered {
            return Ok(false);
        }
        self.explorer_for(&stored)?.register(&stored).await?;

        // Flip the flag in place: the wallet may have gained addresses while
        // the explorer call was in flight.
        if !self.ctx.storage.mark_wallet_registered(&stored.id).await? {
            return Err(ServiceError::client(ErrorCode::WalletNotFound));
        }
        info!(wallet_id = %stored.id, "Wallet registered with explorer");
        Ok(true)
    }

    /// Whether the explorer's address set matches storage.
    ///
    /// A simple check only consults the cached verified count. A full check
    /// compares checksums; explorers without checksum support pass.
    pub(crate) async fn check_wallet_sync(&self, wallet: &Wallet, simple: bool) -> ServiceResult<bool> {
        let total = wallet.total_addresses();
        let checked = self
            .ctx
            .storage
            .get_wallet_cache(&wallet.id, SYNC_CACHE, ADDRESSES_CHECKED)
            .await?
            .and_then(|v| v.as_u64());
        if checked == Some(u64::from(total)) {
            return Ok(true);
        }
        if simple {
            return Ok(false);
        }

        let local = self.ctx.storage.wallet_check(&wallet.id).await?;
        let remote = match self.explorer_for(wallet)?.get_check_data(wallet).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(wallet_id = %wallet.id, error = %e, "Explorer wallet check unavailable, ignoring");
                return Ok(true);
            }
        };
        if remote.sum != local.sum {
            warn!(wallet_id = %wallet.id, local = local.sum, remote = remote.sum, "Wallet check failed");
            return Ok(false);
        }

        debug!(wallet_id = %wallet.id, total, "Wallet sync check OK");
        self.ctx
            .storage
            .store_wallet_cache(&wallet.id, SYNC_CACHE, ADDRESSES_CHECKED, &Value::from(total))
            .await?;
        Ok(true)
    }

    pub(crate) async fn sync_wallet(&self, wallet: &Wallet, skip_check: bool) -> ServiceResult<()> {
        let mut attempt = 0;
        loop {
            let just_registered = self.register_wallet(wallet).await?;
            if self.check_wallet_sync(wallet, true).await? && !just_registered {
                return Ok(());
            }

            let explorer = self.explorer_for(wallet)?;
            let unsynced = self.ctx.storage.fetch_unsync_addresses(&wallet.id).await?;
            if !unsynced.is_empty() {
                let strs: Vec<String> = unsynced.into_iter().map(|a| a.address).collect();
                debug!(wallet_id = %wallet.id, count = strs.len(), "Syncing addresses");
                explorer.add_addresses(wallet, &strs).await?;
                self.ctx.storage.mark_synced_addresses(&wallet.id, &strs).await?;
            }

            if skip_check || self.check_wallet_sync(wallet, false).await? {
                return Ok(());
            }
            if attempt >= MAX_RESYNCS {
                warn!(wallet_id = %wallet.id, "Wallet still out of sync after resync, giving up");
                return Ok(());
            }
            attempt += 1;
            info!(wallet_id = %wallet.id, attempt, "Resyncing wallet");
            self.ctx.storage.deregister_wallet(&wallet.id).await?;
        }
    }

    // =========================================================================
    // Scan
    // =========================================================================

    /// Rebuild the wallet's address set from on-chain activity.
    pub async fn scan(&self, opts: &ScanOpts) -> ServiceResult<()> {
        let wallet = self.get_wallet().await?;
        if !wallet.is_complete() {
            return Err(ServiceError::client(ErrorCode::WalletNotComplete));
        }
        self.ctx.storage.clear_wallet_cache(&wallet.id).await?;
        if wallet.single_address || !self.chain(&wallet.coin)?.is_utxo_coin() {
            return Ok(());
        }

        let starting_step = opts.starting_step.unwrap_or(DEFAULT_STARTING_STEP).max(1);
        self.run_locked(async {
            let mut wallet = self.get_wallet().await?;
            wallet.scan_status = Some(ScanStatus::Running);
            self.ctx.storage.store_wallet(&wallet).await?;

            let result = self.run_scan_passes(&mut wallet, starting_step).await;

            let mut stored = self.get_wallet().await?;
            stored.scan_status = Some(if result.is_ok() {
                ScanStatus::Success
            } else {
                ScanStatus::Error
            });
            self.ctx.storage.store_wallet(&stored).await?;
            result
        })
        .await
    }

    async fn run_scan_passes(&self, wallet: &mut Wallet, starting_step: u32) -> ServiceResult<()> {
        let mut step = starting_step;
        loop {
            for is_change in [false, true] {
                self.scan_branch(wallet, is_change, step).await?;
            }
            if step == 1 {
                return Ok(());
            }
            step = (step / 10).max(1);
        }
    }

    async fn scan_branch(&self, wallet: &mut Wallet, is_change: bool, step: u32) -> ServiceResult<()> {
        let explorer = self.explorer_for(wallet)?;
        let prefix = self.chain(&wallet.coin)?.address_prefix(&wallet.network);
        let mut gap = self.ctx.config.policy.scan_address_gap;
        if step > 1 {
            gap = gap.min(COARSE_SCAN_GAP);
        }

        let mut derived: Vec<Address> = Vec::new();
        let mut inactive = 0;
        while inactive < gap {
            let address = wallet.create_address(prefix, is_change, step)?;
            let active = explorer.get_address_activity(&address.address).await?;
            inactive = if active { 0 } else { inactive + 1 };
            derived.push(address);
        }
        wallet.address_manager.rewind(is_change, step, gap as u32);
        derived.truncate(derived.len() - gap);

        if step > 1 {
            while let Some(skipped) = wallet.next_skipped_address(prefix)? {
                derived.push(skipped);
            }
        }

        debug!(wallet_id = %wallet.id, is_change, step, found = derived.len(), "Scanned branch");
        self.ctx.storage.store_address_and_wallet(wallet, &derived).await?;
        Ok(())
    }

    /// Deregister the wallet and scan in the background. Completion is
    /// reported with a `ScanFinished` notification.
    pub async fn start_scan(&self, opts: ScanOpts) -> ServiceResult<Value> {
        let wallet = self.get_wallet().await?;
        if !wallet.is_complete() {
            return Err(ServiceError::client(ErrorCode::WalletNotComplete));
        }
        if wallet.single_address || !self.chain(&wallet.coin)?.is_utxo_coin() {
            return Ok(json!({ "started": false }));
        }

        let service = WalletService::bound(self.ctx.clone(), &wallet.id, self.copayer_id()?);
        tokio::spawn(async move {
            let result = match service.ctx.storage.deregister_wallet(&wallet.id).await {
                Ok(()) => service.scan(&opts).await,
                Err(e) => Err(e.into()),
            };
            let data = match &result {
                Ok(()) => json!({ "result": "success" }),
                Err(e) => {
                    warn!(wallet_id = %wallet.id, error = %e, "Scan failed");
                    json!({ "result": "error", "error": e.to_string() })
                }
            };
            service.notify(NotificationType::ScanFinished, data, true).await;
        });

        Ok(json!({ "started": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AddressOpts;
    use crate::testing::{setup_wallet, test_context};
    use std::time::Duration;

    async fn derive(service: &WalletService, path: &str, is_change: bool) -> String {
        let wallet = service.get_wallet().await.unwrap();
        wallet.derive_address("bc1q", path, is_change).unwrap().address
    }

    #[tokio::test]
    async fn sync_registers_and_pushes_addresses() {
        let (_dir, ctx, explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);
        let address = service.create_address(AddressOpts::default()).await.unwrap();

        let wallet = service.get_wallet().await.unwrap();
        assert!(!wallet.be_registered);
        service.sync_wallet(&wallet, false).await.unwrap();

        let wallet = service.get_wallet().await.unwrap();
        assert!(wallet.be_registered);
        assert_eq!(explorer.registrations(), 1);
        assert_eq!(explorer.added_addresses(), vec![address.address.clone()]);
        assert!(ctx.storage.fetch_unsync_addresses(&wallet.id).await.unwrap().is_empty());

        // Already registered.
        service.sync_wallet(&wallet, false).await.unwrap();
        assert_eq!(explorer.registrations(), 1);
    }

    #[tokio::test]
    async fn registration_keeps_addresses_created_meanwhile() {
        let (_dir, ctx, explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);
        explorer.set_register_delay(Duration::from_millis(200));

        let wallet = service.get_wallet().await.unwrap();
        let (registered, created) = tokio::join!(service.register_wallet(&wallet), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            service.create_address(AddressOpts::default()).await
        });
        assert!(registered.unwrap());
        assert_eq!(created.unwrap().path, "m/0/0");

        let wallet = service.get_wallet().await.unwrap();
        assert!(wallet.be_registered);
        assert_eq!(wallet.address_manager.receive_index, 1);

        explorer.set_register_delay(Duration::ZERO);
        let next = service.create_address(AddressOpts::default()).await.unwrap();
        assert_eq!(next.path, "m/0/1");
    }

    #[tokio::test]
    async fn sync_mismatch_resyncs_once() {
        let (_dir, ctx, explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);
        service.create_address(AddressOpts::default()).await.unwrap();
        explorer.set_check_sum(Some(12345));

        let wallet = service.get_wallet().await.unwrap();
        service.sync_wallet(&wallet, false).await.unwrap();
        assert_eq!(explorer.registrations(), 2);
        assert_eq!(explorer.added_addresses().len(), 2);
    }

    #[tokio::test]
    async fn scan_recovers_used_addresses() {
        let (_dir, ctx, explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);

        explorer.set_active(&derive(&service, "m/0/5", false).await);
        explorer.set_active(&derive(&service, "m/1/2", true).await);

        service
            .scan(&ScanOpts {
                starting_step: Some(10),
            })
            .await
            .unwrap();

        let wallet = service.get_wallet().await.unwrap();
        assert_eq!(wallet.scan_status, Some(ScanStatus::Success));
        assert_eq!(wallet.address_manager.receive_index, 6);
        assert_eq!(wallet.address_manager.change_index, 3);
        assert!(wallet.address_manager.skipped_paths.is_empty());

        let stored = ctx.storage.fetch_addresses(&wallet.id).await.unwrap();
        assert_eq!(stored.len(), 9);
        assert!(stored.iter().any(|a| a.path == "m/0/5"));
    }

    #[tokio::test]
    async fn start_scan_reports_completion() {
        let (_dir, ctx, _explorer) = test_context();
        let (wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "btc").await;
        let service = copayers[0].service(&ctx);
        let mut live = ctx.notifier.subscribe();

        let started = service
            .start_scan(ScanOpts {
                starting_step: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(started, json!({ "started": true }));

        let finished = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let n = live.recv().await.unwrap();
                if n.notification_type == NotificationType::ScanFinished {
                    return n;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(finished.wallet_id, wallet_id);
        assert_eq!(finished.data["result"], "success");
        assert!(finished.creator_id.is_none());
    }

    #[tokio::test]
    async fn single_address_wallets_are_not_scanned() {
        let (_dir, ctx, _explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "eth").await;
        let service = copayers[0].service(&ctx);
        service.scan(&ScanOpts::default()).await.unwrap();
        assert!(service.get_wallet().await.unwrap().scan_status.is_none());
        let started = service.start_scan(ScanOpts::default()).await.unwrap();
        assert_eq!(started, json!({ "started": false }));
    }
}
