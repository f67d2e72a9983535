// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Address allocation.
//!
//! New main addresses are refused once the last `max_main_address_gap` main
//! addresses have all gone unused, so a client cannot derive an unbounded run
//! of empty addresses that a later scan would never reach.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

use super::WalletService;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::{Address, NotificationType, Wallet};

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressOpts {
    /// Skip the main address gap check.
    #[serde(default)]
    pub ignore_max_gap: bool,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct MainAddressesOpts {
    #[serde(default)]
    pub limit: Option<usize>,
    /// Newest first.
    #[serde(default)]
    pub reverse: bool,
}

impl WalletService {
    pub async fn create_address(&self, opts: AddressOpts) -> ServiceResult<Address> {
        let wait = self.ctx.config.policy.lock_wait_create;
        let (wallet, address, created) = self
            .run_locked_with(wait, async {
                let mut wallet = self.get_wallet().await?;
                if !wallet.is_complete() {
                    return Err(ServiceError::client(ErrorCode::WalletNotComplete));
                }
                if wallet.is_scan_error() {
                    return Err(ServiceError::client(ErrorCode::WalletNeedScan));
                }

                if wallet.single_address {
                    let existing = self.ctx.storage.fetch_addresses(&wallet.id).await?;
                    if let Some(first) = existing.into_iter().next() {
                        return Ok((wallet, first, false));
                    }
                } else if !self.can_create_address(&wallet, opts.ignore_max_gap).await? {
                    return Err(ServiceError::client(ErrorCode::MainAddressGapReached));
                }

                let prefix = self.chain(&wallet.coin)?.address_prefix(&wallet.network);
                let address = wallet.create_address(prefix, false, 1)?;
                self.ctx
                    .storage
                    .store_address_and_wallet(&wallet, std::slice::from_ref(&address))
                    .await?;
                Ok((wallet, address, true))
            })
            .await?;

        if created {
            debug!(wallet_id = %wallet.id, address = %address.address, path = %address.path, "Address created");
            self.register_new_addresses(&wallet, std::slice::from_ref(&address)).await;
            self.notify(NotificationType::NewAddress, json!({ "address": address.address }), false)
                .await;
        }
        Ok(address)
    }

    pub async fn get_main_addresses(&self, opts: &MainAddressesOpts) -> ServiceResult<Vec<Address>> {
        let mut addresses: Vec<Address> = self
            .ctx
            .storage
            .fetch_addresses(self.wallet_id()?)
            .await?
            .into_iter()
            .filter(|a| !a.is_change)
            .collect();
        if opts.reverse {
            addresses.reverse();
        }
        if let Some(limit) = opts.limit {
            addresses.truncate(limit);
        }
        Ok(addresses)
    }

    /// Whether another main address may be derived.
    ///
    /// Activity found on-chain is recorded on the address (sticky flag) so
    /// later checks do not ask the explorer again.
    async fn can_create_address(&self, wallet: &Wallet, ignore_max_gap: bool) -> ServiceResult<bool> {
        if ignore_max_gap {
            return Ok(true);
        }
        let gap = self.ctx.config.policy.max_main_address_gap;
        let main: Vec<Address> = self
            .ctx
            .storage
            .fetch_addresses(&wallet.id)
            .await?
            .into_iter()
            .filter(|a| !a.is_change)
            .collect();
        let latest = &main[main.len().saturating_sub(gap)..];
        if latest.len() < gap || latest.iter().any(|a| a.has_activity) {
            return Ok(true);
        }

        let explorer = self.explorer_for(wallet)?;
        for address in latest.iter().rev() {
            if explorer.get_address_activity(&address.address).await? {
                let mut used = address.clone();
                used.has_activity = true;
                self.ctx.storage.store_address(&used).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Push freshly stored addresses to the explorer when the wallet is
    /// registered there. Failures leave the addresses unsynced for the next
    /// wallet sync.
    pub(crate) async fn register_new_addresses(&self, wallet: &Wallet, addresses: &[Address]) {
        if !wallet.be_registered || addresses.is_empty() {
            return;
        }
        let Ok(explorer) = self.explorer_for(wallet) else {
            return;
        };
        let strs: Vec<String> = addresses.iter().map(|a| a.address.clone()).collect();
        match explorer.add_addresses(wallet, &strs).await {
            Ok(()) => {
                if let Err(e) = self.ctx.storage.mark_synced_addresses(&wallet.id, &strs).await {
                    warn!(wallet_id = %wallet.id, error = %e, "Failed to mark addresses synced");
                }
            }
            Err(e) => warn!(wallet_id = %wallet.id, error = %e, "Failed to register addresses with explorer"),
        }
    }
}
