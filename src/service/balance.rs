// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Balance and UTXO reconciliation.
//!
//! The explorer's UTXO set lags behind what the service knows: inputs of
//! pending proposals are still unspent on-chain but must not be spent again,
//! and inputs of freshly broadcast transactions may still be reported by an
//! explorer instance that has not seen the spend yet.
//!
//! | Source | Effect |
//! |--------|--------|
//! | Below dust threshold | dropped |
//! | Input of a pending/accepted proposal | kept, `locked = true` |
//! | Input of a proposal broadcast in the lookback window | dropped |

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

use super::proposals::base_params;
use super::WalletService;
use crate::chain::SendMaxInfo;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::{now_secs, TxProposal, Utxo, Wallet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressBalance {
    pub address: String,
    pub path: Option<String>,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub total_amount: u64,
    pub locked_amount: u64,
    pub total_confirmed_amount: u64,
    pub locked_confirmed_amount: u64,
    pub available_amount: u64,
    pub available_confirmed_amount: u64,
    pub by_address: Vec<AddressBalance>,
}

impl Balance {
    /// Totals over a reconciled UTXO set.
    pub fn from_utxos(utxos: &[Utxo]) -> Self {
        let sum = |f: &dyn Fn(&Utxo) -> bool| utxos.iter().filter(|u| f(u)).map(|u| u.satoshis).sum::<u64>();
        let total_amount = sum(&|_| true);
        let locked_amount = sum(&|u| u.locked);
        let total_confirmed_amount = sum(&|u| u.confirmations > 0);
        let locked_confirmed_amount = sum(&|u| u.locked && u.confirmations > 0);

        let mut by_address: BTreeMap<&str, AddressBalance> = BTreeMap::new();
        for utxo in utxos {
            let entry = by_address.entry(utxo.address.as_str()).or_insert_with(|| AddressBalance {
                address: utxo.address.clone(),
                path: utxo.path.clone(),
                amount: 0,
            });
            entry.amount += utxo.satoshis;
        }

        Self {
            total_amount,
            locked_amount,
            total_confirmed_amount,
            locked_confirmed_amount,
            available_amount: total_amount - locked_amount,
            available_confirmed_amount: total_confirmed_amount - locked_confirmed_amount,
            by_address: by_address.into_values().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UtxoOpts {
    /// Restrict to one address (outside the wallet's reconciliation).
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct SendMaxOpts {
    #[serde(default)]
    pub fee_per_kb: Option<u64>,
    #[serde(default)]
    pub fee_level: Option<String>,
    #[serde(default)]
    pub exclude_unconfirmed_utxos: bool,
    #[serde(default)]
    pub return_inputs: bool,
}

fn utxo_keys<'a>(txps: impl IntoIterator<Item = &'a TxProposal>) -> HashSet<String> {
    txps.into_iter()
        .flat_map(|txp| txp.inputs.iter().map(Utxo::key))
        .collect()
}

impl WalletService {
    /// The wallet's spendable outputs, reconciled against known proposals.
    pub(crate) async fn get_utxos_for_current_wallet(&self, wallet: &Wallet) -> ServiceResult<Vec<Utxo>> {
        if wallet.is_scan_error() {
            return Err(ServiceError::client(ErrorCode::WalletNeedScan));
        }
        let addresses = self.ctx.storage.fetch_addresses(&wallet.id).await?;
        if addresses.is_empty() || !wallet.is_complete() {
            return Ok(Vec::new());
        }

        let height = self.get_blockchain_height(&wallet.coin, &wallet.network).await?;
        let explorer = self.explorer_for(wallet)?;
        let utxos = match explorer.get_utxos(wallet, height).await {
            Ok(utxos) => utxos,
            Err(e) if e.is_not_found() => {
                warn!(wallet_id = %wallet.id, "Explorer does not know the wallet, registering again");
                self.ctx.storage.deregister_wallet(&wallet.id).await?;
                self.register_wallet(wallet).await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let dust = self.chain(&wallet.coin)?.dust_threshold();
        let mut utxos: Vec<Utxo> = utxos.into_iter().filter(|u| u.satoshis >= dust).collect();

        let pending = self.ctx.storage.fetch_pending_txs(&wallet.id).await?;
        let locked = utxo_keys(&pending);
        for utxo in utxos.iter_mut() {
            utxo.locked = locked.contains(&utxo.key());
        }

        let policy = &self.ctx.config.policy;
        let since = now_secs() - policy.broadcast_lookback.as_secs() as i64;
        let broadcast = self
            .ctx
            .storage
            .fetch_broadcasted_txs(&wallet.id, since, policy.broadcast_lookback_limit)
            .await?;
        let spent = utxo_keys(&broadcast);
        utxos.retain(|u| !spent.contains(&u.key()));

        let by_address: HashMap<&str, _> = addresses.iter().map(|a| (a.address.as_str(), a)).collect();
        for utxo in utxos.iter_mut() {
            match by_address.get(utxo.address.as_str()) {
                Some(address) => {
                    utxo.path = Some(address.path.clone());
                    utxo.public_keys = address.public_keys.clone();
                }
                None => warn!(wallet_id = %wallet.id, address = %utxo.address, "UTXO on unknown address"),
            }
        }

        debug!(wallet_id = %wallet.id, usable = utxos.len(), locked = locked.len(), "UTXOs reconciled");
        Ok(utxos)
    }

    pub async fn get_utxos(&self, opts: &UtxoOpts) -> ServiceResult<Vec<Utxo>> {
        let wallet = self.get_wallet().await?;
        let Some(address) = &opts.address else {
            return self.get_utxos_for_current_wallet(&wallet).await;
        };
        if !self.chain(&wallet.coin)?.validate_address(&wallet.network, address) {
            return Ok(Vec::new());
        }
        let height = self.get_blockchain_height(&wallet.coin, &wallet.network).await?;
        Ok(self.explorer_for(&wallet)?.get_address_utxos(address, height).await?)
    }

    pub async fn get_balance(&self) -> ServiceResult<Balance> {
        let wallet = self.get_wallet().await?;
        if !wallet.is_complete() {
            return Ok(Balance::default());
        }
        self.sync_wallet(&wallet, false).await?;
        // Sync may have registered the wallet.
        let wallet = self.get_wallet().await?;
        self.wallet_balance(&wallet).await
    }

    pub(crate) async fn wallet_balance(&self, wallet: &Wallet) -> ServiceResult<Balance> {
        if self.chain(&wallet.coin)?.is_utxo_coin() {
            let utxos = self.get_utxos_for_current_wallet(wallet).await?;
            return Ok(Balance::from_utxos(&utxos));
        }

        let chain_balance = self.explorer_for(wallet)?.get_balance(wallet).await?;
        let locked: u64 = self
            .ctx
            .storage
            .fetch_pending_txs(&wallet.id)
            .await?
            .iter()
            .map(|txp| txp.total_amount().saturating_add(txp.fee.unwrap_or(0)))
            .sum();
        let first = self.ctx.storage.fetch_addresses(&wallet.id).await?.into_iter().next();

        Ok(Balance {
            total_amount: chain_balance.balance,
            locked_amount: locked,
            total_confirmed_amount: chain_balance.confirmed,
            locked_confirmed_amount: locked,
            available_amount: chain_balance.balance.saturating_sub(locked),
            available_confirmed_amount: chain_balance.confirmed.saturating_sub(locked),
            by_address: first
                .map(|a| AddressBalance {
                    address: a.address,
                    path: Some(a.path),
                    amount: chain_balance.balance,
                })
                .into_iter()
                .collect(),
        })
    }

    /// What a proposal spending everything would look like.
    pub async fn get_send_max_info(&self, opts: &SendMaxOpts) -> ServiceResult<SendMaxInfo> {
        let wallet = self.get_wallet().await?;
        let chain = self.chain(&wallet.coin)?;
        let fee_per_kb = match (opts.fee_per_kb, &opts.fee_level) {
            (Some(_), Some(_)) => return Err(ServiceError::invalid("Only one of feeLevel/feePerKb allowed")),
            (Some(fee_per_kb), None) => fee_per_kb,
            (None, level) => {
                let level = level.as_deref().unwrap_or("normal");
                self.fee_per_kb_for_level(&wallet.coin, &wallet.network, level).await?
            }
        };

        let mut params = base_params(&wallet, self.copayer_id()?);
        params.fee_per_kb = Some(fee_per_kb);
        params.exclude_unconfirmed_utxos = opts.exclude_unconfirmed_utxos;
        let template = TxProposal::create(params);

        let mut info = if chain.is_utxo_coin() {
            let utxos = self.get_utxos_for_current_wallet(&wallet).await?;
            chain.send_max_info(&template, &utxos, 0)
        } else {
            let balance = self.get_balance().await?;
            chain.send_max_info(&template, &[], balance.available_amount)
        };
        if !opts.return_inputs {
            info.inputs.clear();
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TxpStatus;
    use crate::service::AddressOpts;
    use crate::testing::{setup_wallet, test_context, utxo};

    #[test]
    fn totals_from_utxos() {
        let mut a = utxo("aa", 0, "addr1", 10_000, 3);
        a.locked = true;
        let b = utxo("bb", 0, "addr2", 5_000, 0);
        let c = utxo("cc", 1, "addr1", 1_000, 1);
        let balance = Balance::from_utxos(&[a, b, c]);
        assert_eq!(balance.total_amount, 16_000);
        assert_eq!(balance.locked_amount, 10_000);
        assert_eq!(balance.total_confirmed_amount, 11_000);
        assert_eq!(balance.locked_confirmed_amount, 10_000);
        assert_eq!(balance.available_amount, 6_000);
        assert_eq!(balance.available_confirmed_amount, 1_000);
        assert_eq!(balance.by_address.len(), 2);
        assert_eq!(balance.by_address[0].amount, 11_000);
    }

    #[tokio::test]
    async fn reconciliation_locks_and_drops_inputs() {
        let (_dir, ctx, explorer) = test_context();
        let (wallet_id, copayers) = setup_wallet(&ctx, 1, 2, "btc").await;
        let service = copayers[0].service(&ctx);
        let address = service.create_address(AddressOpts::default()).await.unwrap();

        explorer.set_utxos(vec![
            utxo("pending", 0, &address.address, 40_000, 6),
            utxo("spent", 0, &address.address, 30_000, 6),
            utxo("free", 0, &address.address, 20_000, 6),
            utxo("dust", 0, &address.address, 100, 6),
        ]);

        let mut locked_by = TxProposal::create(base_params(&service.get_wallet().await.unwrap(), &copayers[0].id));
        locked_by.id = "p1".into();
        locked_by.status = TxpStatus::Pending;
        locked_by.inputs = vec![utxo("pending", 0, &address.address, 40_000, 6)];
        ctx.storage.store_tx(&locked_by).await.unwrap();

        let mut broadcast = locked_by.clone();
        broadcast.id = "p2".into();
        broadcast.status = TxpStatus::Broadcasted;
        broadcast.broadcasted_on = Some(now_secs());
        broadcast.inputs = vec![utxo("spent", 0, &address.address, 30_000, 6)];
        ctx.storage.store_tx(&broadcast).await.unwrap();

        let wallet = ctx.storage.fetch_wallet(&wallet_id).await.unwrap().unwrap();
        let utxos = service.get_utxos_for_current_wallet(&wallet).await.unwrap();
        let keys: Vec<_> = utxos.iter().map(|u| (u.txid.as_str(), u.locked)).collect();
        assert_eq!(keys, vec![("pending", true), ("free", false)]);
        assert_eq!(utxos[1].path.as_deref(), Some("m/0/0"));

        let balance = service.get_balance().await.unwrap();
        assert_eq!(balance.total_amount, 60_000);
        assert_eq!(balance.locked_amount, 40_000);
        assert_eq!(balance.available_amount + balance.locked_amount, balance.total_amount);
    }

    #[tokio::test]
    async fn incomplete_wallet_has_zero_balance() {
        let (_dir, ctx, _explorer) = test_context();
        let wallet_id = crate::testing::create_wallet(&ctx, 2, 2, "btc").await;
        let service = WalletService::bound(ctx, &wallet_id, "nobody");
        assert_eq!(service.get_balance().await.unwrap(), Balance::default());
    }

    #[tokio::test]
    async fn account_balance_subtracts_pending_spends() {
        let (_dir, ctx, explorer) = test_context();
        let (_wallet_id, copayers) = setup_wallet(&ctx, 1, 1, "eth").await;
        let service = copayers[0].service(&ctx);
        service.create_address(AddressOpts::default()).await.unwrap();
        explorer.set_balance(1_000_000_000, 900_000_000);

        let wallet = service.get_wallet().await.unwrap();
        let mut txp = TxProposal::create(base_params(&wallet, &copayers[0].id));
        txp.status = TxpStatus::Pending;
        txp.outputs = vec![crate::models::TxOutput {
            to_address: format!("0x{}", "11".repeat(20)),
            amount: 100_000_000,
            message: None,
        }];
        txp.fee = Some(1_000_000);
        ctx.storage.store_tx(&txp).await.unwrap();

        let balance = service.get_balance().await.unwrap();
        assert_eq!(balance.locked_amount, 101_000_000);
        assert_eq!(balance.available_amount, 899_000_000);
        assert_eq!(balance.available_confirmed_amount, 799_000_000);
        assert_eq!(balance.by_address.len(), 1);
    }
}
