// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Swap / Conversion / Merchant Orders
//!
//! Orders are created here and advanced by one [`OrderProcessor`] per
//! [`OrderKind`], each draining its own durable queue on a timer.
//!
//! ## Lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `waiting` | Created, deposit address handed out, queued |
//! | `processing` | Picked up by the processor at least once |
//! | `pending` | Needs more deposit, or expired after a partial deposit |
//! | `expired` | Expired with no deposit |
//! | `complete` | Payout broadcast |
//!
//! Deposits land in the operator's funding wallet for the source coin and
//! payouts leave from the funding wallet for the destination coin. Both are
//! ordinary wallets driven through [`WalletService`] with operator keys.

pub mod alerts;
pub mod processor;
pub mod rates;

use std::collections::HashMap;
use std::sync::Arc;

use k256::ecdsa::SigningKey;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::config::FundingWalletConfig;
use crate::context::AppContext;
use crate::crypto::{self, CryptoError};
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::order::OrderFilter;
use crate::models::{now_secs, Order, OrderKind, OrderStatus, TxProposal};
use crate::service::{AddressOpts, WalletService};

pub use alerts::{AlertDispatcher, AlertSink, LogAlertSink};
pub use processor::OrderProcessor;
pub use rates::{HttpRateProvider, Rate, RateProvider, RateService};

/// How long a new order accepts deposits.
pub const ORDER_TTL_SECS: i64 = 3600;

// =============================================================================
// Funding wallets
// =============================================================================

/// An operator wallet the server can spend from.
pub struct FundingWallet {
    pub coin: String,
    pub network: String,
    pub wallet_id: String,
    pub copayer_id: String,
    request_key: SigningKey,
    signing_key: SigningKey,
}

impl std::fmt::Debug for FundingWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundingWallet")
            .field("coin", &self.coin)
            .field("network", &self.network)
            .field("wallet_id", &self.wallet_id)
            .field("copayer_id", &self.copayer_id)
            .finish_non_exhaustive()
    }
}

impl FundingWallet {
    pub fn from_config(config: &FundingWalletConfig) -> Result<Self, CryptoError> {
        Ok(Self {
            coin: config.coin.clone(),
            network: config.network.clone(),
            wallet_id: config.wallet_id.clone(),
            copayer_id: config.copayer_id.clone(),
            request_key: crypto::parse_signing_key(&config.request_private_key)?,
            signing_key: crypto::parse_signing_key(&config.signing_private_key)?,
        })
    }

    pub fn service(&self, ctx: Arc<AppContext>) -> WalletService {
        WalletService::bound(ctx, &self.wallet_id, &self.copayer_id)
    }

    pub fn proposal_signature(&self, txp: &TxProposal) -> String {
        crypto::sign_message(&self.request_key, &txp.raw_tx())
    }

    pub fn input_signatures(&self, txp: &TxProposal) -> Vec<String> {
        let raw = txp.raw_tx();
        (0..txp.inputs.len().max(1))
            .map(|i| crypto::sign_message(&self.signing_key, &TxProposal::sighash(&raw, i)))
            .collect()
    }
}

/// Funding wallets keyed by (coin, network).
#[derive(Debug, Default)]
pub struct FundingWallets {
    wallets: HashMap<(String, String), FundingWallet>,
}

impl FundingWallets {
    pub fn from_config(configs: &[FundingWalletConfig]) -> Result<Self, CryptoError> {
        let mut wallets = HashMap::new();
        for config in configs {
            let wallet = FundingWallet::from_config(config)?;
            wallets.insert((wallet.coin.clone(), wallet.network.clone()), wallet);
        }
        Ok(Self { wallets })
    }

    pub fn get(&self, coin: &str, network: &str) -> Option<&FundingWallet> {
        self.wallets.get(&(coin.to_string(), network.to_string()))
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}

// =============================================================================
// Order creation and queries
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderOpts {
    pub kind: OrderKind,
    pub from_coin: String,
    pub to_coin: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Where the payout goes.
    pub to_address: String,
    /// Amount the user intends to deposit, source smallest units.
    pub amount_from: u64,
}

fn default_network() -> String {
    "livenet".to_string()
}

/// Quote an order, hand out a deposit address and queue it.
pub async fn create_order(ctx: &Arc<AppContext>, opts: CreateOrderOpts) -> ServiceResult<Order> {
    let pair = ctx
        .config
        .swap
        .pair(&opts.from_coin, &opts.to_coin, &opts.network)
        .filter(|p| p.enabled)
        .ok_or_else(|| ServiceError::client(ErrorCode::PairNotSupported))?;
    if opts.amount_from < pair.min_convert_to_sat || opts.amount_from > pair.max_convert_to_sat {
        return Err(ServiceError::invalid(format!(
            "Amount must be within {}..={}",
            pair.min_convert_to_sat, pair.max_convert_to_sat
        )));
    }
    let to_chain = ctx.chains.get(&opts.to_coin)?;
    if !to_chain.validate_address(&opts.network, &opts.to_address) {
        return Err(ServiceError::client(ErrorCode::InvalidAddress));
    }
    let deposit_wallet = ctx
        .funding
        .get(&opts.from_coin, &opts.network)
        .ok_or_else(|| ServiceError::client(ErrorCode::PairNotSupported))?;

    let rate = ctx
        .rates
        .rate(&opts.from_coin, &opts.to_coin)
        .await
        .map_err(|e| ServiceError::client_msg(ErrorCode::InvalidArgument, format!("Rate unavailable: {e}")))?;
    let amount_to = rate
        .convert(opts.amount_from)
        .ok_or_else(|| ServiceError::invalid("Amount too large for this pair"))?;

    let deposit = deposit_wallet
        .service(ctx.clone())
        .create_address(AddressOpts { ignore_max_gap: true })
        .await?;

    let now = now_secs();
    let order = Order {
        id: uuid::Uuid::new_v4().to_string(),
        kind: opts.kind,
        status: OrderStatus::Waiting,
        from_coin: opts.from_coin,
        to_coin: opts.to_coin,
        network: opts.network,
        deposit_address: deposit.address,
        to_address: opts.to_address,
        amount_from: opts.amount_from,
        amount_to,
        created_rate: rate.0,
        deposited_amount: 0,
        deposit_txids: Vec::new(),
        payout_txids: Vec::new(),
        paid_amount: 0,
        error: None,
        pending_reason: None,
        created_on: now,
        ended_on: now + ORDER_TTL_SECS,
        updated_on: now,
    };
    ctx.storage.store_order(&order).await?;
    ctx.storage.queue_add(order.kind, &order.id).await?;
    info!(
        order_id = %order.id,
        kind = order.kind.as_str(),
        from_coin = %order.from_coin,
        to_coin = %order.to_coin,
        amount_from = order.amount_from,
        "Order created"
    );
    Ok(order)
}

pub async fn get_order(ctx: &AppContext, kind: OrderKind, order_id: &str) -> ServiceResult<Order> {
    ctx.storage
        .fetch_order(kind, order_id)
        .await?
        .ok_or_else(|| ServiceError::client(ErrorCode::OrderNotFound))
}

/// Operator listing, newest first.
pub async fn query_orders(ctx: &AppContext, filter: &OrderFilter) -> ServiceResult<Vec<Order>> {
    Ok(ctx.storage.fetch_orders(filter).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::swap_context;

    #[tokio::test]
    async fn create_order_quotes_and_queues() {
        let fx = swap_context().await;
        let ctx = fx.ctx.clone();
        fx.rates.set_price("btc", 40_000.0);
        fx.rates.set_price("bch", 400.0);

        let order = create_order(
            &ctx,
            CreateOrderOpts {
                kind: OrderKind::Swap,
                from_coin: "btc".into(),
                to_coin: "bch".into(),
                network: "livenet".into(),
                to_address: format!("bitcoincash:q{}", "44".repeat(20)),
                amount_from: 100_000,
            },
        )
        .await
        .unwrap();

        assert_eq!(order.status, OrderStatus::Waiting);
        assert_eq!(order.amount_to, 10_000_000);
        assert!(order.deposit_address.starts_with("bc1q"));
        assert_eq!(get_order(&ctx, OrderKind::Swap, &order.id).await.unwrap(), order);

        let queued = ctx
            .storage
            .queue_get(OrderKind::Swap, ctx.config.policy.queue_visibility)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.payload, order.id);

        let listed = query_orders(
            &ctx,
            &OrderFilter {
                from_coin: Some("btc".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn create_order_rejects_unknown_pairs_and_limits() {
        let fx = swap_context().await;
        let ctx = fx.ctx.clone();
        fx.rates.set_price("btc", 40_000.0);
        fx.rates.set_price("bch", 400.0);
        let opts = |from: &str, to: &str, amount| CreateOrderOpts {
            kind: OrderKind::Conversion,
            from_coin: from.into(),
            to_coin: to.into(),
            network: "livenet".into(),
            to_address: format!("bitcoincash:q{}", "44".repeat(20)),
            amount_from: amount,
        };

        let err = create_order(&ctx, opts("bch", "btc", 100_000)).await.unwrap_err();
        assert!(err.is_code(ErrorCode::PairNotSupported));
        let err = create_order(&ctx, opts("btc", "bch", 10)).await.unwrap_err();
        assert!(err.is_code(ErrorCode::InvalidArgument));

        let err = get_order(&ctx, OrderKind::Swap, "missing").await.unwrap_err();
        assert!(err.is_code(ErrorCode::OrderNotFound));
    }
}
