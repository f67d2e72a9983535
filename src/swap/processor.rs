// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Queue-driven order pipeline.
//!
//! Each tick drains every visible message of one order kind, one at a time.
//! A message is acknowledged only after the order record reflecting the
//! outcome has been written, and only when the outcome is final (complete
//! or a terminal error). Everything else becomes visible again after the
//! queue's visibility timeout and is retried.
//!
//! Payouts use the proposal id `payout-<orderId>`, so a retry after a crash
//! mid-payout picks up the existing proposal instead of paying twice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::rates::Rate;
use super::FundingWallet;
use crate::background::PeriodicJob;
use crate::config::PairConfig;
use crate::context::AppContext;
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::{now_secs, Order, OrderErrorCode, OrderKind, OrderStatus, TxProposal};
use crate::service::proposals::{PublishTxOpts, SignTxOpts};
use crate::service::{CreateTxOpts, OutputOpts, WalletService};
use crate::storage::QueueMessage;

/// Why an order could not advance on this attempt.
#[derive(Debug)]
struct Failure {
    code: OrderErrorCode,
    reason: String,
    status: Option<OrderStatus>,
}

impl Failure {
    fn new(code: OrderErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            status: None,
        }
    }

    fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Whether the queue message may be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Retry,
}

pub struct OrderProcessor {
    ctx: Arc<AppContext>,
    kind: OrderKind,
}

impl OrderProcessor {
    pub fn new(ctx: Arc<AppContext>, kind: OrderKind) -> Self {
        Self { ctx, kind }
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    /// Drain the queue once. Returns the number of messages handled.
    pub async fn run_once(&self) -> ServiceResult<usize> {
        let visibility = self.ctx.config.policy.queue_visibility;
        let mut handled = 0;
        while let Some(message) = self.ctx.storage.queue_get(self.kind, visibility).await? {
            handled += 1;
            self.handle(message).await;
        }
        let cleaned = self.ctx.storage.queue_clean(self.kind).await?;
        if handled > 0 || cleaned > 0 {
            debug!(kind = self.kind.as_str(), handled, cleaned, "Order queue drained");
        }
        Ok(handled)
    }

    async fn handle(&self, message: QueueMessage) {
        let order_id = message.payload.clone();
        match self.process(&order_id).await {
            Ok(Disposition::Ack) => {
                if let Err(e) = self.ctx.storage.queue_ack(self.kind, &message.ack_id).await {
                    error!(order_id = %order_id, error = %e, "Failed to ack order message");
                }
            }
            Ok(Disposition::Retry) => {
                debug!(order_id = %order_id, tries = message.tries, "Order left for retry");
            }
            // Storage failures leave the message for redelivery.
            Err(e) => error!(order_id = %order_id, error = %e, "Order processing failed"),
        }
    }

    /// Advance one order as far as it can go and persist the outcome.
    pub async fn process(&self, order_id: &str) -> ServiceResult<Disposition> {
        let Some(mut order) = self.ctx.storage.fetch_order(self.kind, order_id).await? else {
            warn!(order_id, kind = self.kind.as_str(), "Queued order not found");
            return Ok(Disposition::Ack);
        };
        if order.status.is_terminal() {
            return Ok(Disposition::Ack);
        }

        match self.advance(&mut order).await {
            Ok(()) => {
                order.status = OrderStatus::Complete;
                order.clear_error();
                order.updated_on = now_secs();
                self.ctx.storage.store_order(&order).await?;
                info!(
                    order_id = %order.id,
                    kind = self.kind.as_str(),
                    paid = order.paid_amount,
                    txids = ?order.payout_txids,
                    "Order complete"
                );
                self.ctx.alerts.dispatch(
                    &format!("{}:{}:COMPLETE", self.kind.as_str(), order.id),
                    &format!(
                        "{} order {} paid {} {} to {}",
                        self.kind.as_str(),
                        order.id,
                        order.paid_amount,
                        order.to_coin,
                        order.to_address
                    ),
                );
                Ok(Disposition::Ack)
            }
            Err(failure) => {
                if let Some(status) = failure.status {
                    order.status = status;
                }
                order.set_error(failure.code, failure.reason.clone());
                self.ctx.storage.store_order(&order).await?;
                warn!(
                    order_id = %order.id,
                    kind = self.kind.as_str(),
                    code = failure.code.as_str(),
                    reason = %failure.reason,
                    "Order not advanced"
                );
                self.ctx.alerts.dispatch(
                    &format!("{}:{}", self.kind.as_str(), failure.code.as_str()),
                    &format!("{} order {}: {}", self.kind.as_str(), order.id, failure.reason),
                );
                if failure.code.is_terminal() {
                    Ok(Disposition::Ack)
                } else {
                    Ok(Disposition::Retry)
                }
            }
        }
    }

    async fn advance(&self, order: &mut Order) -> Result<(), Failure> {
        validate(order)?;

        if order.is_expired(now_secs()) {
            let status = if order.deposit_txids.is_empty() {
                OrderStatus::Expired
            } else {
                OrderStatus::Pending
            };
            return Err(Failure::new(OrderErrorCode::OrderExpired, "Order expired").with_status(status));
        }

        if order.status == OrderStatus::Waiting {
            order.status = OrderStatus::Processing;
            order.updated_on = now_secs();
            self.ctx
                .storage
                .store_order(order)
                .await
                .map_err(|e| Failure::new(OrderErrorCode::PayoutFailed, e.to_string()))?;
        }

        let pair = self
            .ctx
            .config
            .swap
            .pair(&order.from_coin, &order.to_coin, &order.network)
            .filter(|p| p.enabled)
            .cloned()
            .ok_or_else(|| Failure::new(OrderErrorCode::PairNotSupported, "Pair is not enabled"))?;

        self.check_daily_limit(order, &pair).await?;
        self.collect_deposits(order, &pair).await?;

        let current = self
            .ctx
            .rates
            .rate(&order.from_coin, &order.to_coin)
            .await
            .map_err(|e| Failure::new(OrderErrorCode::RateUnavailable, e.to_string()))?;
        let created = Rate(order.created_rate);
        let drift = current.drift_bps(created);
        if drift > u128::from(self.ctx.config.policy.rate_tolerance_bps) {
            return Err(Failure::new(
                OrderErrorCode::NotStableRate,
                format!("Rate moved {drift} bps since the order was created"),
            ));
        }

        let payout_amount = self.payout_amount(order, &pair, created).await?;
        let funding = self
            .ctx
            .funding
            .get(&order.to_coin, &order.network)
            .ok_or_else(|| Failure::new(OrderErrorCode::PairNotSupported, "No funding wallet for payout coin"))?;
        let service = funding.service(self.ctx.clone());

        let payout_id = format!("payout-{}", order.id);
        let existing = self
            .ctx
            .storage
            .fetch_tx(&funding.wallet_id, &payout_id)
            .await
            .map_err(|e| Failure::new(OrderErrorCode::PayoutFailed, e.to_string()))?;
        if existing.is_none() {
            let balance = service.get_balance().await.map_err(payout_failure)?;
            if balance.available_amount < payout_amount {
                return Err(Failure::new(
                    OrderErrorCode::OutOfFund,
                    format!(
                        "Funding wallet has {} available, payout needs {payout_amount}",
                        balance.available_amount
                    ),
                ));
            }
        }

        let txp = self
            .pay_out(&service, funding, order, &payout_id, payout_amount)
            .await
            .map_err(payout_failure)?;
        if let Some(txid) = txp.txid {
            if !order.payout_txids.contains(&txid) {
                order.payout_txids.push(txid);
            }
        }
        order.paid_amount = payout_amount;
        Ok(())
    }

    async fn check_daily_limit(&self, order: &Order, pair: &PairConfig) -> Result<(), Failure> {
        let now = now_secs();
        // UTC midnight.
        let day_start = now - now.rem_euclid(86_400);
        let filter = crate::models::order::OrderFilter {
            status: Some(OrderStatus::Complete),
            from_coin: Some(order.from_coin.clone()),
            to_coin: Some(order.to_coin.clone()),
            network: Some(order.network.clone()),
            from_date: Some(day_start),
            ..Default::default()
        };
        let used: u64 = self
            .ctx
            .storage
            .fetch_orders(&filter)
            .await
            .map_err(|e| Failure::new(OrderErrorCode::PayoutFailed, e.to_string()))?
            .iter()
            .map(|o| o.deposited_amount)
            .sum();
        let amount = order.deposited_amount.max(order.amount_from);
        if used.saturating_add(amount) > pair.daily_limit {
            return Err(Failure::new(
                OrderErrorCode::ExceedDailyLimit,
                format!("Daily limit {} reached ({used} used today)", pair.daily_limit),
            ));
        }
        Ok(())
    }

    async fn collect_deposits(&self, order: &mut Order, pair: &PairConfig) -> Result<(), Failure> {
        let explorer = self
            .ctx
            .explorers
            .get(&order.from_coin, &order.network)
            .ok_or_else(|| Failure::new(OrderErrorCode::PairNotSupported, "No explorer for deposit coin"))?;
        let tip = explorer
            .get_blockchain_height()
            .await
            .map_err(|e| {
                Failure::new(OrderErrorCode::DepositCheckFailed, format!("Block height unavailable: {e}"))
            })?;
        let utxos = explorer
            .get_address_utxos(&order.deposit_address, tip.height)
            .await
            .map_err(|e| {
                Failure::new(OrderErrorCode::DepositCheckFailed, format!("Deposit lookup failed: {e}"))
            })?;

        let deposited: u64 = utxos.iter().map(|u| u.satoshis).sum();
        let added = order.add_deposit_txids(utxos.into_iter().map(|u| u.txid));
        if added > 0 {
            info!(order_id = %order.id, deposited, added, "Deposit observed");
        }
        order.deposited_amount = deposited;

        if deposited < pair.min_convert_to_sat {
            return Err(Failure::new(
                OrderErrorCode::BelowMinLimit,
                format!("Deposited {deposited}, minimum is {}", pair.min_convert_to_sat),
            )
            .with_status(OrderStatus::Pending));
        }
        if deposited > pair.max_convert_to_sat {
            return Err(Failure::new(
                OrderErrorCode::ExceedMaxLimit,
                format!("Deposited {deposited}, maximum is {}", pair.max_convert_to_sat),
            ));
        }
        Ok(())
    }

    /// Deposit converted at the order's rate, minus percentage, fixed and
    /// settlement fees.
    async fn payout_amount(&self, order: &Order, pair: &PairConfig, rate: Rate) -> Result<u64, Failure> {
        let gross = rate
            .convert(order.deposited_amount)
            .ok_or_else(|| Failure::new(OrderErrorCode::InvalidOrder, "Payout amount overflows"))?;
        let percentage = u64::try_from(u128::from(gross) * u128::from(pair.fee_percent_bps) / 10_000)
            .unwrap_or(u64::MAX);
        let settlement = self
            .ctx
            .rates
            .usd_cents_to_units(&order.to_coin, pair.settlement_fee_usd_cents)
            .await
            .map_err(|e| Failure::new(OrderErrorCode::RateUnavailable, e.to_string()))?;
        let fees = percentage.saturating_add(pair.fixed_fee).saturating_add(settlement);
        if fees >= gross {
            return Err(Failure::new(
                OrderErrorCode::BelowMinLimit,
                format!("Fees {fees} exceed converted deposit {gross}"),
            )
            .with_status(OrderStatus::Pending));
        }
        debug!(order_id = %order.id, gross, percentage, fixed = pair.fixed_fee, settlement, "Payout computed");
        Ok(gross - fees)
    }

    /// Create, publish, sign and broadcast the payout. Every step checks the
    /// stored proposal first so a rerun resumes where the last one stopped.
    async fn pay_out(
        &self,
        service: &WalletService,
        funding: &FundingWallet,
        order: &Order,
        payout_id: &str,
        amount: u64,
    ) -> ServiceResult<TxProposal> {
        let mut txp = service
            .create_tx(CreateTxOpts {
                tx_proposal_id: Some(payout_id.to_string()),
                outputs: vec![OutputOpts {
                    to_address: order.to_address.clone(),
                    amount: Some(amount),
                    message: None,
                }],
                message: Some(format!("{} order {}", order.kind.as_str(), order.id)),
                ..Default::default()
            })
            .await?;

        if txp.is_temporary() {
            txp = service
                .publish_tx(&txp.id, PublishTxOpts {
                    proposal_signature: funding.proposal_signature(&txp),
                })
                .await?;
        }
        if txp.action_by(&funding.copayer_id).is_none() {
            txp = service
                .sign_tx(&txp.id, SignTxOpts {
                    signatures: funding.input_signatures(&txp),
                })
                .await?;
        }
        if !txp.is_broadcasted() {
            txp = service.broadcast_tx(&txp.id).await?;
        }
        Ok(txp)
    }
}

fn validate(order: &Order) -> Result<(), Failure> {
    if order.created_rate == 0 {
        return Err(Failure::new(OrderErrorCode::InvalidOrder, "Order has no rate"));
    }
    if order.deposit_address.is_empty() || order.to_address.is_empty() {
        return Err(Failure::new(OrderErrorCode::InvalidOrder, "Order is missing an address"));
    }
    if order.from_coin == order.to_coin {
        return Err(Failure::new(OrderErrorCode::InvalidOrder, "Source and destination coin match"));
    }
    Ok(())
}

fn payout_failure(err: ServiceError) -> Failure {
    match err.code() {
        Some(ErrorCode::InsufficientFunds) => Failure::new(OrderErrorCode::InsufficientFund, err.to_string()),
        Some(ErrorCode::InsufficientFundsForFee) => {
            Failure::new(OrderErrorCode::InsufficientFundForFee, err.to_string())
        }
        _ => Failure::new(OrderErrorCode::PayoutFailed, err.to_string()),
    }
}

#[async_trait]
impl PeriodicJob for OrderProcessor {
    fn name(&self) -> String {
        format!("orders:{}", self.kind.as_str())
    }

    fn interval(&self) -> Duration {
        self.ctx.config.policy.order_poll_interval
    }

    async fn tick(&self) -> ServiceResult<()> {
        self.run_once().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::{create_order, CreateOrderOpts};
    use crate::testing::{swap_context, utxo, SwapFixture};

    async fn new_order(fx: &SwapFixture, amount_from: u64) -> Order {
        fx.rates.set_price("btc", 40_000.0);
        fx.rates.set_price("bch", 400.0);
        create_order(
            &fx.ctx,
            CreateOrderOpts {
                kind: OrderKind::Swap,
                from_coin: "btc".into(),
                to_coin: "bch".into(),
                network: "livenet".into(),
                to_address: format!("bitcoincash:q{}", "44".repeat(20)),
                amount_from,
            },
        )
        .await
        .unwrap()
    }

    async fn stored(fx: &SwapFixture, id: &str) -> Order {
        fx.ctx.storage.fetch_order(OrderKind::Swap, id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn below_min_deposit_stays_pending_and_queued() {
        let fx = swap_context().await;
        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 10_000, 1)]);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.run_once().await.unwrap(), 1);

        let after = stored(&fx, &order.id).await;
        assert_eq!(after.status, OrderStatus::Pending);
        assert_eq!(after.error, Some(OrderErrorCode::BelowMinLimit));
        assert_eq!(after.deposited_amount, 10_000);
        assert_eq!(after.deposit_txids, vec!["d1".to_string()]);

        // Not acked: the message comes back once it is visible again.
        assert!(fx
            .ctx
            .storage
            .queue_get(OrderKind::Swap, Duration::ZERO)
            .await
            .unwrap()
            .is_some());

        // Topping up lets the retry complete the order.
        fx.btc.set_utxos(vec![
            utxo("d1", 0, &order.deposit_address, 10_000, 1),
            utxo("d2", 0, &order.deposit_address, 90_000, 1),
        ]);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Ack);
        let done = stored(&fx, &order.id).await;
        assert_eq!(done.status, OrderStatus::Complete);
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn successful_payout_is_idempotent() {
        let fx = swap_context().await;
        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 100_000, 1)]);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        processor.run_once().await.unwrap();

        let done = stored(&fx, &order.id).await;
        assert_eq!(done.status, OrderStatus::Complete);
        // 10_000_000 gross - 1% - 1_000 fixed - 2 USD at 400 USD/BCH.
        assert_eq!(done.paid_amount, 9_399_000);
        assert_eq!(done.payout_txids.len(), 1);
        assert_eq!(fx.bch.broadcasts(), done.payout_txids);

        // Acked and cleaned.
        assert!(fx
            .ctx
            .storage
            .queue_get(OrderKind::Swap, Duration::ZERO)
            .await
            .unwrap()
            .is_none());

        // Reprocessing a complete order does nothing.
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Ack);
        assert_eq!(fx.bch.broadcasts().len(), 1);
        let complete_key = format!("swap:{}:COMPLETE", order.id);
        assert!(fx.alerts.messages().iter().any(|(k, _)| *k == complete_key));
    }

    #[tokio::test]
    async fn every_completion_raises_its_own_alert() {
        let fx = swap_context().await;
        let funding = fx.ctx.funding.get("bch", "livenet").unwrap();
        let float = fx.ctx.storage.fetch_addresses(&funding.wallet_id).await.unwrap().remove(0);
        fx.bch.set_utxos(vec![
            utxo("float", 0, &float.address, 50_000_000, 6),
            utxo("float2", 0, &float.address, 50_000_000, 6),
        ]);

        let first = new_order(&fx, 100_000).await;
        let second = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![
            utxo("d1", 0, &first.deposit_address, 100_000, 1),
            utxo("d2", 0, &second.deposit_address, 100_000, 1),
        ]);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.process(&first.id).await.unwrap(), Disposition::Ack);
        assert_eq!(processor.process(&second.id).await.unwrap(), Disposition::Ack);
        assert_eq!(stored(&fx, &second.id).await.status, OrderStatus::Complete);

        let keys: Vec<String> = fx.alerts.messages().into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&format!("swap:{}:COMPLETE", first.id)));
        assert!(keys.contains(&format!("swap:{}:COMPLETE", second.id)));
    }

    #[tokio::test]
    async fn explorer_outage_is_a_retryable_deposit_check_failure() {
        let fx = swap_context().await;
        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 100_000, 1)]);
        fx.btc.fail_height(true);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Retry);
        let after = stored(&fx, &order.id).await;
        assert_eq!(after.error, Some(OrderErrorCode::DepositCheckFailed));
        assert_eq!(after.status, OrderStatus::Processing);
        assert_eq!(after.deposited_amount, 0);
        assert!(fx
            .alerts
            .messages()
            .iter()
            .any(|(k, _)| k == "swap:DEPOSIT_CHECK_FAILED"));

        fx.btc.fail_height(false);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Ack);
        assert_eq!(stored(&fx, &order.id).await.status, OrderStatus::Complete);
    }

    #[tokio::test]
    async fn daily_limit_counts_todays_completed_orders() {
        let fx = swap_context().await;
        let mut earlier = new_order(&fx, 100_000).await;
        earlier.status = OrderStatus::Complete;
        earlier.deposited_amount = 99_950_000;
        fx.ctx.storage.store_order(&earlier).await.unwrap();

        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 100_000, 1)]);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Retry);
        let after = stored(&fx, &order.id).await;
        assert_eq!(after.error, Some(OrderErrorCode::ExceedDailyLimit));
        assert!(fx.bch.broadcasts().is_empty());
        assert!(fx
            .alerts
            .messages()
            .iter()
            .any(|(k, _)| k == "swap:EXCEED_DAILY_LIMIT"));
    }

    #[tokio::test]
    async fn deposit_above_max_is_terminal() {
        let fx = swap_context().await;
        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 10_000_001, 1)]);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.run_once().await.unwrap(), 1);
        let after = stored(&fx, &order.id).await;
        assert_eq!(after.error, Some(OrderErrorCode::ExceedMaxLimit));
        assert_eq!(after.deposited_amount, 10_000_001);
        assert!(fx.bch.broadcasts().is_empty());
        assert!(fx.alerts.messages().iter().any(|(k, _)| k == "swap:EXCEED_MAX_LIMIT"));

        // Acked: nothing comes back.
        assert!(fx
            .ctx
            .storage
            .queue_get(OrderKind::Swap, Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn terminal_errors_are_acked() {
        let fx = swap_context().await;
        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 100_000, 1)]);
        // BTC gained 10% since the quote.
        fx.rates.set_price("btc", 44_000.0);
        fx.ctx.rates.clear();

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Ack);
        let after = stored(&fx, &order.id).await;
        assert_eq!(after.error, Some(OrderErrorCode::NotStableRate));
        assert!(fx.bch.broadcasts().is_empty());
        assert!(fx
            .alerts
            .messages()
            .iter()
            .any(|(k, _)| k == "swap:NOT_STABLE_RATE"));
    }

    #[tokio::test]
    async fn expired_orders_without_deposit_expire() {
        let fx = swap_context().await;
        let mut order = new_order(&fx, 100_000).await;
        order.ended_on = now_secs() - 1;
        fx.ctx.storage.store_order(&order).await.unwrap();

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Ack);
        let after = stored(&fx, &order.id).await;
        assert_eq!(after.status, OrderStatus::Expired);
        assert_eq!(after.error, Some(OrderErrorCode::OrderExpired));
    }

    #[tokio::test]
    async fn payout_beyond_funding_is_out_of_fund() {
        let fx = swap_context().await;
        fx.bch.set_utxos(Vec::new());
        let order = new_order(&fx, 100_000).await;
        fx.btc.set_utxos(vec![utxo("d1", 0, &order.deposit_address, 100_000, 1)]);

        let processor = OrderProcessor::new(fx.ctx.clone(), OrderKind::Swap);
        assert_eq!(processor.process(&order.id).await.unwrap(), Disposition::Retry);
        let after = stored(&fx, &order.id).await;
        assert_eq!(after.error, Some(OrderErrorCode::OutOfFund));
        assert_eq!(after.status, OrderStatus::Processing);
    }
}
