// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Swap / conversion / merchant order records.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Swap,
    Conversion,
    Merchant,
}

impl OrderKind {
    pub const ALL: [OrderKind; 3] = [OrderKind::Swap, OrderKind::Conversion, OrderKind::Merchant];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Swap => "swap",
            Self::Conversion => "conversion",
            Self::Merchant => "merchant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Waiting,
    Processing,
    Pending,
    Expired,
    Complete,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Complete)
    }
}

/// Pipeline error recorded on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderErrorCode {
    InvalidOrder,
    OrderExpired,
    PairNotSupported,
    ExceedDailyLimit,
    BelowMinLimit,
    /// The deposit address could not be checked; says nothing about the
    /// deposit itself.
    DepositCheckFailed,
    ExceedMaxLimit,
    NotStableRate,
    OutOfFund,
    InsufficientFund,
    InsufficientFundForFee,
    RateUnavailable,
    PayoutFailed,
}

impl OrderErrorCode {
    /// Terminal errors are acknowledged and left for operator follow-up;
    /// the rest stay queued and are retried on the next poll.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidOrder | Self::OrderExpired | Self::ExceedMaxLimit | Self::NotStableRate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidOrder => "INVALID_ORDER",
            Self::OrderExpired => "ORDER_EXPIRED",
            Self::PairNotSupported => "PAIR_NOT_SUPPORTED",
            Self::ExceedDailyLimit => "EXCEED_DAILY_LIMIT",
            Self::BelowMinLimit => "BELOW_MIN_LIMIT",
            Self::DepositCheckFailed => "DEPOSIT_CHECK_FAILED",
            Self::ExceedMaxLimit => "EXCEED_MAX_LIMIT",
            Self::NotStableRate => "NOT_STABLE_RATE",
            Self::OutOfFund => "OUT_OF_FUND",
            Self::InsufficientFund => "INSUFFICIENT_FUND",
            Self::InsufficientFundForFee => "INSUFFICIENT_FUND_FOR_FEE",
            Self::RateUnavailable => "RATE_UNAVAILABLE",
            Self::PayoutFailed => "PAYOUT_FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub from_coin: String,
    pub to_coin: String,
    pub network: String,
    /// Operator address the user deposits to.
    pub deposit_address: String,
    /// User address the payout goes to.
    pub to_address: String,
    /// Quoted deposit in source smallest units.
    pub amount_from: u64,
    /// Quoted payout in destination smallest units.
    pub amount_to: u64,
    /// Fixed-point rate recorded at creation (see `swap::Rate`).
    #[schema(value_type = u64)]
    pub created_rate: u128,
    #[serde(default)]
    pub deposited_amount: u64,
    #[serde(default)]
    pub deposit_txids: Vec<String>,
    #[serde(default)]
    pub payout_txids: Vec<String>,
    #[serde(default)]
    pub paid_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OrderErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reason: Option<String>,
    pub created_on: i64,
    /// Expiry, epoch seconds.
    pub ended_on: i64,
    pub updated_on: i64,
}

impl Order {
    pub fn is_expired(&self, now: i64) -> bool {
        self.ended_on < now
    }

    /// Record an error without discarding accumulated deposit/payout tracking.
    pub fn set_error(&mut self, code: OrderErrorCode, reason: impl Into<String>) {
        self.error = Some(code);
        self.pending_reason = Some(reason.into());
        self.updated_on = now_secs();
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.pending_reason = None;
    }

    /// Merge newly observed deposit txids; returns how many were new.
    pub fn add_deposit_txids<I: IntoIterator<Item = String>>(&mut self, txids: I) -> usize {
        let mut added = 0;
        for txid in txids {
            if !self.deposit_txids.contains(&txid) {
                self.deposit_txids.push(txid);
                added += 1;
            }
        }
        added
    }
}

/// Operator-side order filter. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    #[serde(default)]
    pub kind: Option<OrderKind>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub from_coin: Option<String>,
    #[serde(default)]
    pub to_coin: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    /// Created at or after, epoch seconds.
    #[serde(default)]
    pub from_date: Option<i64>,
    /// Created at or before, epoch seconds.
    #[serde(default)]
    pub to_date: Option<i64>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.kind.is_none_or(|k| k == order.kind)
            && self.status.is_none_or(|s| s == order.status)
            && self.from_coin.as_deref().is_none_or(|c| c == order.from_coin)
            && self.to_coin.as_deref().is_none_or(|c| c == order.to_coin)
            && self.network.as_deref().is_none_or(|n| n == order.network)
            && self.from_date.is_none_or(|t| order.created_on >= t)
            && self.to_date.is_none_or(|t| order.created_on <= t)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn order(kind: OrderKind) -> Order {
        let now = now_secs();
        Order {
            id: "o1".into(),
            kind,
            status: OrderStatus::Waiting,
            from_coin: "btc".into(),
            to_coin: "bch".into(),
            network: "livenet".into(),
            deposit_address: "bc1qdeposit".into(),
            to_address: "bitcoincash:qdest".into(),
            amount_from: 100_000,
            amount_to: 2_000_000,
            created_rate: 20_000_000_000_000,
            deposited_amount: 0,
            deposit_txids: vec![],
            payout_txids: vec![],
            paid_amount: 0,
            error: None,
            pending_reason: None,
            created_on: now,
            ended_on: now + 3600,
            updated_on: now,
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(OrderErrorCode::NotStableRate.is_terminal());
        assert!(OrderErrorCode::OrderExpired.is_terminal());
        assert!(!OrderErrorCode::BelowMinLimit.is_terminal());
        assert!(!OrderErrorCode::OutOfFund.is_terminal());
        assert!(!OrderErrorCode::DepositCheckFailed.is_terminal());
        assert!(OrderStatus::Complete.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn deposit_txids_are_deduplicated() {
        let mut o = order(OrderKind::Swap);
        assert_eq!(o.add_deposit_txids(vec!["a".into(), "b".into()]), 2);
        assert_eq!(o.add_deposit_txids(vec!["b".into(), "c".into()]), 1);
        assert_eq!(o.deposit_txids, vec!["a", "b", "c"]);
    }

    #[test]
    fn filter_matches_fields() {
        let o = order(OrderKind::Merchant);
        assert!(OrderFilter::default().matches(&o));
        let f = OrderFilter {
            kind: Some(OrderKind::Merchant),
            from_coin: Some("btc".into()),
            from_date: Some(o.created_on - 10),
            ..Default::default()
        };
        assert!(f.matches(&o));
        let f = OrderFilter {
            status: Some(OrderStatus::Complete),
            ..Default::default()
        };
        assert!(!f.matches(&o));
    }

    #[test]
    fn error_code_wire_format() {
        let json = serde_json::to_string(&OrderErrorCode::BelowMinLimit).unwrap();
        assert_eq!(json, r#""BELOW_MIN_LIMIT""#);
        assert_eq!(
            serde_json::to_string(&OrderErrorCode::DepositCheckFailed).unwrap(),
            format!("\"{}\"", OrderErrorCode::DepositCheckFailed.as_str())
        );
        assert_eq!(OrderKind::parse("conversion"), Some(OrderKind::Conversion));
    }
}
