// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::now_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum NotificationType {
    NewCopayer,
    WalletComplete,
    NewAddress,
    NewTxProposal,
    TxProposalAcceptedBy,
    TxProposalFinallyAccepted,
    TxProposalRejectedBy,
    TxProposalFinallyRejected,
    TxProposalRemoved,
    NewOutgoingTx,
    NewOutgoingTxByThirdParty,
    ScanFinished,
    NewBlock,
    TxConfirmation,
}

/// Append-only wallet event.
///
/// `id` is the zero-padded per-server ticker, so lexical order of ids is the
/// order the events were emitted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub version: u32,
    pub id: String,
    pub created_on: i64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub wallet_id: String,
    /// `None` for events addressed to every copayer, the originator included.
    #[serde(default)]
    pub creator_id: Option<String>,
}

impl Notification {
    pub fn format_id(ticker: u64) -> String {
        format!("{ticker:020}")
    }

    pub fn new(
        ticker: u64,
        notification_type: NotificationType,
        wallet_id: &str,
        creator_id: Option<&str>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            version: 1,
            id: Self::format_id(ticker),
            created_on: now_secs(),
            notification_type,
            data,
            wallet_id: wallet_id.to_string(),
            creator_id: creator_id.map(str::to_string),
        }
    }

    pub fn is_global(&self) -> bool {
        self.creator_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_sort_by_ticker() {
        let a = Notification::new(9, NotificationType::NewAddress, "w", Some("c"), json!({}));
        let b = Notification::new(10, NotificationType::NewAddress, "w", Some("c"), json!({}));
        assert!(a.id < b.id);
        assert!(!a.is_global());
    }

    #[test]
    fn type_serializes_as_pascal_case() {
        let n = Notification::new(1, NotificationType::TxProposalFinallyAccepted, "w", None, json!({"txProposalId": "t"}));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "TxProposalFinallyAccepted");
        assert_eq!(value["walletId"], "w");
        assert!(value["creatorId"].is_null());
    }
}
