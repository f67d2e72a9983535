// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted domain records.
//!
//! All records serialize as camelCase JSON; the storage backend stores them
//! verbatim, so `serde` round-trips are the load/store path.

pub mod address;
pub mod notification;
pub mod order;
pub mod preferences;
pub mod txproposal;
pub mod wallet;

pub use address::Address;
pub use notification::{Notification, NotificationType};
pub use order::{Order, OrderErrorCode, OrderKind, OrderStatus};
pub use preferences::{Preferences, PushNotificationSub, Session, TxConfirmationSub};
pub use txproposal::{
    ActionType, SigningMethod, TxOutput, TxProposal, TxProposalParams, TxpAction, TxpStatus, Utxo,
};
pub use wallet::{
    AddressManager, AddressType, Copayer, CopayerLookup, RequestPubKey, ScanStatus, Wallet,
    WalletStatus,
};

/// Current time in epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
