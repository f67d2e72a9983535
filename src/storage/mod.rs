// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage contract consumed by the service layer.
//!
//! Storage is the single source of truth for wallets, addresses, proposals,
//! notifications and orders. Mutations of wallet-scoped state are only issued
//! while the wallet lock is held; the backend itself only guarantees that
//! each call is atomic.
//!
//! ## Record families
//!
//! | Family | Key |
//! |--------|-----|
//! | Wallets, copayer lookups | wallet id, copayer id |
//! | Addresses, proposals, notifications | wallet id + record id |
//! | Preferences, sessions, subscriptions | wallet/copayer id |
//! | Wallet cache | wallet id + type + key |
//! | Global cache | key (value + timestamp) |
//! | Locks | key (expiry) |
//! | Queues | order kind (FIFO, visibility timeout) |
//! | Orders | kind + order id |

pub mod redb_store;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::order::OrderFilter;
use crate::models::{
    Address, CopayerLookup, Notification, Order, OrderKind, Preferences, PushNotificationSub,
    Session, TxConfirmationSub, TxProposal, Wallet,
};

pub use redb_store::RedbStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a global cache lookup.
#[derive(Debug, Clone, Default)]
pub struct CacheLookup {
    /// Value younger than the requested max age.
    pub fresh: Option<Value>,
    /// Last stored value regardless of age.
    pub stale: Option<Value>,
}

/// A delivered queue message. `ack_id` is unique per delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub ack_id: String,
    pub payload: String,
    pub tries: u32,
}

/// Rolling checksum over a wallet's stored addresses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletCheck {
    pub sum: u64,
    pub last_address: Option<String>,
}

/// Time-window filter for proposal listings.
#[derive(Debug, Clone, Default)]
pub struct TxQuery {
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
    pub limit: Option<usize>,
}

/// Cursor for the notification feed.
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery {
    /// Only notifications with an id strictly greater than this.
    pub since_id: Option<String>,
    /// Only notifications created at or after this epoch second.
    pub min_ts: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // -- wallets -------------------------------------------------------------
    async fn fetch_wallet(&self, wallet_id: &str) -> StorageResult<Option<Wallet>>;
    async fn create_wallet(&self, wallet: &Wallet) -> StorageResult<()>;
    async fn store_wallet(&self, wallet: &Wallet) -> StorageResult<()>;
    async fn store_wallet_and_update_copayers_lookup(&self, wallet: &Wallet) -> StorageResult<()>;
    async fn fetch_copayer_lookup(&self, copayer_id: &str) -> StorageResult<Option<CopayerLookup>>;
    /// Remove a wallet and everything scoped to it.
    async fn remove_wallet(&self, wallet_id: &str) -> StorageResult<()>;
    /// Set the wallet's explorer registration flag in place. Returns `false`
    /// when the wallet no longer exists.
    async fn mark_wallet_registered(&self, wallet_id: &str) -> StorageResult<bool>;
    /// Clear explorer registration flags for the wallet and its addresses.
    async fn deregister_wallet(&self, wallet_id: &str) -> StorageResult<()>;

    // -- addresses -----------------------------------------------------------
    /// Store new addresses (existing ones are left untouched) and the wallet
    /// in one transaction.
    async fn store_address_and_wallet(&self, wallet: &Wallet, addresses: &[Address]) -> StorageResult<()>;
    async fn store_address(&self, address: &Address) -> StorageResult<()>;
    /// Addresses ordered main branch first, then change, by index.
    async fn fetch_addresses(&self, wallet_id: &str) -> StorageResult<Vec<Address>>;
    async fn fetch_unsync_addresses(&self, wallet_id: &str) -> StorageResult<Vec<Address>>;
    async fn mark_synced_addresses(&self, wallet_id: &str, addresses: &[String]) -> StorageResult<()>;
    async fn wallet_check(&self, wallet_id: &str) -> StorageResult<WalletCheck>;

    // -- proposals -----------------------------------------------------------
    async fn fetch_tx(&self, wallet_id: &str, txp_id: &str) -> StorageResult<Option<TxProposal>>;
    async fn store_tx(&self, txp: &TxProposal) -> StorageResult<()>;
    async fn remove_tx(&self, wallet_id: &str, txp_id: &str) -> StorageResult<()>;
    /// Pending or accepted proposals, newest first.
    async fn fetch_pending_txs(&self, wallet_id: &str) -> StorageResult<Vec<TxProposal>>;
    /// Non-temporary proposals by `creator_id`, newest first.
    async fn fetch_last_txs(&self, wallet_id: &str, creator_id: &str, limit: usize) -> StorageResult<Vec<TxProposal>>;
    /// Broadcasted proposals with `broadcasted_on >= min_ts`, newest first.
    async fn fetch_broadcasted_txs(&self, wallet_id: &str, min_ts: i64, limit: usize) -> StorageResult<Vec<TxProposal>>;
    /// Non-temporary proposals within the window, newest first.
    async fn fetch_txs(&self, wallet_id: &str, query: &TxQuery) -> StorageResult<Vec<TxProposal>>;

    // -- notifications -------------------------------------------------------
    async fn store_notification(&self, notification: &Notification) -> StorageResult<()>;
    /// Notifications in ticker order.
    async fn fetch_notifications(&self, wallet_id: &str, query: &NotificationQuery) -> StorageResult<Vec<Notification>>;

    // -- preferences, sessions, subscriptions --------------------------------
    async fn store_preferences(&self, preferences: &Preferences) -> StorageResult<()>;
    async fn fetch_preferences(&self, wallet_id: &str, copayer_id: &str) -> StorageResult<Option<Preferences>>;
    async fn store_session(&self, session: &Session) -> StorageResult<()>;
    async fn fetch_session(&self, copayer_id: &str) -> StorageResult<Option<Session>>;
    async fn remove_session(&self, copayer_id: &str) -> StorageResult<()>;
    async fn store_push_sub(&self, sub: &PushNotificationSub) -> StorageResult<()>;
    async fn remove_push_sub(&self, copayer_id: &str, token: &str) -> StorageResult<()>;
    async fn fetch_push_subs(&self, copayer_id: &str) -> StorageResult<Vec<PushNotificationSub>>;
    async fn store_tx_confirmation_sub(&self, sub: &TxConfirmationSub) -> StorageResult<()>;
    async fn remove_tx_confirmation_sub(&self, copayer_id: &str, txid: &str) -> StorageResult<()>;
    async fn fetch_active_tx_confirmation_subs(&self) -> StorageResult<Vec<TxConfirmationSub>>;

    // -- caches --------------------------------------------------------------
    async fn get_wallet_cache(&self, wallet_id: &str, kind: &str, key: &str) -> StorageResult<Option<Value>>;
    async fn store_wallet_cache(&self, wallet_id: &str, kind: &str, key: &str, value: &Value) -> StorageResult<()>;
    async fn clear_wallet_cache(&self, wallet_id: &str) -> StorageResult<()>;
    async fn check_and_use_global_cache(&self, key: &str, max_age: Duration) -> StorageResult<CacheLookup>;
    async fn store_global_cache(&self, key: &str, value: &Value) -> StorageResult<()>;

    // -- locks ---------------------------------------------------------------
    /// Insert the lock record for `owner` if absent or expired. Returns
    /// whether it was taken.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> StorageResult<bool>;
    /// Delete the lock record only if `owner` still holds it.
    async fn release_lock(&self, key: &str, owner: &str) -> StorageResult<bool>;

    // -- queues --------------------------------------------------------------
    async fn queue_add(&self, queue: OrderKind, payload: &str) -> StorageResult<String>;
    /// Next visible message; it stays invisible for `visibility` unless acked.
    async fn queue_get(&self, queue: OrderKind, visibility: Duration) -> StorageResult<Option<QueueMessage>>;
    /// Ack a delivery. Returns false for unknown or superseded deliveries.
    async fn queue_ack(&self, queue: OrderKind, ack_id: &str) -> StorageResult<bool>;
    /// Drop acked messages; returns how many were removed.
    async fn queue_clean(&self, queue: OrderKind) -> StorageResult<usize>;

    // -- orders --------------------------------------------------------------
    async fn store_order(&self, order: &Order) -> StorageResult<()>;
    async fn fetch_order(&self, kind: OrderKind, order_id: &str) -> StorageResult<Option<Order>>;
    async fn fetch_orders(&self, filter: &OrderFilter) -> StorageResult<Vec<Order>>;
}
