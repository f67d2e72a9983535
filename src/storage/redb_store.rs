// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded storage backend on redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! Every record table maps a composite `&str` key to JSON bytes. Keys are
//! `|`-separated so a wallet's records form one contiguous range.
//!
//! - `wallets`: wallet_id → Wallet
//! - `copayer_lookups`: copayer_id → CopayerLookup
//! - `addresses`: wallet_id|address → Address
//! - `txps`: wallet_id|txp_id → TxProposal
//! - `notifications`: wallet_id|ticker → Notification
//! - `preferences`: wallet_id|copayer_id → Preferences
//! - `sessions`: copayer_id → Session
//! - `push_subs`: copayer_id|token → PushNotificationSub
//! - `tx_confirmation_subs`: copayer_id|txid → TxConfirmationSub
//! - `wallet_cache`: wallet_id|kind|key → JSON value
//! - `global_cache`: key → { value, updatedOn }
//! - `locks`: key → expiry (epoch ms)
//! - `queues`: kind|seq → QueueRecord
//! - `orders`: kind|order_id → Order
//! - `meta`: counters

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    CacheLookup, NotificationQuery, QueueMessage, Storage, StorageError, StorageResult, TxQuery,
    WalletCheck,
};
use crate::models::order::OrderFilter;
use crate::models::{
    Address, CopayerLookup, Notification, Order, OrderKind, Preferences, PushNotificationSub,
    Session, TxConfirmationSub, TxProposal, TxpStatus, Wallet,
};

// =============================================================================
// Table Definitions
// =============================================================================

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const WALLETS: JsonTable = TableDefinition::new("wallets");
const COPAYER_LOOKUPS: JsonTable = TableDefinition::new("copayer_lookups");
const ADDRESSES: JsonTable = TableDefinition::new("addresses");
const TXPS: JsonTable = TableDefinition::new("txps");
const NOTIFICATIONS: JsonTable = TableDefinition::new("notifications");
const PREFERENCES: JsonTable = TableDefinition::new("preferences");
const SESSIONS: JsonTable = TableDefinition::new("sessions");
const PUSH_SUBS: JsonTable = TableDefinition::new("push_subs");
const TX_CONFIRMATION_SUBS: JsonTable = TableDefinition::new("tx_confirmation_subs");
const WALLET_CACHE: JsonTable = TableDefinition::new("wallet_cache");
const GLOBAL_CACHE: JsonTable = TableDefinition::new("global_cache");
const QUEUES: JsonTable = TableDefinition::new("queues");
const ORDERS: JsonTable = TableDefinition::new("orders");
/// Lock records: key → [`LockRecord`].
const LOCKS: JsonTable = TableDefinition::new("lock_records");

/// Counters (queue sequence numbers).
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const JSON_TABLES: [JsonTable; 14] = [
    WALLETS,
    COPAYER_LOOKUPS,
    ADDRESSES,
    TXPS,
    NOTIFICATIONS,
    PREFERENCES,
    SESSIONS,
    PUSH_SUBS,
    TX_CONFIRMATION_SUBS,
    WALLET_CACHE,
    GLOBAL_CACHE,
    QUEUES,
    ORDERS,
    LOCKS,
];

/// Largest integer exactly representable in an IEEE double; bounds the
/// wallet checksum so explorers using doubles agree on it.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockRecord {
    owner: String,
    /// Epoch milliseconds.
    expire_on: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GlobalCacheRecord {
    value: Value,
    updated_on: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueRecord {
    payload: String,
    visible_at: i64,
    tries: u32,
    #[serde(default)]
    ack: Option<String>,
    #[serde(default)]
    deleted: bool,
}

// =============================================================================
// Key Helpers
// =============================================================================

fn key2(a: &str, b: &str) -> String {
    format!("{a}|{b}")
}

/// Range bounds covering every key that starts with `prefix|`. The upper
/// bound swaps the separator for `}`, the next byte after `|`, so any suffix
/// (including non-ASCII) falls inside the range.
fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{prefix}|"), format!("{prefix}}}"))
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn newest_first(txps: &mut [TxProposal]) {
    txps.sort_by(|a, b| b.created_on.cmp(&a.created_on));
}

/// Sum of the bytes of every address, modulo [`MAX_SAFE_INTEGER`].
pub fn address_checksum<'a, I: IntoIterator<Item = &'a str>>(addresses: I) -> u64 {
    addresses.into_iter().fold(0u64, |acc, address| {
        let bytes: u64 = address.bytes().map(u64::from).sum();
        (acc + bytes) % MAX_SAFE_INTEGER
    })
}

// =============================================================================
// RedbStorage
// =============================================================================

pub struct RedbStorage {
    db: Database,
}

impl RedbStorage {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            for table in JSON_TABLES {
                let _ = write_txn.open_table(table)?;
            }
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // =========================================================================
    // Generic JSON helpers
    // =========================================================================

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StorageResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        match t.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(table)?;
            t.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, table: JsonTable, key: &str) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(table)?;
            t.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn scan_prefix<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StorageResult<Vec<T>> {
        let (start, end) = prefix_bounds(prefix);
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        let mut out = Vec::new();
        for entry in t.range::<&str>(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn scan_all<T: DeserializeOwned>(&self, table: JsonTable) -> StorageResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let t = read_txn.open_table(table)?;
        let mut out = Vec::new();
        for entry in t.iter()? {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(value.value())?);
        }
        Ok(out)
    }

    fn delete_prefix_in(t: &mut redb::Table<&str, &[u8]>, prefix: &str) -> StorageResult<()> {
        let (start, end) = prefix_bounds(prefix);
        let mut keys = Vec::new();
        for entry in t.range::<&str>(start.as_str()..end.as_str())? {
            let (key, _) = entry?;
            keys.push(key.value().to_string());
        }
        for key in keys {
            t.remove(key.as_str())?;
        }
        Ok(())
    }

    fn txps(&self, wallet_id: &str) -> StorageResult<Vec<TxProposal>> {
        self.scan_prefix(TXPS, wallet_id)
    }

    fn next_seq(t: &mut redb::Table<&str, u64>, name: &str) -> StorageResult<u64> {
        let next = t.get(name)?.map(|v| v.value()).unwrap_or(0) + 1;
        t.insert(name, next)?;
        Ok(next)
    }
}

#[async_trait]
impl Storage for RedbStorage {
    // =========================================================================
    // Wallets
    // =========================================================================

    async fn fetch_wallet(&self, wallet_id: &str) -> StorageResult<Option<Wallet>> {
        self.get_json(WALLETS, wallet_id)
    }

    async fn create_wallet(&self, wallet: &Wallet) -> StorageResult<()> {
        let bytes = serde_json::to_vec(wallet)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(WALLETS)?;
            if t.get(wallet.id.as_str())?.is_some() {
                return Err(StorageError::AlreadyExists(wallet.id.clone()));
            }
            t.insert(wallet.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn store_wallet(&self, wallet: &Wallet) -> StorageResult<()> {
        self.put_json(WALLETS, &wallet.id, wallet)
    }

    async fn store_wallet_and_update_copayers_lookup(&self, wallet: &Wallet) -> StorageResult<()> {
        let wallet_bytes = serde_json::to_vec(wallet)?;
        let mut lookups = Vec::with_capacity(wallet.copayers.len());
        for copayer in &wallet.copayers {
            let lookup = CopayerLookup {
                copayer_id: copayer.id.clone(),
                wallet_id: wallet.id.clone(),
                request_pub_keys: copayer.request_pub_keys.clone(),
            };
            lookups.push((copayer.id.clone(), serde_json::to_vec(&lookup)?));
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut wallets = write_txn.open_table(WALLETS)?;
            wallets.insert(wallet.id.as_str(), wallet_bytes.as_slice())?;
            let mut t = write_txn.open_table(COPAYER_LOOKUPS)?;
            for (copayer_id, bytes) in &lookups {
                t.insert(copayer_id.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn fetch_copayer_lookup(&self, copayer_id: &str) -> StorageResult<Option<CopayerLookup>> {
        self.get_json(COPAYER_LOOKUPS, copayer_id)
    }

    async fn remove_wallet(&self, wallet_id: &str) -> StorageResult<()> {
        let wallet: Option<Wallet> = self.get_json(WALLETS, wallet_id)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut wallets = write_txn.open_table(WALLETS)?;
            wallets.remove(wallet_id)?;
            if let Some(wallet) = &wallet {
                let mut lookups = write_txn.open_table(COPAYER_LOOKUPS)?;
                for copayer in &wallet.copayers {
                    lookups.remove(copayer.id.as_str())?;
                }
            }
            for table in [ADDRESSES, TXPS, NOTIFICATIONS, PREFERENCES, WALLET_CACHE] {
                let mut t = write_txn.open_table(table)?;
                Self::delete_prefix_in(&mut t, wallet_id)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn mark_wallet_registered(&self, wallet_id: &str) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let found = {
            let mut t = write_txn.open_table(WALLETS)?;
            let existing = t.get(wallet_id)?.map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => {
                    let mut wallet: Wallet = serde_json::from_slice(&bytes)?;
                    wallet.be_registered = true;
                    let updated = serde_json::to_vec(&wallet)?;
                    t.insert(wallet_id, updated.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(found)
    }

    async fn deregister_wallet(&self, wallet_id: &str) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let existing = wallets.get(wallet_id)?.map(|v| v.value().to_vec());
            let Some(bytes) = existing else {
                return Ok(());
            };
            let mut wallet: Wallet = serde_json::from_slice(&bytes)?;
            wallet.be_registered = false;
            let updated = serde_json::to_vec(&wallet)?;
            wallets.insert(wallet_id, updated.as_slice())?;

            let mut t = write_txn.open_table(ADDRESSES)?;
            let (start, end) = prefix_bounds(wallet_id);
            let mut encoded = Vec::new();
            for entry in t.range::<&str>(start.as_str()..end.as_str())? {
                let (key, value) = entry?;
                let mut address: Address = serde_json::from_slice(value.value())?;
                address.be_registered = false;
                encoded.push((key.value().to_string(), serde_json::to_vec(&address)?));
            }
            for (key, bytes) in &encoded {
                t.insert(key.as_str(), bytes.as_slice())?;
            }
            let mut cache = write_txn.open_table(WALLET_CACHE)?;
            Self::delete_prefix_in(&mut cache, wallet_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // =========================================================================
    // Addresses
    // =========================================================================

    async fn store_address_and_wallet(&self, wallet: &Wallet, addresses: &[Address]) -> StorageResult<()> {
        let wallet_bytes = serde_json::to_vec(wallet)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(ADDRESSES)?;
            for address in addresses {
                let key = key2(&wallet.id, &address.address);
                if t.get(key.as_str())?.is_some() {
                    debug!(wallet_id = %wallet.id, address = %address.address, "Address already stored");
                    continue;
                }
                let bytes = serde_json::to_vec(address)?;
                t.insert(key.as_str(), bytes.as_slice())?;
            }
            let mut wallets = write_txn.open_table(WALLETS)?;
            wallets.insert(wallet.id.as_str(), wallet_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn store_address(&self, address: &Address) -> StorageResult<()> {
        self.put_json(ADDRESSES, &key2(&address.wallet_id, &address.address), address)
    }

    async fn fetch_addresses(&self, wallet_id: &str) -> StorageResult<Vec<Address>> {
        let mut addresses: Vec<Address> = self.scan_prefix(ADDRESSES, wallet_id)?;
        addresses.sort_by_key(|a| (a.is_change, a.index().unwrap_or(u32::MAX), a.created_on));
        Ok(addresses)
    }

    async fn fetch_unsync_addresses(&self, wallet_id: &str) -> StorageResult<Vec<Address>> {
        let addresses = self.fetch_addresses(wallet_id).await?;
        Ok(addresses.into_iter().filter(|a| !a.be_registered).collect())
    }

    async fn mark_synced_addresses(&self, wallet_id: &str, addresses: &[String]) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(ADDRESSES)?;
            for address in addresses {
                let key = key2(wallet_id, address);
                let existing = t.get(key.as_str())?.map(|v| v.value().to_vec());
                if let Some(bytes) = existing {
                    let mut record: Address = serde_json::from_slice(&bytes)?;
                    record.be_registered = true;
                    let updated = serde_json::to_vec(&record)?;
                    t.insert(key.as_str(), updated.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn wallet_check(&self, wallet_id: &str) -> StorageResult<WalletCheck> {
        let addresses = self.fetch_addresses(wallet_id).await?;
        Ok(WalletCheck {
            sum: address_checksum(addresses.iter().map(|a| a.address.as_str())),
            last_address: addresses
                .iter()
                .max_by_key(|a| a.created_on)
                .map(|a| a.address.clone()),
        })
    }

    // =========================================================================
    // Proposals
    // =========================================================================

    async fn fetch_tx(&self, wallet_id: &str, txp_id: &str) -> StorageResult<Option<TxProposal>> {
        self.get_json(TXPS, &key2(wallet_id, txp_id))
    }

    async fn store_tx(&self, txp: &TxProposal) -> StorageResult<()> {
        self.put_json(TXPS, &key2(&txp.wallet_id, &txp.id), txp)
    }

    async fn remove_tx(&self, wallet_id: &str, txp_id: &str) -> StorageResult<()> {
        self.delete(TXPS, &key2(wallet_id, txp_id))
    }

    async fn fetch_pending_txs(&self, wallet_id: &str) -> StorageResult<Vec<TxProposal>> {
        let mut txps: Vec<TxProposal> = self
            .txps(wallet_id)?
            .into_iter()
            .filter(|t| t.is_pending())
            .collect();
        newest_first(&mut txps);
        Ok(txps)
    }

    async fn fetch_last_txs(&self, wallet_id: &str, creator_id: &str, limit: usize) -> StorageResult<Vec<TxProposal>> {
        let mut txps: Vec<TxProposal> = self
            .txps(wallet_id)?
            .into_iter()
            .filter(|t| t.creator_id == creator_id && !t.is_temporary())
            .collect();
        newest_first(&mut txps);
        txps.truncate(limit);
        Ok(txps)
    }

    async fn fetch_broadcasted_txs(&self, wallet_id: &str, min_ts: i64, limit: usize) -> StorageResult<Vec<TxProposal>> {
        let mut txps: Vec<TxProposal> = self
            .txps(wallet_id)?
            .into_iter()
            .filter(|t| t.status == TxpStatus::Broadcasted && t.broadcasted_on.unwrap_or(0) >= min_ts)
            .collect();
        txps.sort_by(|a, b| b.broadcasted_on.cmp(&a.broadcasted_on));
        txps.truncate(limit);
        Ok(txps)
    }

    async fn fetch_txs(&self, wallet_id: &str, query: &TxQuery) -> StorageResult<Vec<TxProposal>> {
        let mut txps: Vec<TxProposal> = self
            .txps(wallet_id)?
            .into_iter()
            .filter(|t| {
                !t.is_temporary()
                    && query.min_ts.is_none_or(|min| t.created_on >= min)
                    && query.max_ts.is_none_or(|max| t.created_on <= max)
            })
            .collect();
        newest_first(&mut txps);
        if let Some(limit) = query.limit {
            txps.truncate(limit);
        }
        Ok(txps)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    async fn store_notification(&self, notification: &Notification) -> StorageResult<()> {
        self.put_json(
            NOTIFICATIONS,
            &key2(&notification.wallet_id, &notification.id),
            notification,
        )
    }

    async fn fetch_notifications(&self, wallet_id: &str, query: &NotificationQuery) -> StorageResult<Vec<Notification>> {
        let notifications: Vec<Notification> = self.scan_prefix(NOTIFICATIONS, wallet_id)?;
        Ok(notifications
            .into_iter()
            .filter(|n| {
                n.created_on >= query.min_ts
                    && query.since_id.as_deref().is_none_or(|since| n.id.as_str() > since)
            })
            .collect())
    }

    // =========================================================================
    // Preferences, sessions, subscriptions
    // =========================================================================

    async fn store_preferences(&self, preferences: &Preferences) -> StorageResult<()> {
        self.put_json(
            PREFERENCES,
            &key2(&preferences.wallet_id, &preferences.copayer_id),
            preferences,
        )
    }

    async fn fetch_preferences(&self, wallet_id: &str, copayer_id: &str) -> StorageResult<Option<Preferences>> {
        self.get_json(PREFERENCES, &key2(wallet_id, copayer_id))
    }

    async fn store_session(&self, session: &Session) -> StorageResult<()> {
        self.put_json(SESSIONS, &session.copayer_id, session)
    }

    async fn fetch_session(&self, copayer_id: &str) -> StorageResult<Option<Session>> {
        self.get_json(SESSIONS, copayer_id)
    }

    async fn remove_session(&self, copayer_id: &str) -> StorageResult<()> {
        self.delete(SESSIONS, copayer_id)
    }

    async fn store_push_sub(&self, sub: &PushNotificationSub) -> StorageResult<()> {
        self.put_json(PUSH_SUBS, &key2(&sub.copayer_id, &sub.token), sub)
    }

    async fn remove_push_sub(&self, copayer_id: &str, token: &str) -> StorageResult<()> {
        self.delete(PUSH_SUBS, &key2(copayer_id, token))
    }

    async fn fetch_push_subs(&self, copayer_id: &str) -> StorageResult<Vec<PushNotificationSub>> {
        self.scan_prefix(PUSH_SUBS, copayer_id)
    }

    async fn store_tx_confirmation_sub(&self, sub: &TxConfirmationSub) -> StorageResult<()> {
        self.put_json(TX_CONFIRMATION_SUBS, &key2(&sub.copayer_id, &sub.txid), sub)
    }

    async fn remove_tx_confirmation_sub(&self, copayer_id: &str, txid: &str) -> StorageResult<()> {
        self.delete(TX_CONFIRMATION_SUBS, &key2(copayer_id, txid))
    }

    async fn fetch_active_tx_confirmation_subs(&self) -> StorageResult<Vec<TxConfirmationSub>> {
        let subs: Vec<TxConfirmationSub> = self.scan_all(TX_CONFIRMATION_SUBS)?;
        Ok(subs.into_iter().filter(|s| s.is_active).collect())
    }

    // =========================================================================
    // Caches
    // =========================================================================

    async fn get_wallet_cache(&self, wallet_id: &str, kind: &str, key: &str) -> StorageResult<Option<Value>> {
        self.get_json(WALLET_CACHE, &format!("{wallet_id}|{kind}|{key}"))
    }

    async fn store_wallet_cache(&self, wallet_id: &str, kind: &str, key: &str, value: &Value) -> StorageResult<()> {
        self.put_json(WALLET_CACHE, &format!("{wallet_id}|{kind}|{key}"), value)
    }

    async fn clear_wallet_cache(&self, wallet_id: &str) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut t = write_txn.open_table(WALLET_CACHE)?;
            Self::delete_prefix_in(&mut t, wallet_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn check_and_use_global_cache(&self, key: &str, max_age: Duration) -> StorageResult<CacheLookup> {
        let Some(record) = self.get_json::<GlobalCacheRecord>(GLOBAL_CACHE, key)? else {
            return Ok(CacheLookup::default());
        };
        let age_ms = now_ms() - record.updated_on;
        let fresh = (age_ms >= 0 && (age_ms as u128) < max_age.as_millis()).then(|| record.value.clone());
        Ok(CacheLookup {
            fresh,
            stale: Some(record.value),
        })
    }

    async fn store_global_cache(&self, key: &str, value: &Value) -> StorageResult<()> {
        let record = GlobalCacheRecord {
            value: value.clone(),
            updated_on: now_ms(),
        };
        self.put_json(GLOBAL_CACHE, key, &record)
    }

    // =========================================================================
    // Locks
    // =========================================================================

    async fn acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> StorageResult<bool> {
        let now = now_ms();
        let record = serde_json::to_vec(&LockRecord {
            owner: owner.to_string(),
            expire_on: now + ttl.as_millis() as i64,
        })?;
        let write_txn = self.db.begin_write()?;
        let acquired = {
            let mut t = write_txn.open_table(LOCKS)?;
            let existing = t.get(key)?.map(|v| v.value().to_vec());
            let held: Option<LockRecord> = existing.map(|bytes| serde_json::from_slice(&bytes)).transpose()?;
            match held {
                Some(held) if held.expire_on > now => false,
                Some(held) => {
                    debug!(lock_key = %key, expired_ms = now - held.expire_on, "Reclaiming expired lock");
                    t.insert(key, record.as_slice())?;
                    true
                }
                None => {
                    t.insert(key, record.as_slice())?;
                    true
                }
            }
        };
        write_txn.commit()?;
        Ok(acquired)
    }

    async fn release_lock(&self, key: &str, owner: &str) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let released = {
            let mut t = write_txn.open_table(LOCKS)?;
            let existing = t.get(key)?.map(|v| v.value().to_vec());
            let held: Option<LockRecord> = existing.map(|bytes| serde_json::from_slice(&bytes)).transpose()?;
            match held {
                Some(held) if held.owner == owner => {
                    t.remove(key)?;
                    true
                }
                Some(_) => {
                    debug!(lock_key = %key, "Lock is held by another owner, not releasing");
                    false
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(released)
    }

    // =========================================================================
    // Queues
    // =========================================================================

    async fn queue_add(&self, queue: OrderKind, payload: &str) -> StorageResult<String> {
        let record = QueueRecord {
            payload: payload.to_string(),
            visible_at: now_ms(),
            tries: 0,
            ack: None,
            deleted: false,
        };
        let bytes = serde_json::to_vec(&record)?;
        let write_txn = self.db.begin_write()?;
        let key = {
            let mut meta = write_txn.open_table(META)?;
            let seq = Self::next_seq(&mut meta, &format!("queue_seq_{}", queue.as_str()))?;
            let key = format!("{}|{seq:020}", queue.as_str());
            let mut t = write_txn.open_table(QUEUES)?;
            t.insert(key.as_str(), bytes.as_slice())?;
            key
        };
        write_txn.commit()?;
        Ok(key)
    }

    async fn queue_get(&self, queue: OrderKind, visibility: Duration) -> StorageResult<Option<QueueMessage>> {
        let now = now_ms();
        let (start, end) = prefix_bounds(queue.as_str());
        let write_txn = self.db.begin_write()?;
        let message = {
            let mut t = write_txn.open_table(QUEUES)?;
            let mut found: Option<(String, QueueRecord)> = None;
            for entry in t.range::<&str>(start.as_str()..end.as_str())? {
                let (key, value) = entry?;
                let record: QueueRecord = serde_json::from_slice(value.value())?;
                if !record.deleted && record.visible_at <= now {
                    found = Some((key.value().to_string(), record));
                    break;
                }
            }
            match found {
                Some((key, mut record)) => {
                    let token = uuid::Uuid::new_v4().simple().to_string();
                    record.visible_at = now + visibility.as_millis() as i64;
                    record.tries += 1;
                    record.ack = Some(token.clone());
                    let bytes = serde_json::to_vec(&record)?;
                    t.insert(key.as_str(), bytes.as_slice())?;
                    Some(QueueMessage {
                        ack_id: format!("{key}#{token}"),
                        payload: record.payload,
                        tries: record.tries,
                    })
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(message)
    }

    async fn queue_ack(&self, queue: OrderKind, ack_id: &str) -> StorageResult<bool> {
        let Some((key, token)) = ack_id.split_once('#') else {
            return Ok(false);
        };
        if !key.starts_with(&format!("{}|", queue.as_str())) {
            return Ok(false);
        }
        let write_txn = self.db.begin_write()?;
        let acked = {
            let mut t = write_txn.open_table(QUEUES)?;
            let existing = t.get(key)?.map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => {
                    let mut record: QueueRecord = serde_json::from_slice(&bytes)?;
                    if record.deleted || record.ack.as_deref() != Some(token) {
                        false
                    } else {
                        record.deleted = true;
                        let updated = serde_json::to_vec(&record)?;
                        t.insert(key, updated.as_slice())?;
                        true
                    }
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(acked)
    }

    async fn queue_clean(&self, queue: OrderKind) -> StorageResult<usize> {
        let (start, end) = prefix_bounds(queue.as_str());
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut t = write_txn.open_table(QUEUES)?;
            let mut keys = Vec::new();
            for entry in t.range::<&str>(start.as_str()..end.as_str())? {
                let (key, value) = entry?;
                let record: QueueRecord = serde_json::from_slice(value.value())?;
                if record.deleted {
                    keys.push(key.value().to_string());
                }
            }
            for key in &keys {
                t.remove(key.as_str())?;
            }
            keys.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // =========================================================================
    // Orders
    // =========================================================================

    async fn store_order(&self, order: &Order) -> StorageResult<()> {
        self.put_json(ORDERS, &key2(order.kind.as_str(), &order.id), order)
    }

    async fn fetch_order(&self, kind: OrderKind, order_id: &str) -> StorageResult<Option<Order>> {
        self.get_json(ORDERS, &key2(kind.as_str(), order_id))
    }

    async fn fetch_orders(&self, filter: &OrderFilter) -> StorageResult<Vec<Order>> {
        let orders: Vec<Order> = match filter.kind {
            Some(kind) => self.scan_prefix(ORDERS, kind.as_str())?,
            None => self.scan_all(ORDERS)?,
        };
        let mut orders: Vec<Order> = orders.into_iter().filter(|o| filter.matches(o)).collect();
        orders.sort_by(|a, b| b.created_on.cmp(&a.created_on));
        Ok(orders)
    }
}
