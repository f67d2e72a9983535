// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Blockchain Explorer Adapter
//!
//! The service never talks to a node directly: every on-chain fact (UTXOs,
//! balances, history, fee estimates, tip height) comes from an indexing
//! explorer that tracks registered wallets and their addresses.
//!
//! All calls are fallible; callers decide whether to fail, retry or fall back
//! to cached values.

pub mod v8;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Utxo, Wallet};

pub use v8::V8Explorer;

#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("explorer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("explorer response was invalid: {0}")]
    Decode(String),

    #[error("explorer rejected transaction: {0}")]
    Rejected(String),

    #[error("{0} not supported by this explorer")]
    NotSupported(&'static str),
}

impl ExplorerError {
    /// The explorer does not know the wallet (it must be registered again).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

pub type ExplorerResult<T> = Result<T, ExplorerError>;

/// Explorer-side view used to detect address set drift.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckData {
    pub sum: u64,
    #[serde(default)]
    pub last_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChainBalance {
    pub confirmed: u64,
    pub unconfirmed: u64,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTip {
    pub height: u64,
    #[serde(default)]
    pub hash: String,
}

/// A transaction as the explorer reports it by txid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTx {
    pub txid: String,
    /// Negative while unconfirmed.
    pub block_height: i64,
    #[serde(default)]
    pub fee: Option<u64>,
}

impl ChainTx {
    pub fn confirmations(&self, tip: u64) -> u64 {
        if self.block_height < 0 {
            return 0;
        }
        (tip + 1).saturating_sub(self.block_height as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TxCategory {
    Receive,
    Send,
    Move,
}

/// One wallet-level history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WalletTx {
    pub txid: String,
    pub category: TxCategory,
    pub satoshis: u64,
    /// Negative while unconfirmed.
    pub height: i64,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub block_time: Option<String>,
}

#[async_trait]
pub trait BlockchainExplorer: Send + Sync {
    fn coin(&self) -> &str;
    fn network(&self) -> &str;

    async fn register(&self, wallet: &Wallet) -> ExplorerResult<()>;
    async fn add_addresses(&self, wallet: &Wallet, addresses: &[String]) -> ExplorerResult<()>;
    async fn get_check_data(&self, wallet: &Wallet) -> ExplorerResult<CheckData>;
    /// Whether the address has ever been used on-chain.
    async fn get_address_activity(&self, address: &str) -> ExplorerResult<bool>;
    async fn get_utxos(&self, wallet: &Wallet, height: u64) -> ExplorerResult<Vec<Utxo>>;
    async fn get_address_utxos(&self, address: &str, height: u64) -> ExplorerResult<Vec<Utxo>>;
    /// Account-model balance.
    async fn get_balance(&self, wallet: &Wallet) -> ExplorerResult<ChainBalance>;
    /// History, unconfirmed first, then newest confirmed first.
    async fn get_transactions(&self, wallet: &Wallet, since_height: Option<u64>) -> ExplorerResult<Vec<WalletTx>>;
    /// `None` when the explorer does not know the txid.
    async fn get_transaction(&self, txid: &str) -> ExplorerResult<Option<ChainTx>>;
    /// Account nonce.
    async fn get_transaction_count(&self, address: &str) -> ExplorerResult<u64>;
    /// Fee rate in coin units per kB for each confirmation target that
    /// produced an estimate.
    async fn estimate_fee(&self, points: &[u32]) -> ExplorerResult<BTreeMap<u32, f64>>;
    /// Submit a raw transaction; returns the txid the network assigned.
    async fn broadcast(&self, raw_tx: &str) -> ExplorerResult<String>;
    async fn get_blockchain_height(&self) -> ExplorerResult<BlockTip>;
}

// =============================================================================
// Registry
// =============================================================================

/// Explorers keyed by (coin, network).
#[derive(Clone, Default)]
pub struct ExplorerRegistry {
    explorers: HashMap<(String, String), Arc<dyn BlockchainExplorer>>,
}

impl ExplorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One V8 client per configured (coin, network).
    pub fn from_config(url: &str, chains: &[(String, String)]) -> ExplorerResult<Self> {
        let mut registry = Self::new();
        for (coin, network) in chains {
            let explorer = V8Explorer::new(url, coin, network)?;
            registry.insert(Arc::new(explorer));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, explorer: Arc<dyn BlockchainExplorer>) {
        let key = (explorer.coin().to_string(), explorer.network().to_string());
        self.explorers.insert(key, explorer);
    }

    pub fn get(&self, coin: &str, network: &str) -> Option<Arc<dyn BlockchainExplorer>> {
        self.explorers
            .get(&(coin.to_string(), network.to_string()))
            .cloned()
    }

    pub fn chains(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.explorers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmations_from_tip() {
        let tx = ChainTx {
            txid: "t".into(),
            block_height: 100,
            fee: None,
        };
        assert_eq!(tx.confirmations(100), 1);
        assert_eq!(tx.confirmations(105), 6);
        let unconfirmed = ChainTx {
            block_height: -1,
            ..tx
        };
        assert_eq!(unconfirmed.confirmations(105), 0);
    }

    #[test]
    fn registry_lookup() {
        let registry =
            ExplorerRegistry::from_config("http://localhost:3000", &[("btc".into(), "livenet".into())]).unwrap();
        assert!(registry.get("btc", "livenet").is_some());
        assert!(registry.get("btc", "testnet").is_none());
        assert_eq!(registry.chains(), vec![("btc".to_string(), "livenet".to_string())]);
    }

    #[test]
    fn not_found_detection() {
        let err = ExplorerError::Status {
            status: 404,
            body: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!ExplorerError::Decode("x".into()).is_not_found());
    }
}
