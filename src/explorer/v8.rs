// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! REST client for a V8-style indexing explorer API.
//!
//! Base URL: `{url}/api/{COIN}/{network}` where `livenet` maps to `mainnet`.
//! Wallets are tracked explorer-side under the wallet id.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    BlockTip, BlockchainExplorer, ChainBalance, ChainTx, CheckData, ExplorerError, ExplorerResult,
    TxCategory, WalletTx,
};
use crate::models::{Utxo, Wallet};

/// V8 marks conflicting / invalid spends with heights at or below this.
const SPENT_HEIGHT_CONFLICTING: i64 = -3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V8Coin {
    mint_txid: String,
    mint_index: u32,
    address: String,
    value: u64,
    mint_height: i64,
    #[serde(default)]
    spent_height: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V8WalletTx {
    txid: String,
    category: TxCategory,
    satoshis: i64,
    height: i64,
    #[serde(default)]
    fee: Option<i64>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    block_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V8Fee {
    feerate: f64,
    #[serde(default)]
    blocks: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct V8Nonce {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct V8Broadcast {
    #[serde(default)]
    txid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct V8Tx {
    txid: String,
    block_height: i64,
    #[serde(default)]
    fee: Option<i64>,
}

#[derive(Debug, Serialize)]
struct V8Address<'a> {
    address: &'a str,
}

fn v8_network(network: &str) -> &str {
    match network {
        "livenet" => "mainnet",
        other => other,
    }
}

fn transform_utxos(coins: Vec<V8Coin>, height: u64) -> Vec<Utxo> {
    coins
        .into_iter()
        .filter(|c| c.spent_height.is_none_or(|h| h > SPENT_HEIGHT_CONFLICTING))
        .map(|c| Utxo {
            confirmations: if c.mint_height > 0 {
                (height + 1).saturating_sub(c.mint_height as u64) as u32
            } else {
                0
            },
            txid: c.mint_txid,
            vout: c.mint_index,
            address: c.address,
            satoshis: c.value,
            path: None,
            public_keys: Vec::new(),
            locked: false,
        })
        .collect()
}

/// Parse a newline-delimited transaction stream and order it unconfirmed
/// first, then confirmed newest first.
fn parse_transactions(body: &str) -> ExplorerResult<Vec<WalletTx>> {
    let mut confirmed = Vec::new();
    let mut unconfirmed = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let raw: V8WalletTx =
            serde_json::from_str(line).map_err(|e| ExplorerError::Decode(format!("transaction line: {e}")))?;
        let tx = WalletTx {
            txid: raw.txid,
            category: raw.category,
            satoshis: raw.satoshis.unsigned_abs(),
            height: raw.height,
            fee: raw.fee.map(i64::unsigned_abs),
            address: raw.address,
            block_time: raw.block_time,
        };
        if tx.height >= 0 {
            confirmed.push(tx);
        } else {
            unconfirmed.push(tx);
        }
    }
    unconfirmed.sort_by(|a, b| b.block_time.cmp(&a.block_time));
    confirmed.reverse();
    unconfirmed.extend(confirmed);
    Ok(unconfirmed)
}

#[derive(Debug, Clone)]
pub struct V8Explorer {
    coin: String,
    network: String,
    base_url: String,
    http: Client,
}

impl V8Explorer {
    pub fn new(url: &str, coin: &str, network: &str) -> ExplorerResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url = format!(
            "{}/api/{}/{}",
            url.trim_end_matches('/'),
            coin.to_uppercase(),
            v8_network(network)
        );
        info!(coin, network, base_url = %base_url, "Explorer client configured");
        Ok(Self {
            coin: coin.to_string(),
            network: network.to_string(),
            base_url,
            http,
        })
    }

    async fn check(response: reqwest::Response) -> ExplorerResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ExplorerError::Status { status, body })
    }

    async fn get_text(&self, path: &str) -> ExplorerResult<String> {
        let response = self.http.get(format!("{}{}", self.base_url, path)).send().await?;
        Ok(Self::check(response).await?.text().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ExplorerResult<T> {
        let response = self.http.get(format!("{}{}", self.base_url, path)).send().await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ExplorerError::Decode(format!("GET {path}: {e}")))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> ExplorerResult<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ExplorerError::Decode(format!("POST {path}: {e}")))
    }
}

#[async_trait]
impl BlockchainExplorer for V8Explorer {
    fn coin(&self) -> &str {
        &self.coin
    }

    fn network(&self) -> &str {
        &self.network
    }

    async fn register(&self, wallet: &Wallet) -> ExplorerResult<()> {
        let payload = json!({
            "name": wallet.id,
            "pubKey": wallet.id,
            "network": v8_network(&self.network),
            "chain": self.coin.to_uppercase(),
        });
        let _: serde_json::Value = self.post_json("/wallet/", &payload).await?;
        debug!(wallet_id = %wallet.id, "Wallet registered with explorer");
        Ok(())
    }

    async fn add_addresses(&self, wallet: &Wallet, addresses: &[String]) -> ExplorerResult<()> {
        let payload: Vec<V8Address<'_>> = addresses.iter().map(|a| V8Address { address: a }).collect();
        let _: serde_json::Value = self.post_json(&format!("/wallet/{}", wallet.id), &payload).await?;
        Ok(())
    }

    async fn get_check_data(&self, wallet: &Wallet) -> ExplorerResult<CheckData> {
        self.get_json(&format!("/wallet/{}/check", wallet.id)).await
    }

    async fn get_address_activity(&self, address: &str) -> ExplorerResult<bool> {
        let txs: Vec<serde_json::Value> = self.get_json(&format!("/address/{address}/txs?limit=1")).await?;
        Ok(!txs.is_empty())
    }

    async fn get_utxos(&self, wallet: &Wallet, height: u64) -> ExplorerResult<Vec<Utxo>> {
        let coins: Vec<V8Coin> = self.get_json(&format!("/wallet/{}/utxos", wallet.id)).await?;
        Ok(transform_utxos(coins, height))
    }

    async fn get_address_utxos(&self, address: &str, height: u64) -> ExplorerResult<Vec<Utxo>> {
        let coins: Vec<V8Coin> = self.get_json(&format!("/address/{address}/?unspent=true")).await?;
        Ok(transform_utxos(coins, height))
    }

    async fn get_balance(&self, wallet: &Wallet) -> ExplorerResult<ChainBalance> {
        self.get_json(&format!("/wallet/{}/balance", wallet.id)).await
    }

    async fn get_transactions(&self, wallet: &Wallet, since_height: Option<u64>) -> ExplorerResult<Vec<WalletTx>> {
        let mut path = format!("/wallet/{}/transactions?includeMempool=true", wallet.id);
        if let Some(height) = since_height {
            path.push_str(&format!("&startBlock={height}"));
        }
        let body = self.get_text(&path).await?;
        parse_transactions(&body)
    }

    async fn get_transaction(&self, txid: &str) -> ExplorerResult<Option<ChainTx>> {
        match self.get_json::<V8Tx>(&format!("/tx/{txid}")).await {
            Ok(tx) => Ok(Some(ChainTx {
                txid: tx.txid,
                block_height: tx.block_height,
                fee: tx.fee.map(i64::unsigned_abs),
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_transaction_count(&self, address: &str) -> ExplorerResult<u64> {
        let nonce: V8Nonce = self.get_json(&format!("/address/{address}/txs/count")).await?;
        Ok(nonce.nonce)
    }

    async fn estimate_fee(&self, points: &[u32]) -> ExplorerResult<BTreeMap<u32, f64>> {
        let mut result = BTreeMap::new();
        for &point in points {
            let fee: V8Fee = self.get_json(&format!("/fee/{point}")).await?;
            if fee.blocks.is_some_and(|b| b != point) {
                debug!(point, blocks = ?fee.blocks, "Ignoring fee estimate for another target");
                continue;
            }
            result.insert(point, fee.feerate);
        }
        Ok(result)
    }

    async fn broadcast(&self, raw_tx: &str) -> ExplorerResult<String> {
        let payload = json!({
            "rawTx": raw_tx,
            "network": v8_network(&self.network),
            "chain": self.coin.to_uppercase(),
        });
        let response: V8Broadcast = self.post_json("/tx/send", &payload).await?;
        response.txid.ok_or_else(|| {
            warn!(coin = %self.coin, "Broadcast response carried no txid");
            ExplorerError::Rejected("no txid in broadcast response".to_string())
        })
    }

    async fn get_blockchain_height(&self) -> ExplorerResult<BlockTip> {
        self.get_json("/block/tip").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_uses_v8_network_names() {
        let explorer = V8Explorer::new("http://explorer:3000/", "btc", "livenet").unwrap();
        assert_eq!(explorer.base_url, "http://explorer:3000/api/BTC/mainnet");
        let explorer = V8Explorer::new("http://explorer:3000", "bch", "testnet").unwrap();
        assert_eq!(explorer.base_url, "http://explorer:3000/api/BCH/testnet");
    }

    #[test]
    fn utxo_transform_computes_confirmations_and_drops_conflicts() {
        let coins: Vec<V8Coin> = serde_json::from_value(json!([
            {"mintTxid": "a", "mintIndex": 0, "address": "x", "value": 1000, "mintHeight": 95, "spentHeight": -2},
            {"mintTxid": "b", "mintIndex": 1, "address": "x", "value": 2000, "mintHeight": -1, "spentHeight": -2},
            {"mintTxid": "c", "mintIndex": 0, "address": "x", "value": 3000, "mintHeight": 90, "spentHeight": -3}
        ]))
        .unwrap();
        let utxos = transform_utxos(coins, 100);
        assert_eq!(utxos.len(), 2);
        assert_eq!(utxos[0].confirmations, 6);
        assert_eq!(utxos[1].confirmations, 0);
        assert_eq!(utxos[1].key(), "b|1");
    }

    #[test]
    fn transaction_stream_orders_unconfirmed_first() {
        let body = [
            r#"{"txid":"old","category":"receive","satoshis":100,"height":10}"#,
            r#"{"txid":"new","category":"send","satoshis":-50,"height":12,"fee":-5}"#,
            "",
            r#"{"txid":"mem","category":"receive","satoshis":7,"height":-1,"blockTime":"2026-01-01"}"#,
        ]
        .join("\n");
        let txs = parse_transactions(&body).unwrap();
        let ids: Vec<_> = txs.iter().map(|t| t.txid.as_str()).collect();
        assert_eq!(ids, vec!["mem", "new", "old"]);
        assert_eq!(txs[1].satoshis, 50);
        assert_eq!(txs[1].fee, Some(5));
        assert!(parse_transactions("not json").is_err());
    }
}
