// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Test fixtures: deterministic keys, a scripted explorer, a scripted rate
//! provider and wallet setup helpers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use tempfile::TempDir;

use crate::config::{FundingWalletConfig, PairConfig, ServiceConfig};
use crate::context::AppContext;
use crate::crypto;
use crate::explorer::{
    BlockTip, BlockchainExplorer, ChainBalance, ChainTx, CheckData, ExplorerError, ExplorerRegistry,
    ExplorerResult, WalletTx,
};
use crate::models::{Copayer, TxProposal, Utxo, Wallet};
use crate::service::{AddressOpts, CreateWalletOpts, JoinWalletOpts, WalletService};
use crate::storage::RedbStorage;
use crate::swap::alerts::AlertSink;
use crate::swap::rates::{RateError, RateProvider, RateResult};

// =============================================================================
// Keys and copayers
// =============================================================================

/// Deterministic secp256k1 key.
pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

/// Key that signs join requests for wallets made by [`create_wallet`].
const WALLET_KEY_SEED: u8 = 1;

pub struct TestCopayer {
    pub id: String,
    pub name: String,
    pub coin: String,
    pub xpriv: SigningKey,
    pub request_key: SigningKey,
    pub x_pub_key: String,
    pub request_pub_key: String,
    /// Set by [`join_opts`].
    wallet_id: Mutex<String>,
}

impl TestCopayer {
    pub fn new(seed: u8) -> Self {
        Self::for_coin(seed, "btc")
    }

    pub fn for_coin(seed: u8, coin: &str) -> Self {
        let xpriv = key(seed);
        let request_key = key(seed.wrapping_add(100));
        let x_pub_key = crypto::public_key_hex(&xpriv);
        Self {
            id: Copayer::id_for(coin, &x_pub_key),
            name: format!("copayer-{seed}"),
            coin: coin.to_string(),
            request_pub_key: crypto::public_key_hex(&request_key),
            x_pub_key,
            xpriv,
            request_key,
            wallet_id: Mutex::new(String::new()),
        }
    }

    pub fn wallet_id(&self) -> String {
        self.wallet_id.lock().unwrap().clone()
    }

    pub fn service(&self, ctx: &Arc<AppContext>) -> WalletService {
        WalletService::bound(ctx.clone(), &self.wallet_id(), &self.id)
    }
}

/// Join request for `copayer`, signed with the key of seed `wallet_key_seed`.
pub fn join_opts(wallet_id: &str, copayer: &TestCopayer, wallet_key_seed: u8) -> JoinWalletOpts {
    *copayer.wallet_id.lock().unwrap() = wallet_id.to_string();
    let hash = crypto::copayer_hash(&copayer.name, &copayer.x_pub_key, &copayer.request_pub_key);
    JoinWalletOpts {
        wallet_id: wallet_id.to_string(),
        coin: copayer.coin.clone(),
        name: copayer.name.clone(),
        x_pub_key: copayer.x_pub_key.clone(),
        request_pub_key: copayer.request_pub_key.clone(),
        copayer_signature: crypto::sign_message(&key(wallet_key_seed), &hash),
        custom_data: None,
    }
}

pub fn wallet_opts(m: u32, n: u32, coin: &str) -> CreateWalletOpts {
    CreateWalletOpts {
        id: None,
        name: "test wallet".into(),
        m,
        n,
        pub_key: crypto::public_key_hex(&key(WALLET_KEY_SEED)),
        coin: coin.into(),
        network: "livenet".into(),
        single_address: false,
    }
}

pub async fn create_wallet(ctx: &Arc<AppContext>, m: u32, n: u32, coin: &str) -> String {
    WalletService::anonymous(ctx.clone())
        .create_wallet(wallet_opts(m, n, coin))
        .await
        .unwrap()
}

/// A complete m-of-n wallet. Copayer seeds start at 11.
pub async fn setup_wallet(ctx: &Arc<AppContext>, m: u32, n: u32, coin: &str) -> (String, Vec<TestCopayer>) {
    let wallet_id = create_wallet(ctx, m, n, coin).await;
    let service = WalletService::anonymous(ctx.clone());
    let mut copayers = Vec::new();
    for i in 0..n {
        let copayer = TestCopayer::for_coin(11 + i as u8, coin);
        service
            .join_wallet(join_opts(&wallet_id, &copayer, WALLET_KEY_SEED))
            .await
            .unwrap();
        copayers.push(copayer);
    }
    (wallet_id, copayers)
}

/// One signature per input, as a copayer would produce them.
pub fn sign_inputs(txp: &TxProposal, key: &SigningKey) -> Vec<String> {
    let raw = txp.raw_tx();
    (0..txp.inputs.len().max(1))
        .map(|i| crypto::sign_message(key, &TxProposal::sighash(&raw, i)))
        .collect()
}

pub fn utxo(txid: &str, vout: u32, address: &str, satoshis: u64, confirmations: u32) -> Utxo {
    Utxo {
        txid: txid.to_string(),
        vout,
        address: address.to_string(),
        satoshis,
        confirmations,
        path: None,
        public_keys: Vec::new(),
        locked: false,
    }
}

// =============================================================================
// Mock explorer
// =============================================================================

struct MockState {
    utxos: Vec<Utxo>,
    active: HashSet<String>,
    balance: ChainBalance,
    fees: BTreeMap<u32, f64>,
    fail_fees: bool,
    height: u64,
    fail_height: bool,
    check_sum: Option<u64>,
    registrations: usize,
    register_delay: Duration,
    added: Vec<String>,
    broadcasts: Vec<String>,
    fail_broadcast: bool,
    known: HashMap<String, i64>,
    history: Vec<WalletTx>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            utxos: Vec::new(),
            active: HashSet::new(),
            balance: ChainBalance::default(),
            fees: BTreeMap::new(),
            fail_fees: false,
            height: 100,
            fail_height: false,
            check_sum: None,
            registrations: 0,
            register_delay: Duration::ZERO,
            added: Vec::new(),
            broadcasts: Vec::new(),
            fail_broadcast: false,
            known: HashMap::new(),
            history: Vec::new(),
        }
    }
}

/// Scripted explorer. Handles made with [`MockExplorer::for_chain`] share
/// state, so one handle can stand in for every chain.
pub struct MockExplorer {
    coin: String,
    network: String,
    state: Arc<Mutex<MockState>>,
}

impl MockExplorer {
    pub fn new(coin: &str, network: &str) -> Self {
        Self {
            coin: coin.to_string(),
            network: network.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    pub fn for_chain(&self, coin: &str, network: &str) -> Self {
        Self {
            coin: coin.to_string(),
            network: network.to_string(),
            state: self.state.clone(),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_utxos(&self, utxos: Vec<Utxo>) {
        self.with(|s| s.utxos = utxos);
    }

    pub fn set_active(&self, address: &str) {
        self.with(|s| s.active.insert(address.to_string()));
    }

    pub fn set_balance(&self, balance: u64, confirmed: u64) {
        self.with(|s| {
            s.balance = ChainBalance {
                confirmed,
                unconfirmed: balance.saturating_sub(confirmed),
                balance,
            }
        });
    }

    pub fn set_fees(&self, samples: &[(u32, f64)]) {
        self.with(|s| s.fees = samples.iter().copied().collect());
    }

    pub fn fail_fees(&self, fail: bool) {
        self.with(|s| s.fail_fees = fail);
    }

    pub fn set_height(&self, height: u64) {
        self.with(|s| s.height = height);
    }

    pub fn fail_height(&self, fail: bool) {
        self.with(|s| s.fail_height = fail);
    }

    /// `None` makes the explorer report wallet checks as unsupported.
    pub fn set_check_sum(&self, sum: Option<u64>) {
        self.with(|s| s.check_sum = sum);
    }

    /// Hold every `register` call open for `delay` before it completes.
    pub fn set_register_delay(&self, delay: Duration) {
        self.with(|s| s.register_delay = delay);
    }

    pub fn registrations(&self) -> usize {
        self.with(|s| s.registrations)
    }

    pub fn added_addresses(&self) -> Vec<String> {
        self.with(|s| s.added.clone())
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.with(|s| s.broadcasts.clone())
    }

    pub fn fail_broadcast(&self, fail: bool) {
        self.with(|s| s.fail_broadcast = fail);
    }

    pub fn set_known_tx(&self, txid: &str, height: i64) {
        self.with(|s| s.known.insert(txid.to_string(), height));
    }

    pub fn set_history(&self, history: Vec<WalletTx>) {
        self.with(|s| s.history = history);
    }
}

#[async_trait]
impl BlockchainExplorer for MockExplorer {
    fn coin(&self) -> &str {
        &self.coin
    }

    fn network(&self) -> &str {
        &self.network
    }

    async fn register(&self, _wallet: &Wallet) -> ExplorerResult<()> {
        let delay = self.with(|s| s.register_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| s.registrations += 1);
        Ok(())
    }

    async fn add_addresses(&self, _wallet: &Wallet, addresses: &[String]) -> ExplorerResult<()> {
        self.with(|s| s.added.extend(addresses.iter().cloned()));
        Ok(())
    }

    async fn get_check_data(&self, _wallet: &Wallet) -> ExplorerResult<CheckData> {
        match self.with(|s| s.check_sum) {
            Some(sum) => Ok(CheckData {
                sum,
                last_address: None,
            }),
            None => Err(ExplorerError::NotSupported("wallet check")),
        }
    }

    async fn get_address_activity(&self, address: &str) -> ExplorerResult<bool> {
        Ok(self.with(|s| s.active.contains(address)))
    }

    async fn get_utxos(&self, _wallet: &Wallet, _height: u64) -> ExplorerResult<Vec<Utxo>> {
        Ok(self.with(|s| s.utxos.clone()))
    }

    async fn get_address_utxos(&self, address: &str, _height: u64) -> ExplorerResult<Vec<Utxo>> {
        Ok(self.with(|s| s.utxos.iter().filter(|u| u.address == address).cloned().collect()))
    }

    async fn get_balance(&self, _wallet: &Wallet) -> ExplorerResult<ChainBalance> {
        Ok(self.with(|s| s.balance.clone()))
    }

    async fn get_transactions(&self, _wallet: &Wallet, _since_height: Option<u64>) -> ExplorerResult<Vec<WalletTx>> {
        Ok(self.with(|s| s.history.clone()))
    }

    async fn get_transaction(&self, txid: &str) -> ExplorerResult<Option<ChainTx>> {
        Ok(self.with(|s| {
            s.known.get(txid).map(|height| ChainTx {
                txid: txid.to_string(),
                block_height: *height,
                fee: None,
            })
        }))
    }

    async fn get_transaction_count(&self, _address: &str) -> ExplorerResult<u64> {
        Ok(0)
    }

    async fn estimate_fee(&self, _points: &[u32]) -> ExplorerResult<BTreeMap<u32, f64>> {
        self.with(|s| {
            if s.fail_fees {
                Err(ExplorerError::Status {
                    status: 500,
                    body: "fee estimation down".into(),
                })
            } else {
                Ok(s.fees.clone())
            }
        })
    }

    async fn broadcast(&self, raw_tx: &str) -> ExplorerResult<String> {
        let bytes = hex::decode(raw_tx).map_err(|e| ExplorerError::Decode(e.to_string()))?;
        let txid = crypto::double_sha256_hex(&bytes);
        self.with(|s| {
            if s.fail_broadcast {
                return Err(ExplorerError::Rejected("txn-mempool-conflict".into()));
            }
            s.broadcasts.push(txid.clone());
            Ok(txid)
        })
    }

    async fn get_blockchain_height(&self) -> ExplorerResult<BlockTip> {
        self.with(|s| {
            if s.fail_height {
                Err(ExplorerError::Status {
                    status: 502,
                    body: "node unavailable".into(),
                })
            } else {
                Ok(BlockTip {
                    height: s.height,
                    hash: format!("block-{}", s.height),
                })
            }
        })
    }
}

// =============================================================================
// Mock rates and alerts
// =============================================================================

#[derive(Default)]
pub struct MockRates {
    prices: Mutex<HashMap<String, f64>>,
    failing: Mutex<bool>,
}

impl MockRates {
    pub fn set_price(&self, coin: &str, usd: f64) {
        self.prices.lock().unwrap().insert(coin.to_string(), usd);
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl RateProvider for MockRates {
    async fn usd_price(&self, coin: &str) -> RateResult<f64> {
        if *self.failing.lock().unwrap() {
            return Err(RateError::Status { status: 503 });
        }
        self.prices
            .lock()
            .unwrap()
            .get(coin)
            .copied()
            .ok_or_else(|| RateError::Unavailable(coin.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn send(&self, key: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((key.to_string(), message.to_string()));
    }
}

// =============================================================================
// Contexts
// =============================================================================

const CHAINS: [&str; 5] = ["btc", "bch", "ltc", "doge", "eth"];

fn build_context(
    dir: &TempDir,
    mut config: ServiceConfig,
    explorers: ExplorerRegistry,
    rates: Arc<MockRates>,
    alerts: Arc<RecordingSink>,
) -> Arc<AppContext> {
    config.data_dir = dir.path().to_path_buf();
    let storage = RedbStorage::open(&dir.path().join("test.redb")).unwrap();
    Arc::new(AppContext::new(config, Arc::new(storage), explorers, rates, alerts).unwrap())
}

/// Fresh storage with one shared mock explorer registered for every chain
/// on livenet.
pub fn test_context() -> (TempDir, Arc<AppContext>, Arc<MockExplorer>) {
    let dir = tempfile::tempdir().unwrap();
    let explorer = Arc::new(MockExplorer::new("btc", "livenet"));
    let mut explorers = ExplorerRegistry::new();
    for coin in CHAINS {
        explorers.insert(Arc::new(explorer.for_chain(coin, "livenet")));
    }
    let ctx = build_context(
        &dir,
        ServiceConfig::default(),
        explorers,
        Arc::new(MockRates::default()),
        Arc::new(RecordingSink::default()),
    );
    (dir, ctx, explorer)
}

/// A btc → bch swap deployment with funded operator wallets.
pub struct SwapFixture {
    pub _dir: TempDir,
    pub ctx: Arc<AppContext>,
    pub btc: Arc<MockExplorer>,
    pub bch: Arc<MockExplorer>,
    pub rates: Arc<MockRates>,
    pub alerts: Arc<RecordingSink>,
}

struct FundingKeys {
    coin: &'static str,
    wallet_id: &'static str,
    request: SigningKey,
    signing: SigningKey,
}

impl FundingKeys {
    fn new(coin: &'static str, wallet_id: &'static str, seed: u8) -> Self {
        Self {
            coin,
            wallet_id,
            request: key(seed + 10),
            signing: key(seed),
        }
    }

    fn copayer_id(&self) -> String {
        Copayer::id_for(self.coin, &crypto::public_key_hex(&self.signing))
    }

    fn config(&self) -> FundingWalletConfig {
        FundingWalletConfig {
            coin: self.coin.into(),
            network: "livenet".into(),
            wallet_id: self.wallet_id.into(),
            copayer_id: self.copayer_id(),
            request_private_key: hex::encode(self.request.to_bytes()),
            signing_private_key: hex::encode(self.signing.to_bytes()),
        }
    }

    async fn create(&self, ctx: &Arc<AppContext>) {
        let service = WalletService::anonymous(ctx.clone());
        service
            .create_wallet(CreateWalletOpts {
                id: Some(self.wallet_id.into()),
                name: format!("{} funding", self.coin),
                m: 1,
                n: 1,
                pub_key: crypto::public_key_hex(&key(WALLET_KEY_SEED)),
                coin: self.coin.into(),
                network: "livenet".into(),
                single_address: false,
            })
            .await
            .unwrap();
        let x_pub_key = crypto::public_key_hex(&self.signing);
        let request_pub_key = crypto::public_key_hex(&self.request);
        let hash = crypto::copayer_hash("operator", &x_pub_key, &request_pub_key);
        service
            .join_wallet(JoinWalletOpts {
                wallet_id: self.wallet_id.into(),
                coin: self.coin.into(),
                name: "operator".into(),
                x_pub_key,
                request_pub_key,
                copayer_signature: crypto::sign_message(&key(WALLET_KEY_SEED), &hash),
                custom_data: None,
            })
            .await
            .unwrap();
    }
}

pub async fn swap_context() -> SwapFixture {
    let dir = tempfile::tempdir().unwrap();
    let btc_keys = FundingKeys::new("btc", "funding-btc", 51);
    let bch_keys = FundingKeys::new("bch", "funding-bch", 52);

    let mut config = ServiceConfig::default();
    config.swap.pairs = vec![PairConfig {
        from_coin: "btc".into(),
        to_coin: "bch".into(),
        network: "livenet".into(),
        enabled: true,
        min_convert_to_sat: 50_000,
        max_convert_to_sat: 10_000_000,
        daily_limit: 100_000_000,
        fee_percent_bps: 100,
        fixed_fee: 1_000,
        settlement_fee_usd_cents: 200,
    }];
    config.swap.funding_wallets = vec![btc_keys.config(), bch_keys.config()];

    let btc = Arc::new(MockExplorer::new("btc", "livenet"));
    let bch = Arc::new(MockExplorer::new("bch", "livenet"));
    let mut explorers = ExplorerRegistry::new();
    explorers.insert(btc.clone());
    explorers.insert(bch.clone());
    let rates = Arc::new(MockRates::default());
    let alerts = Arc::new(RecordingSink::default());
    let ctx = build_context(&dir, config, explorers, rates.clone(), alerts.clone());

    btc_keys.create(&ctx).await;
    bch_keys.create(&ctx).await;
    let float = WalletService::bound(ctx.clone(), bch_keys.wallet_id, &bch_keys.copayer_id())
        .create_address(AddressOpts::default())
        .await
        .unwrap();
    bch.set_utxos(vec![utxo("float", 0, &float.address, 50_000_000, 6)]);

    SwapFixture {
        _dir: dir,
        ctx,
        btc,
        bch,
        rates,
        alerts,
    }
}
