// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, policy defaults and the typed configuration
//! assembled at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the redb database | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `EXPLORER_URL` | Base URL of the blockchain explorer | `http://localhost:3000` |
//! | `EXPLORER_CHAINS` | Comma separated `coin:network` pairs served | `btc:livenet,bch:livenet,eth:livenet` |
//! | `RATES_URL` | Base URL of the exchange rate provider | `http://localhost:3100` |
//! | `SWAP_CONFIG_FILE` | JSON file with pair limits and funding wallets | unset (swap pipeline idle) |
//! | `OPERATOR_TOKEN` | Shared secret for operator endpoints | unset (operator endpoints disabled) |
//! | `BACKOFF_OFFSET` | Rejections tolerated before proposal backoff | `10` |
//! | `BACKOFF_TIME_SECS` | Proposal backoff window | `600` |
//! | `DELETE_LOCKTIME_SECS` | Grace period before a proposal can be removed | `600` |
//! | `SWAP_RATE_TOLERANCE_BPS` | Allowed rate drift for swap payouts | `500` (5%) |
//! | `ORDER_POLL_SECS` | Order queue poll interval | `30` |
//! | `MONITOR_POLL_SECS` | Chain monitor poll interval | `60` |

use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::Deserialize;

pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const EXPLORER_URL_ENV: &str = "EXPLORER_URL";
pub const EXPLORER_CHAINS_ENV: &str = "EXPLORER_CHAINS";
pub const RATES_URL_ENV: &str = "RATES_URL";
pub const SWAP_CONFIG_FILE_ENV: &str = "SWAP_CONFIG_FILE";
pub const OPERATOR_TOKEN_ENV: &str = "OPERATOR_TOKEN";
pub const BACKOFF_OFFSET_ENV: &str = "BACKOFF_OFFSET";
pub const BACKOFF_TIME_ENV: &str = "BACKOFF_TIME_SECS";
pub const DELETE_LOCKTIME_ENV: &str = "DELETE_LOCKTIME_SECS";
pub const SWAP_RATE_TOLERANCE_ENV: &str = "SWAP_RATE_TOLERANCE_BPS";
pub const ORDER_POLL_ENV: &str = "ORDER_POLL_SECS";
pub const MONITOR_POLL_ENV: &str = "MONITOR_POLL_SECS";

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_EXPLORER_URL: &str = "http://localhost:3000";
pub const DEFAULT_EXPLORER_CHAINS: &str = "btc:livenet,bch:livenet,eth:livenet";
pub const DEFAULT_RATES_URL: &str = "http://localhost:3100";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

// =============================================================================
// Policy
// =============================================================================

/// Tunable limits and timings. Defaults follow the production deployment.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Lock record TTL.
    pub lock_exe_time: Duration,
    /// Default lock acquisition wait.
    pub lock_wait_time: Duration,
    /// Lock wait for address and proposal creation.
    pub lock_wait_create: Duration,
    pub backoff_offset: usize,
    pub backoff_time: Duration,
    pub delete_locktime: Duration,
    pub max_keys: usize,
    pub max_main_address_gap: usize,
    pub scan_address_gap: usize,
    pub fee_level_cache: Duration,
    pub block_height_cache: Duration,
    /// Window in which self-broadcast proposals are treated as spent.
    pub broadcast_lookback: Duration,
    pub broadcast_lookback_limit: usize,
    pub session_expiration: Duration,
    pub notifications_timespan: Duration,
    pub rate_tolerance_bps: u64,
    pub order_poll_interval: Duration,
    pub queue_visibility: Duration,
    pub alert_cooldown: Duration,
    pub monitor_poll_interval: Duration,
    pub rate_cache_ttl: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            lock_exe_time: Duration::from_secs(40),
            lock_wait_time: Duration::from_secs(5),
            lock_wait_create: Duration::from_secs(10),
            backoff_offset: 10,
            backoff_time: Duration::from_secs(600),
            delete_locktime: Duration::from_secs(600),
            max_keys: 100,
            max_main_address_gap: 20,
            scan_address_gap: 30,
            fee_level_cache: Duration::from_secs(6 * 60),
            block_height_cache: Duration::from_secs(30 * 60),
            broadcast_lookback: Duration::from_secs(24 * 3600),
            broadcast_lookback_limit: 100,
            session_expiration: Duration::from_secs(3600),
            notifications_timespan: Duration::from_secs(14 * 24 * 3600),
            rate_tolerance_bps: 500,
            order_poll_interval: Duration::from_secs(30),
            queue_visibility: Duration::from_secs(120),
            alert_cooldown: Duration::from_secs(30 * 60),
            monitor_poll_interval: Duration::from_secs(60),
            rate_cache_ttl: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Swap configuration file
// =============================================================================

/// Limits and fees for one supported source → destination pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairConfig {
    pub from_coin: String,
    pub to_coin: String,
    pub network: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum deposit in source smallest units.
    pub min_convert_to_sat: u64,
    pub max_convert_to_sat: u64,
    /// Maximum total deposits per UTC day, source smallest units.
    pub daily_limit: u64,
    #[serde(default)]
    pub fee_percent_bps: u64,
    /// Fixed fee in destination smallest units.
    #[serde(default)]
    pub fixed_fee: u64,
    #[serde(default)]
    pub settlement_fee_usd_cents: u64,
}

fn default_true() -> bool {
    true
}

/// Operator credentials for a wallet the server signs with.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingWalletConfig {
    pub coin: String,
    pub network: String,
    pub wallet_id: String,
    pub copayer_id: String,
    /// Hex secp256k1 key registered as the copayer's request key.
    pub request_private_key: String,
    /// Hex secp256k1 key whose public key is the copayer's xPubKey.
    pub signing_private_key: String,
}

impl std::fmt::Debug for FundingWalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundingWalletConfig")
            .field("coin", &self.coin)
            .field("network", &self.network)
            .field("wallet_id", &self.wallet_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapConfig {
    #[serde(default)]
    pub pairs: Vec<PairConfig>,
    #[serde(default)]
    pub funding_wallets: Vec<FundingWalletConfig>,
}

impl SwapConfig {
    pub fn pair(&self, from_coin: &str, to_coin: &str, network: &str) -> Option<&PairConfig> {
        self.pairs
            .iter()
            .find(|p| p.from_coin == from_coin && p.to_coin == to_coin && p.network == network)
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

// =============================================================================
// Service configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub explorer_url: String,
    /// (coin, network) pairs with a configured explorer.
    pub chains: Vec<(String, String)>,
    pub rates_url: String,
    pub operator_token: Option<String>,
    pub swap: SwapConfig,
    pub policy: Policy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
            chains: parse_chains(DEFAULT_EXPLORER_CHAINS),
            rates_url: DEFAULT_RATES_URL.to_string(),
            operator_token: None,
            swap: SwapConfig::default(),
            policy: Policy::default(),
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }

        let host = env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var(PORT_ENV).unwrap_or_else(|_| "8080".to_string());
        let addr = format!("{host}:{port}");
        config.bind_addr = addr.parse().map_err(|_| ConfigError::InvalidValue {
            name: HOST_ENV,
            value: addr.clone(),
        })?;

        if let Ok(url) = env::var(EXPLORER_URL_ENV) {
            config.explorer_url = http_url(EXPLORER_URL_ENV, &url)?;
        }
        if let Ok(chains) = env::var(EXPLORER_CHAINS_ENV) {
            config.chains = parse_chains(&chains);
        }
        if let Ok(url) = env::var(RATES_URL_ENV) {
            config.rates_url = http_url(RATES_URL_ENV, &url)?;
        }
        config.operator_token = env::var(OPERATOR_TOKEN_ENV).ok().filter(|t| !t.is_empty());

        if let Ok(path) = env::var(SWAP_CONFIG_FILE_ENV) {
            config.swap = SwapConfig::load(&path)?;
        }

        let policy = &mut config.policy;
        if let Some(v) = env_parse::<usize>(BACKOFF_OFFSET_ENV)? {
            policy.backoff_offset = v;
        }
        if let Some(v) = env_parse::<u64>(BACKOFF_TIME_ENV)? {
            policy.backoff_time = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>(DELETE_LOCKTIME_ENV)? {
            policy.delete_locktime = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>(SWAP_RATE_TOLERANCE_ENV)? {
            policy.rate_tolerance_bps = v;
        }
        if let Some(v) = env_parse::<u64>(ORDER_POLL_ENV)? {
            policy.order_poll_interval = Duration::from_secs(v.max(1));
        }
        if let Some(v) = env_parse::<u64>(MONITOR_POLL_ENV)? {
            policy.monitor_poll_interval = Duration::from_secs(v.max(1));
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Validate an upstream base URL. Only http(s) is accepted.
pub fn http_url(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    };
    let url: url::Url = raw.parse().map_err(|_: url::ParseError| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    Ok(raw.trim_end_matches('/').to_string())
}

/// Parse `btc:livenet,eth:testnet` into (coin, network) pairs.
pub fn parse_chains(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (coin, network) = entry.trim().split_once(':')?;
            Some((coin.trim().to_lowercase(), network.trim().to_lowercase()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_chains_skips_malformed_entries() {
        let chains = parse_chains("btc:livenet, ETH:Testnet,bogus");
        assert_eq!(
            chains,
            vec![
                ("btc".to_string(), "livenet".to_string()),
                ("eth".to_string(), "testnet".to_string())
            ]
        );
    }

    #[test]
    fn upstream_urls_must_be_http() {
        assert_eq!(
            http_url(EXPLORER_URL_ENV, "https://api.example.com/").unwrap(),
            "https://api.example.com"
        );
        assert!(http_url(EXPLORER_URL_ENV, "ftp://api.example.com").is_err());
        assert!(http_url(RATES_URL_ENV, "not a url").is_err());
    }

    #[test]
    fn policy_defaults() {
        let policy = Policy::default();
        assert_eq!(policy.backoff_offset, 10);
        assert_eq!(policy.backoff_time, Duration::from_secs(600));
        assert_eq!(policy.rate_tolerance_bps, 500);
        assert_eq!(policy.lock_wait_create, Duration::from_secs(10));
    }

    #[test]
    fn swap_config_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swap.json");
        std::fs::write(
            &path,
            r#"{
                "pairs": [{
                    "fromCoin": "btc", "toCoin": "eth", "network": "livenet",
                    "minConvertToSat": 10000, "maxConvertToSat": 100000000,
                    "dailyLimit": 500000000, "feePercentBps": 50
                }],
                "fundingWallets": []
            }"#,
        )
        .unwrap();

        let config = SwapConfig::load(path.to_str().unwrap()).unwrap();
        let pair = config.pair("btc", "eth", "livenet").unwrap();
        assert!(pair.enabled);
        assert_eq!(pair.min_convert_to_sat, 10_000);
        assert_eq!(pair.fee_percent_bps, 50);
        assert!(config.pair("eth", "btc", "livenet").is_none());
    }
}
