// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Exchange rates for the order pipeline.
//!
//! Prices come from an external provider as USD per whole coin. Conversions
//! between coins use [`Rate`], an integer fixed-point ratio of destination
//! smallest units per source smallest unit, so limits and drift checks never
//! touch floating point once a price has been fetched.
//!
//! Price snapshots are cached in an LRU with a TTL. When the provider fails
//! the last snapshot is served regardless of age.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

/// Fixed-point scale of [`Rate`].
pub const RATE_SCALE: u128 = 1_000_000_000_000;
/// Prices are truncated to micro-dollars before any integer math.
const USD_MICROS: f64 = 1_000_000.0;
const CACHE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum RateError {
    #[error("rate request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate provider returned {status}")]
    Status { status: u16 },

    #[error("no usable price for {0}")]
    Unavailable(String),

    #[error("amount overflows for {0}")]
    Overflow(String),
}

pub type RateResult<T> = Result<T, RateError>;

/// Decimal places of a coin's smallest unit.
pub fn coin_decimals(coin: &str) -> u32 {
    match coin {
        "eth" => 18,
        _ => 8,
    }
}

/// Destination smallest units per source smallest unit, scaled by
/// [`RATE_SCALE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rate(pub u128);

impl Rate {
    /// Rate between two coins from their USD prices in micro-dollars.
    pub fn from_usd_micros(from_coin: &str, from_price: u128, to_coin: &str, to_price: u128) -> RateResult<Self> {
        if from_price == 0 || to_price == 0 {
            return Err(RateError::Unavailable(format!("{from_coin}/{to_coin}")));
        }
        let ratio = from_price
            .checked_mul(RATE_SCALE)
            .ok_or_else(|| RateError::Overflow(format!("{from_coin}/{to_coin}")))?
            / to_price;
        let (from_dec, to_dec) = (coin_decimals(from_coin), coin_decimals(to_coin));
        let scaled = if to_dec >= from_dec {
            ratio.checked_mul(10u128.pow(to_dec - from_dec))
        } else {
            Some(ratio / 10u128.pow(from_dec - to_dec))
        };
        scaled
            .map(Rate)
            .ok_or_else(|| RateError::Overflow(format!("{from_coin}/{to_coin}")))
    }

    /// Convert a source amount to destination units, rounding down.
    pub fn convert(&self, amount: u64) -> Option<u64> {
        let converted = u128::from(amount).checked_mul(self.0)? / RATE_SCALE;
        u64::try_from(converted).ok()
    }

    /// Relative distance from `reference`, in basis points.
    pub fn drift_bps(&self, reference: Rate) -> u128 {
        if reference.0 == 0 {
            return u128::MAX;
        }
        self.0.abs_diff(reference.0).saturating_mul(10_000) / reference.0
    }
}

/// Source of USD prices.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// USD price of one whole coin.
    async fn usd_price(&self, coin: &str) -> RateResult<f64>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    rate: f64,
}

/// HTTP provider: `GET {url}/v1/rates/{coin}?code=USD` → `{"rate": 43210.5}`.
#[derive(Debug, Clone)]
pub struct HttpRateProvider {
    base_url: String,
    http: Client,
}

impl HttpRateProvider {
    pub fn new(url: &str) -> RateResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn usd_price(&self, coin: &str) -> RateResult<f64> {
        let response = self
            .http
            .get(format!("{}/v1/rates/{}", self.base_url, coin.to_uppercase()))
            .query(&[("code", "USD")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RateError::Status {
                status: response.status().as_u16(),
            });
        }
        let price: PriceResponse = response.json().await?;
        Ok(price.rate)
    }
}

struct PriceEntry {
    micros: u128,
    fetched_at: Instant,
}

/// Cached USD prices and the rates derived from them.
pub struct RateService {
    provider: Arc<dyn RateProvider>,
    cache: Mutex<LruCache<String, PriceEntry>>,
    ttl: Duration,
}

impl RateService {
    pub fn new(provider: Arc<dyn RateProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN))),
            ttl,
        }
    }

    fn cached(&self, coin: &str) -> Option<(u128, bool)> {
        let mut cache = self.cache.lock().ok()?;
        cache
            .get(coin)
            .map(|entry| (entry.micros, entry.fetched_at.elapsed() < self.ttl))
    }

    /// USD price of one whole coin, in micro-dollars.
    pub async fn usd_price_micros(&self, coin: &str) -> RateResult<u128> {
        let cached = self.cached(coin);
        if let Some((micros, true)) = cached {
            return Ok(micros);
        }

        let fetched = self.provider.usd_price(coin).await.and_then(|price| {
            if price.is_finite() && price > 0.0 {
                Ok((price * USD_MICROS) as u128)
            } else {
                Err(RateError::Unavailable(coin.to_string()))
            }
        });
        match fetched {
            Ok(micros) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(
                        coin.to_string(),
                        PriceEntry {
                            micros,
                            fetched_at: Instant::now(),
                        },
                    );
                }
                debug!(coin, micros = micros as u64, "Price refreshed");
                Ok(micros)
            }
            Err(e) => match cached {
                Some((micros, _)) => {
                    warn!(coin, error = %e, "Rate provider failed, using stale price");
                    Ok(micros)
                }
                None => Err(e),
            },
        }
    }

    /// Drop every cached price.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub async fn rate(&self, from_coin: &str, to_coin: &str) -> RateResult<Rate> {
        let from = self.usd_price_micros(from_coin).await?;
        let to = self.usd_price_micros(to_coin).await?;
        Rate::from_usd_micros(from_coin, from, to_coin, to)
    }

    /// A USD amount in cents, expressed in `coin` smallest units.
    pub async fn usd_cents_to_units(&self, coin: &str, cents: u64) -> RateResult<u64> {
        if cents == 0 {
            return Ok(0);
        }
        let price = self.usd_price_micros(coin).await?;
        // cents * 10^4 micro-dollars, times units per coin, over micro-dollars per coin.
        let units = u128::from(cents)
            .checked_mul(10_000)
            .and_then(|m| m.checked_mul(10u128.pow(coin_decimals(coin))))
            .map(|m| m / price)
            .ok_or_else(|| RateError::Overflow(coin.to_string()))?;
        u64::try_from(units).map_err(|_| RateError::Overflow(coin.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRates;

    #[test]
    fn rate_accounts_for_decimals() {
        // 1 BTC = 40000 USD, 1 ETH = 2000 USD: 1 sat = 20 ETH / 1e8 = 2e11 wei.
        let rate = Rate::from_usd_micros("btc", 40_000_000_000, "eth", 2_000_000_000).unwrap();
        assert_eq!(rate.convert(1), Some(200_000_000_000));
        assert_eq!(rate.convert(100_000_000), None);

        let back = Rate::from_usd_micros("eth", 2_000_000_000, "btc", 40_000_000_000).unwrap();
        assert_eq!(back.convert(1_000_000_000_000_000_000), Some(5_000_000));

        let same = Rate::from_usd_micros("btc", 40_000_000_000, "bch", 400_000_000).unwrap();
        assert_eq!(same.convert(1_000), Some(100_000));
    }

    #[test]
    fn drift_in_basis_points() {
        let reference = Rate(1_000_000);
        assert_eq!(Rate(1_050_000).drift_bps(reference), 500);
        assert_eq!(Rate(940_000).drift_bps(reference), 600);
        assert_eq!(Rate(1_000_000).drift_bps(reference), 0);
    }

    #[tokio::test]
    async fn stale_price_served_when_provider_fails() {
        let provider = Arc::new(MockRates::default());
        provider.set_price("btc", 40_000.0);
        let rates = RateService::new(provider.clone(), Duration::from_millis(1));
        assert_eq!(rates.usd_price_micros("btc").await.unwrap(), 40_000_000_000);

        std::thread::sleep(Duration::from_millis(5));
        provider.fail(true);
        assert_eq!(rates.usd_price_micros("btc").await.unwrap(), 40_000_000_000);
        assert!(rates.usd_price_micros("eth").await.is_err());
    }

    #[tokio::test]
    async fn settlement_fee_in_coin_units() {
        let provider = Arc::new(MockRates::default());
        provider.set_price("bch", 400.0);
        let rates = RateService::new(provider, Duration::from_secs(60));
        // 2 USD at 400 USD/BCH = 0.005 BCH.
        assert_eq!(rates.usd_cents_to_units("bch", 200).await.unwrap(), 500_000);
    }
}
