// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fee levels and block height, both cached with stale fallback.
//!
//! ## Fee level sampling
//!
//! Each level samples its confirmation target and, when the explorer has no
//! estimate for it, up to `FEE_LEVELS_FALLBACK` slower targets. A level with
//! no estimate at all uses its static default. Levels are then clamped so
//! that no level is more expensive than the one before it.
//!
//! Results are cached only when every level got a real estimate; an explorer
//! failure serves the last cached levels (however old) or the defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;

use super::WalletService;
use crate::chain::{ChainCapability, FEE_LEVELS_FALLBACK};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeeLevel {
    pub level: String,
    pub fee_per_kb: u64,
    pub nb_blocks: u32,
}

/// Confirmation targets to ask the explorer about.
fn sample_points(chain: &dyn ChainCapability) -> Vec<u32> {
    let mut points: Vec<u32> = chain
        .fee_levels()
        .iter()
        .flat_map(|l| l.nb_blocks..=l.nb_blocks + FEE_LEVELS_FALLBACK)
        .collect();
    points.sort_unstable();
    points.dedup();
    points
}

/// Turn raw samples into levels. Returns the levels and whether every level
/// was backed by an estimate.
pub fn compute_fee_levels(chain: &dyn ChainCapability, samples: &BTreeMap<u32, f64>) -> (Vec<FeeLevel>, bool) {
    let mut complete = true;
    let mut levels: Vec<FeeLevel> = chain
        .fee_levels()
        .iter()
        .map(|def| {
            let sampled = (0..=FEE_LEVELS_FALLBACK).find_map(|offset| {
                let nb = def.nb_blocks + offset;
                samples.get(&nb).filter(|rate| **rate > 0.0).map(|rate| (nb, *rate))
            });
            match sampled {
                Some((nb_blocks, rate)) => FeeLevel {
                    level: def.name.to_string(),
                    fee_per_kb: chain.convert_fee_per_kb(rate) * def.multiplier_pct / 100,
                    nb_blocks,
                },
                None => {
                    complete = false;
                    FeeLevel {
                        level: def.name.to_string(),
                        fee_per_kb: def.default_value,
                        nb_blocks: def.nb_blocks,
                    }
                }
            }
        })
        .collect();

    clamp_fee_levels(&mut levels);
    (levels, complete)
}

/// Make fees non-increasing from the fastest to the slowest level.
pub fn clamp_fee_levels(levels: &mut [FeeLevel]) {
    for i in 1..levels.len() {
        if levels[i].fee_per_kb > levels[i - 1].fee_per_kb {
            levels[i].fee_per_kb = levels[i - 1].fee_per_kb;
        }
    }
}

fn default_levels(chain: &dyn ChainCapability) -> Vec<FeeLevel> {
    chain
        .fee_levels()
        .iter()
        .map(|def| FeeLevel {
            level: def.name.to_string(),
            fee_per_kb: def.default_value,
            nb_blocks: def.nb_blocks,
        })
        .collect()
}

impl WalletService {
    pub async fn get_fee_levels(&self, coin: &str, network: &str) -> ServiceResult<Vec<FeeLevel>> {
        let chain = self.chain(coin)?;
        let cache_key = format!("feeLevels:{coin}:{network}");
        let max_age = self.ctx.config.policy.fee_level_cache;
        let cached = self.ctx.storage.check_and_use_global_cache(&cache_key, max_age).await?;
        if let Some(fresh) = cached.fresh {
            if let Ok(levels) = serde_json::from_value(fresh) {
                return Ok(levels);
            }
        }

        let explorer = self.explorer(coin, network)?;
        match explorer.estimate_fee(&sample_points(chain.as_ref())).await {
            Ok(samples) => {
                let (levels, complete) = compute_fee_levels(chain.as_ref(), &samples);
                if complete {
                    let value = serde_json::to_value(&levels)
                        .map_err(|e| ServiceError::invariant(e.to_string()))?;
                    self.ctx.storage.store_global_cache(&cache_key, &value).await?;
                }
                Ok(levels)
            }
            Err(e) => {
                warn!(coin, network, error = %e, "Fee estimation failed, using cached levels");
                let stale = cached
                    .stale
                    .and_then(|v: Value| serde_json::from_value(v).ok());
                Ok(stale.unwrap_or_else(|| default_levels(chain.as_ref())))
            }
        }
    }

    /// Fee per kB for a named level.
    pub(crate) async fn fee_per_kb_for_level(&self, coin: &str, network: &str, level: &str) -> ServiceResult<u64> {
        self.get_fee_levels(coin, network)
            .await?
            .into_iter()
            .find(|l| l.level == level)
            .map(|l| l.fee_per_kb)
            .ok_or_else(|| ServiceError::invalid(format!("Invalid fee level: {level}")))
    }

    /// Chain tip height, cached; explorer failures fall back to the last
    /// known height.
    pub async fn get_blockchain_height(&self, coin: &str, network: &str) -> ServiceResult<u64> {
        let cache_key = format!("blockHeight:{coin}:{network}");
        let max_age = self.ctx.config.policy.block_height_cache;
        let cached = self.ctx.storage.check_and_use_global_cache(&cache_key, max_age).await?;
        if let Some(height) = cached.fresh.as_ref().and_then(Value::as_u64) {
            return Ok(height);
        }

        match self.explorer(coin, network)?.get_blockchain_height().await {
            Ok(tip) => {
                self.ctx
                    .storage
                    .store_global_cache(&cache_key, &Value::from(tip.height))
                    .await?;
                Ok(tip.height)
            }
            Err(e) => match cached.stale.as_ref().and_then(Value::as_u64) {
                Some(height) => {
                    warn!(coin, network, error = %e, "Using stale block height");
                    Ok(height)
                }
                None => Err(e.into()),
            },
        }
    }
}
