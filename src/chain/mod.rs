// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Per-coin capabilities
//!
//! Everything that differs between coins (address format, dust, fee levels,
//! size/fee estimation, input selection) lives behind [`ChainCapability`].
//! The service picks an implementation from the [`ChainRegistry`] by the
//! wallet's coin and never branches on coin names itself.
//!
//! | Coin | Model | Address prefix (livenet / testnet) |
//! |------|-------|------------------------------------|
//! | btc | UTXO | `bc1q` / `tb1q` |
//! | bch | UTXO | `bitcoincash:q` / `bchtest:q` |
//! | ltc | UTXO | `ltc1q` / `tltc1q` |
//! | doge | UTXO | `D` / `n` |
//! | eth | account | `0x` |

pub mod account;
pub mod utxo;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ServiceError, ServiceResult};
use crate::models::address::has_valid_payload;
use crate::models::{TxProposal, Utxo};

pub use account::AccountChain;
pub use utxo::UtxoChain;

/// Number of extra confirmation targets sampled when a target has no estimate.
pub const FEE_LEVELS_FALLBACK: u32 = 2;

/// Static definition of one fee level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeLevelDef {
    pub name: &'static str,
    pub nb_blocks: u32,
    /// Applied to the sampled rate, in percent.
    pub multiplier_pct: u64,
    /// Fee per kB used when no estimate is available.
    pub default_value: u64,
}

impl FeeLevelDef {
    pub const fn new(name: &'static str, nb_blocks: u32, default_value: u64) -> Self {
        Self {
            name,
            nb_blocks,
            multiplier_pct: 100,
            default_value,
        }
    }

    pub const fn with_multiplier(mut self, pct: u64) -> Self {
        self.multiplier_pct = pct;
        self
    }
}

/// Inputs and fee chosen for a proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSelection {
    pub inputs: Vec<Utxo>,
    pub fee: u64,
}

/// What a "send everything" proposal would look like.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMaxInfo {
    pub size: u64,
    pub amount: u64,
    pub fee: u64,
    pub fee_per_kb: u64,
    pub inputs: Vec<Utxo>,
    pub utxos_below_fee: usize,
    pub amount_below_fee: u64,
    pub utxos_above_max_size: usize,
    pub amount_above_max_size: u64,
}

pub trait ChainCapability: Send + Sync {
    fn coin(&self) -> &str;
    fn is_utxo_coin(&self) -> bool;
    /// Wallets of this coin use one address for everything.
    fn is_single_address(&self) -> bool;
    fn address_prefix(&self, network: &str) -> &'static str;

    fn validate_address(&self, network: &str, address: &str) -> bool {
        has_valid_payload(self.address_prefix(network), address)
    }

    fn dust_threshold(&self) -> u64;
    /// Upper bound for the amount a single proposal may send.
    fn max_money(&self) -> u64 {
        u64::MAX
    }
    fn fee_levels(&self) -> &[FeeLevelDef];
    fn max_fee_per_kb(&self) -> u64;
    fn max_tx_fee(&self) -> u64;

    fn supports_schnorr(&self) -> bool {
        false
    }

    /// Convert an explorer fee rate into the smallest unit per kB.
    fn convert_fee_per_kb(&self, fee_rate: f64) -> u64;

    fn estimated_size(&self, txp: &TxProposal) -> u64 {
        txp.estimated_size()
    }

    /// Pick inputs (UTXO coins) or compute the fee (account coins).
    ///
    /// `utxos` must already be reconciled: locked and recently spent
    /// outputs marked or removed.
    fn select_tx_inputs(&self, txp: &TxProposal, utxos: &[Utxo]) -> ServiceResult<InputSelection>;

    /// Final validation of a proposal with inputs and fee set.
    fn check_tx(&self, txp: &TxProposal) -> ServiceResult<()>;

    /// `available` is the spendable balance for account coins; UTXO coins
    /// work from `utxos` instead.
    fn send_max_info(&self, template: &TxProposal, utxos: &[Utxo], available: u64) -> SendMaxInfo;
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Clone)]
pub struct ChainRegistry {
    chains: HashMap<String, Arc<dyn ChainCapability>>,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        let mut registry = Self {
            chains: HashMap::new(),
        };
        registry.insert(Arc::new(UtxoChain::btc()));
        registry.insert(Arc::new(UtxoChain::bch()));
        registry.insert(Arc::new(UtxoChain::ltc()));
        registry.insert(Arc::new(UtxoChain::doge()));
        registry.insert(Arc::new(AccountChain::eth()));
        registry
    }
}

impl ChainRegistry {
    pub fn insert(&mut self, chain: Arc<dyn ChainCapability>) {
        self.chains.insert(chain.coin().to_string(), chain);
    }

    pub fn get(&self, coin: &str) -> ServiceResult<Arc<dyn ChainCapability>> {
        self.chains
            .get(coin)
            .cloned()
            .ok_or_else(|| ServiceError::invalid(format!("Invalid coin: {coin}")))
    }

    pub fn is_supported(&self, coin: &str) -> bool {
        self.chains.contains_key(coin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn registry_knows_supported_coins() {
        let registry = ChainRegistry::default();
        for coin in ["btc", "bch", "ltc", "doge", "eth"] {
            assert_eq!(registry.get(coin).unwrap().coin(), coin);
        }
        let err = registry.get("xyz").err().unwrap();
        assert!(err.is_code(ErrorCode::InvalidArgument));
        assert!(registry.get("eth").unwrap().is_single_address());
        assert!(!registry.get("btc").unwrap().is_single_address());
        assert!(registry.get("bch").unwrap().supports_schnorr());
    }

    #[test]
    fn address_validation_uses_network_prefix() {
        let btc = UtxoChain::btc();
        let payload = "ab".repeat(20);
        assert!(btc.validate_address("livenet", &format!("bc1q{payload}")));
        assert!(!btc.validate_address("testnet", &format!("bc1q{payload}")));
        assert!(btc.validate_address("testnet", &format!("tb1q{payload}")));
        assert!(AccountChain::eth().validate_address("livenet", &format!("0x{payload}")));
    }
}
