// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account-model coins.
//!
//! There are no inputs to select: a proposal spends from the wallet's single
//! address, the fee is `gas price * gas limit`, and the nonce is taken from
//! the explorer's transaction count when the proposal is created.

use super::{ChainCapability, FeeLevelDef, InputSelection, SendMaxInfo};
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::{TxProposal, Utxo};

pub const DEFAULT_GAS_LIMIT: u64 = 60_000;
pub const MIN_GAS_LIMIT: u64 = 21_000;

const GWEI: u64 = 1_000_000_000;

const ETH_FEE_LEVELS: [FeeLevelDef; 5] = [
    FeeLevelDef::new("urgent", 1, 10 * GWEI),
    FeeLevelDef::new("priority", 2, 5 * GWEI),
    FeeLevelDef::new("normal", 3, GWEI),
    FeeLevelDef::new("economy", 4, GWEI),
    FeeLevelDef::new("superEconomy", 4, GWEI),
];

#[derive(Debug, Clone)]
pub struct AccountChain {
    coin: &'static str,
    gas_limit: u64,
    fee_levels: &'static [FeeLevelDef],
    max_gas_price: u64,
    max_tx_fee: u64,
}

impl AccountChain {
    pub fn eth() -> Self {
        Self {
            coin: "eth",
            gas_limit: DEFAULT_GAS_LIMIT,
            fee_levels: &ETH_FEE_LEVELS,
            max_gas_price: 1_000 * GWEI,
            max_tx_fee: 1_000_000_000 * GWEI,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit.max(MIN_GAS_LIMIT)
    }

    fn fee(&self, txp: &TxProposal) -> u64 {
        txp.fee_per_kb.unwrap_or(0).saturating_mul(self.gas_limit())
    }
}

impl ChainCapability for AccountChain {
    fn coin(&self) -> &str {
        self.coin
    }

    fn is_utxo_coin(&self) -> bool {
        false
    }

    fn is_single_address(&self) -> bool {
        true
    }

    fn address_prefix(&self, _network: &str) -> &'static str {
        "0x"
    }

    fn dust_threshold(&self) -> u64 {
        0
    }

    fn fee_levels(&self) -> &[FeeLevelDef] {
        self.fee_levels
    }

    fn max_fee_per_kb(&self) -> u64 {
        self.max_gas_price
    }

    fn max_tx_fee(&self) -> u64 {
        self.max_tx_fee
    }

    /// Explorer estimates are already in wei.
    fn convert_fee_per_kb(&self, fee_rate: f64) -> u64 {
        fee_rate.round().max(0.0) as u64
    }

    fn estimated_size(&self, _txp: &TxProposal) -> u64 {
        self.gas_limit()
    }

    fn select_tx_inputs(&self, txp: &TxProposal, _utxos: &[Utxo]) -> ServiceResult<InputSelection> {
        if txp.outputs.len() != 1 {
            return Err(ServiceError::invalid("Only one output allowed"));
        }
        Ok(InputSelection {
            inputs: Vec::new(),
            fee: self.fee(txp),
        })
    }

    fn check_tx(&self, txp: &TxProposal) -> ServiceResult<()> {
        if txp.outputs.len() != 1 {
            return Err(ServiceError::invalid("Only one output allowed"));
        }
        if txp.nonce.is_none() {
            return Err(ServiceError::invariant(format!("proposal {} has no nonce", txp.id)));
        }
        let fee = txp.fee.unwrap_or(0);
        if fee > self.max_tx_fee {
            return Err(ServiceError::client_msg(
                ErrorCode::TxCannotCreate,
                format!("Fee {fee} exceeds the maximum for {}", self.coin),
            ));
        }
        Ok(())
    }

    fn send_max_info(&self, template: &TxProposal, _utxos: &[Utxo], available: u64) -> SendMaxInfo {
        let fee_per_kb = template.fee_per_kb.unwrap_or(0);
        let fee = self.fee(template);
        if available <= fee {
            return SendMaxInfo {
                fee_per_kb,
                ..Default::default()
            };
        }
        SendMaxInfo {
            size: self.gas_limit(),
            amount: available - fee,
            fee,
            fee_per_kb,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::txproposal::tests::params;
    use crate::models::TxOutput;

    fn eth_txp(gas_price: u64) -> TxProposal {
        let mut p = params(1, 1);
        p.coin = "eth".into();
        p.fee_per_kb = Some(gas_price);
        p.nonce = Some(4);
        p.outputs = vec![TxOutput {
            to_address: format!("0x{}", "ab".repeat(20)),
            amount: 1_000_000,
            message: None,
        }];
        TxProposal::create(p)
    }

    #[test]
    fn fee_is_gas_price_times_limit() {
        let chain = AccountChain::eth();
        let txp = eth_txp(2 * GWEI);
        let selection = chain.select_tx_inputs(&txp, &[]).unwrap();
        assert!(selection.inputs.is_empty());
        assert_eq!(selection.fee, 2 * GWEI * DEFAULT_GAS_LIMIT);
    }

    #[test]
    fn single_output_only() {
        let chain = AccountChain::eth();
        let mut txp = eth_txp(GWEI);
        txp.outputs.push(txp.outputs[0].clone());
        let err = chain.select_tx_inputs(&txp, &[]).unwrap_err();
        assert!(err.is_code(ErrorCode::InvalidArgument));
    }

    #[test]
    fn send_max_subtracts_fee() {
        let chain = AccountChain::eth();
        let txp = eth_txp(GWEI);
        let fee = GWEI * DEFAULT_GAS_LIMIT;
        let info = chain.send_max_info(&txp, &[], fee + 500);
        assert_eq!(info.amount, 500);
        assert_eq!(info.fee, fee);

        let empty = chain.send_max_info(&txp, &[], fee);
        assert_eq!(empty.amount, 0);
        assert!(empty.inputs.is_empty());
    }

    #[test]
    fn check_tx_caps_fee() {
        let chain = AccountChain::eth();
        let mut txp = eth_txp(GWEI);
        txp.fee = Some(chain.max_tx_fee() + 1);
        let err = chain.check_tx(&txp).unwrap_err();
        assert!(err.is_code(ErrorCode::TxCannotCreate));
        txp.fee = Some(GWEI);
        chain.check_tx(&txp).unwrap();
    }
}
