// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! UTXO-model coins and their input selection.
//!
//! ## Selection
//!
//! 1. Balance checks: `INSUFFICIENT_FUNDS` when the (confirmed) total is below
//!    the amount, `LOCKED_FUNDS` when only locked outputs would cover it.
//! 2. Drop locked outputs, outputs not worth their own input fee and, when
//!    requested, unconfirmed outputs.
//! 3. Try confirmation groups `>= 6`, `>= 1`, `>= 0`, skipping a group that
//!    adds nothing over the previous one.
//! 4. Within a group, add small inputs largest first; stop early in favour of
//!    a single big input when small inputs are too small or too expensive.
//!
//! All thresholds are integer comparisons on smallest units.

use tracing::debug;

use super::{ChainCapability, FeeLevelDef, InputSelection, SendMaxInfo};
use crate::error::{ErrorCode, ServiceError, ServiceResult};
use crate::models::{TxProposal, Utxo};

pub const MAX_TX_SIZE: u64 = 100 * 1000;
pub const MIN_OUTPUT_AMOUNT: u64 = 546;
const SATS_PER_COIN: u64 = 100_000_000;

/// An input is "big" above `amount * MAX_SINGLE_UTXO_FACTOR + fees`.
const MAX_SINGLE_UTXO_FACTOR: u64 = 2;
/// Small inputs below a tenth of the amount are not worth adding.
const MIN_TX_AMOUNT_VS_UTXO_DIVISOR: u64 = 10;
/// Fee above a twentieth of the amount is "significant".
const MAX_FEE_VS_TX_AMOUNT_DIVISOR: u64 = 20;
/// A significant fee may not exceed five single-input fees.
const MAX_FEE_VS_SINGLE_UTXO_FEE_FACTOR: u64 = 5;

const CONFIRMATION_GROUPS: [u32; 3] = [6, 1, 0];

const BTC_FEE_LEVELS: [FeeLevelDef; 5] = [
    FeeLevelDef::new("urgent", 2, 75_000).with_multiplier(150),
    FeeLevelDef::new("priority", 2, 50_000),
    FeeLevelDef::new("normal", 3, 30_000),
    FeeLevelDef::new("economy", 6, 25_000),
    FeeLevelDef::new("superEconomy", 24, 10_000),
];

const BCH_FEE_LEVELS: [FeeLevelDef; 1] = [FeeLevelDef::new("normal", 2, 2_000).with_multiplier(105)];

const LTC_FEE_LEVELS: [FeeLevelDef; 5] = [
    FeeLevelDef::new("urgent", 2, 150_000),
    FeeLevelDef::new("priority", 2, 100_000),
    FeeLevelDef::new("normal", 3, 100_000),
    FeeLevelDef::new("economy", 6, 10_000),
    FeeLevelDef::new("superEconomy", 24, 10_000),
];

const DOGE_FEE_LEVELS: [FeeLevelDef; 1] = [FeeLevelDef::new("normal", 2, 100_000_000)];

#[derive(Debug, Clone)]
pub struct UtxoChain {
    coin: &'static str,
    livenet_prefix: &'static str,
    testnet_prefix: &'static str,
    dust: u64,
    max_money: u64,
    fee_levels: &'static [FeeLevelDef],
    max_fee_per_kb: u64,
    max_tx_fee: u64,
    schnorr: bool,
}

impl UtxoChain {
    pub fn btc() -> Self {
        Self {
            coin: "btc",
            livenet_prefix: "bc1q",
            testnet_prefix: "tb1q",
            dust: MIN_OUTPUT_AMOUNT,
            max_money: 21_000_000 * SATS_PER_COIN,
            fee_levels: &BTC_FEE_LEVELS,
            max_fee_per_kb: 10_000 * 1000,
            max_tx_fee: 5_000_000,
            schnorr: false,
        }
    }

    pub fn bch() -> Self {
        Self {
            coin: "bch",
            livenet_prefix: "bitcoincash:q",
            testnet_prefix: "bchtest:q",
            fee_levels: &BCH_FEE_LEVELS,
            schnorr: true,
            ..Self::btc()
        }
    }

    pub fn ltc() -> Self {
        Self {
            coin: "ltc",
            livenet_prefix: "ltc1q",
            testnet_prefix: "tltc1q",
            max_money: 84_000_000 * SATS_PER_COIN,
            fee_levels: &LTC_FEE_LEVELS,
            ..Self::btc()
        }
    }

    pub fn doge() -> Self {
        Self {
            coin: "doge",
            livenet_prefix: "D",
            testnet_prefix: "n",
            dust: 1_000_000,
            max_money: 10_000_000_000 * SATS_PER_COIN,
            fee_levels: &DOGE_FEE_LEVELS,
            max_fee_per_kb: 100_000_000 * 100,
            max_tx_fee: 400 * 100_000_000,
            schnorr: false,
        }
    }

    fn dust_limit(&self) -> u64 {
        self.dust.max(MIN_OUTPUT_AMOUNT)
    }
}

/// Size and per-input cost of a proposal before any input is added.
struct SizeModel {
    base_size: u64,
    base_fee: u64,
    size_per_input: u64,
    fee_per_input: u64,
}

impl SizeModel {
    fn of(txp: &TxProposal) -> Self {
        let mut base = txp.clone();
        base.inputs.clear();
        let fee_per_kb = txp.fee_per_kb.unwrap_or(0);
        let base_size = base.estimated_size();
        let size_per_input = txp.input_size();
        Self {
            base_size,
            base_fee: base_size * fee_per_kb / 1000,
            size_per_input,
            fee_per_input: size_per_input * fee_per_kb / 1000,
        }
    }

    fn fee_for(&self, inputs: usize) -> u64 {
        self.base_fee + inputs as u64 * self.fee_per_input
    }

    fn size_for(&self, inputs: usize) -> u64 {
        self.base_size + inputs as u64 * self.size_per_input
    }
}

fn insufficient_for_fee(txp: &TxProposal) -> ServiceError {
    ServiceError::client_msg(
        ErrorCode::InsufficientFundsForFee,
        format!(
            "Insufficient funds for fee (coin: {}, feePerKb: {})",
            txp.coin,
            txp.fee_per_kb.unwrap_or(0)
        ),
    )
}

impl UtxoChain {
    /// Try to cover `amount` from one candidate group.
    fn select_from(&self, txp: &TxProposal, model: &SizeModel, utxos: &[Utxo]) -> ServiceResult<InputSelection> {
        let amount = txp.total_amount();
        let total_value: u64 = utxos.iter().map(|u| u.satoshis).sum();
        let net_value = total_value as i128 - model.fee_for(utxos.len()) as i128;

        if total_value < amount {
            return Err(ServiceError::client(ErrorCode::InsufficientFunds));
        }
        if net_value < amount as i128 {
            return Err(insufficient_for_fee(txp));
        }

        let big_threshold = amount * MAX_SINGLE_UTXO_FACTOR + model.base_fee + model.fee_per_input;
        let (mut big, mut small): (Vec<&Utxo>, Vec<&Utxo>) = utxos.iter().partition(|u| u.satoshis > big_threshold);
        big.sort_by_key(|u| u.satoshis);
        small.sort_by(|a, b| b.satoshis.cmp(&a.satoshis));

        let mut selected: Vec<&Utxo> = Vec::new();
        let mut total: u64 = 0;
        let mut net_total: i128 = -(model.base_fee as i128);
        let mut fee = 0u64;
        let mut error = None;

        for input in &small {
            let net_input = input.satoshis as i128 - model.fee_per_input as i128;
            selected.push(input);
            total += input.satoshis;
            net_total += net_input;
            fee = model.fee_for(selected.len());

            if model.size_for(selected.len()) > MAX_TX_SIZE {
                error = Some(ServiceError::client(ErrorCode::TxMaxSizeExceeded));
                break;
            }

            if !big.is_empty() {
                if net_input * (MIN_TX_AMOUNT_VS_UTXO_DIVISOR as i128) < amount as i128 {
                    break;
                }
                let single_input_fee = model.base_fee + model.fee_per_input;
                if fee * MAX_FEE_VS_TX_AMOUNT_DIVISOR > amount
                    && fee > single_input_fee * MAX_FEE_VS_SINGLE_UTXO_FEE_FACTOR
                {
                    break;
                }
            }

            if net_total >= amount as i128 {
                let change = total.saturating_sub(amount + fee);
                if change > 0 && change <= self.dust_limit() {
                    // Dust change is not worth an output.
                    fee += change;
                }
                break;
            }
        }

        if net_total < amount as i128 {
            selected.clear();
            if let Some(input) = big.first() {
                fee = model.fee_for(1);
                selected.push(input);
            }
        }

        if selected.is_empty() {
            return Err(error.unwrap_or_else(|| insufficient_for_fee(txp)));
        }

        Ok(InputSelection {
            inputs: selected.into_iter().cloned().collect(),
            fee,
        })
    }
}

impl ChainCapability for UtxoChain {
    fn coin(&self) -> &str {
        self.coin
    }

    fn is_utxo_coin(&self) -> bool {
        true
    }

    fn is_single_address(&self) -> bool {
        false
    }

    fn address_prefix(&self, network: &str) -> &'static str {
        if network == "livenet" {
            self.livenet_prefix
        } else {
            self.testnet_prefix
        }
    }

    fn dust_threshold(&self) -> u64 {
        self.dust_limit()
    }

    fn max_money(&self) -> u64 {
        self.max_money
    }

    fn fee_levels(&self) -> &[FeeLevelDef] {
        self.fee_levels
    }

    fn max_fee_per_kb(&self) -> u64 {
        self.max_fee_per_kb
    }

    fn max_tx_fee(&self) -> u64 {
        self.max_tx_fee
    }

    fn supports_schnorr(&self) -> bool {
        self.schnorr
    }

    fn convert_fee_per_kb(&self, fee_rate: f64) -> u64 {
        (fee_rate * 1e8).round().max(0.0) as u64
    }

    fn select_tx_inputs(&self, txp: &TxProposal, utxos: &[Utxo]) -> ServiceResult<InputSelection> {
        let amount = txp.total_amount();
        let exclude_unconfirmed = txp.exclude_unconfirmed_utxos;

        let counted = |u: &&Utxo| !exclude_unconfirmed || u.confirmations > 0;
        let total: u64 = utxos.iter().filter(counted).map(|u| u.satoshis).sum();
        let available: u64 = utxos
            .iter()
            .filter(counted)
            .filter(|u| !u.locked)
            .map(|u| u.satoshis)
            .sum();
        if total < amount {
            return Err(ServiceError::client(ErrorCode::InsufficientFunds));
        }
        if available < amount {
            return Err(ServiceError::client(ErrorCode::LockedFunds));
        }

        let model = SizeModel::of(txp);
        let candidates: Vec<Utxo> = utxos
            .iter()
            .filter(|u| !u.locked && u.satoshis > model.fee_per_input && counted(u))
            .cloned()
            .collect();

        let groups = if exclude_unconfirmed {
            &CONFIRMATION_GROUPS[..2]
        } else {
            &CONFIRMATION_GROUPS[..]
        };

        let mut last_group_len = None;
        let mut selection_error = None;
        for &group in groups {
            let group_utxos: Vec<Utxo> = candidates
                .iter()
                .filter(|u| u.confirmations >= group)
                .cloned()
                .collect();
            if last_group_len == Some(group_utxos.len()) {
                continue;
            }
            last_group_len = Some(group_utxos.len());

            match self.select_from(txp, &model, &group_utxos) {
                Ok(selection) => {
                    debug!(
                        coin = self.coin,
                        group,
                        inputs = selection.inputs.len(),
                        fee = selection.fee,
                        "Selected tx inputs"
                    );
                    return Ok(selection);
                }
                Err(e) => selection_error = Some(e),
            }
        }

        Err(selection_error.unwrap_or_else(|| insufficient_for_fee(txp)))
    }

    fn check_tx(&self, txp: &TxProposal) -> ServiceResult<()> {
        if self.estimated_size(txp) > MAX_TX_SIZE {
            return Err(ServiceError::client(ErrorCode::TxMaxSizeExceeded));
        }
        if txp.inputs.is_empty() {
            return Err(ServiceError::invariant(format!("proposal {} has no inputs", txp.id)));
        }
        if txp.outputs.iter().any(|o| o.amount < self.dust_limit()) {
            return Err(ServiceError::client(ErrorCode::DustAmount));
        }
        let fee = txp.fee.unwrap_or(0);
        if txp.input_total() < txp.total_amount().saturating_add(fee) {
            return Err(insufficient_for_fee(txp));
        }
        if fee > self.max_tx_fee {
            return Err(ServiceError::client_msg(
                ErrorCode::TxCannotCreate,
                format!("Fee {fee} exceeds the maximum for {}", self.coin),
            ));
        }
        Ok(())
    }

    fn send_max_info(&self, template: &TxProposal, utxos: &[Utxo], _available: u64) -> SendMaxInfo {
        let fee_per_kb = template.fee_per_kb.unwrap_or(0);
        let mut info = SendMaxInfo {
            fee_per_kb,
            ..Default::default()
        };

        let mut inputs: Vec<&Utxo> = utxos
            .iter()
            .filter(|u| !u.locked)
            .filter(|u| !template.exclude_unconfirmed_utxos || u.confirmations > 0)
            .collect();
        inputs.sort_by(|a, b| b.satoshis.cmp(&a.satoshis));
        if inputs.is_empty() {
            return info;
        }

        let model = SizeModel::of(template);
        let (usable, below_fee): (Vec<&Utxo>, Vec<&Utxo>) =
            inputs.into_iter().partition(|u| u.satoshis > model.fee_per_input);
        info.utxos_below_fee = below_fee.len();
        info.amount_below_fee = below_fee.iter().map(|u| u.satoshis).sum();

        let mut txp = template.clone();
        txp.inputs.clear();
        for (i, input) in usable.iter().enumerate() {
            if model.size_for(i + 1) > MAX_TX_SIZE {
                info.utxos_above_max_size = usable.len() - i;
                info.amount_above_max_size = usable[i..].iter().map(|u| u.satoshis).sum();
                break;
            }
            txp.inputs.push((*input).clone());
        }
        if txp.inputs.is_empty() {
            return info;
        }

        let fee = txp.estimated_fee();
        let amount = txp.input_total().saturating_sub(fee);
        if amount < MIN_OUTPUT_AMOUNT {
            return info;
        }

        info.size = txp.estimated_size();
        info.fee = fee;
        info.amount = amount;
        info.inputs = txp.inputs;
        info
    }
}
